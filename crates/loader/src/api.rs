//! Client for the backend's `/ui/*` HTTP endpoints.
//!
//! Every response is an envelope `{status, ...}`; `status` must be `"success"`
//! or `"ok"`, anything else is reported as [`LoaderError::Api`] with the
//! server's message.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemasync_schema::{InstanceId, Patch, PatchRecord, Schema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::SchemaSource;
use crate::error::{LoaderError, Result};

/// One entry of `GET /ui/instances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
	/// Instance id.
	pub instance_id: InstanceId,
	/// Remaining server-provided fields.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

#[derive(Serialize)]
struct EventBody<'a> {
	#[serde(rename = "type")]
	kind: &'a str,
	#[serde(rename = "pageKey")]
	page_key: Option<&'a str>,
	payload: &'a Value,
}

/// HTTP client bound to one backend.
#[derive(Debug, Clone)]
pub struct HttpApi {
	client: Client,
	base: Url,
}

impl HttpApi {
	/// Creates a client for `base` (e.g. `http://localhost:8000`).
	///
	/// `request_timeout` bounds every request at the HTTP layer.
	pub fn new(base: &str, request_timeout: Duration) -> Result<Self> {
		let client = Client::builder().timeout(request_timeout).build()?;
		Self::with_client(client, base)
	}

	/// Creates a client reusing an existing [`Client`].
	pub fn with_client(client: Client, base: &str) -> Result<Self> {
		Ok(Self {
			client,
			base: Self::parse_base(base)?,
		})
	}

	/// Parses a base URL, normalizing its path to end in `/` so endpoints join
	/// beneath it.
	pub fn parse_base(base: &str) -> Result<Url> {
		let mut url = Url::parse(base).map_err(|err| LoaderError::InvalidBase {
			url: base.to_string(),
			reason: err.to_string(),
		})?;
		if url.cannot_be_a_base() {
			return Err(LoaderError::InvalidBase {
				url: base.to_string(),
				reason: "not a hierarchical url".to_string(),
			});
		}
		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());
			url.set_path(&path);
		}
		Ok(url)
	}

	/// Base URL, always ending in `/`.
	pub fn base(&self) -> &Url {
		&self.base
	}

	fn endpoint(&self, path: &str) -> Result<Url> {
		self.base.join(path).map_err(|err| LoaderError::InvalidBase {
			url: self.base.to_string(),
			reason: err.to_string(),
		})
	}

	/// `GET /ui/schema?instanceId=`.
	pub async fn fetch_schema(&self, instance: &InstanceId) -> Result<Schema> {
		let url = self.endpoint("ui/schema")?;
		let body = self.get_json(self.client.get(url).query(&[("instanceId", instance.as_str())])).await?;
		match field::<Option<Value>>(body, "schema")? {
			Some(Value::Null) | None => Err(LoaderError::NotFound(instance.clone())),
			Some(schema) => decode_schema(instance, schema),
		}
	}

	/// `GET /ui/instances`.
	pub async fn list_instances(&self) -> Result<Vec<InstanceSummary>> {
		let url = self.endpoint("ui/instances")?;
		let body = self.get_json(self.client.get(url)).await?;
		field(body, "instances")
	}

	/// `GET /ui/patches?instanceId=`.
	pub async fn list_patches(&self, instance: &InstanceId) -> Result<Vec<PatchRecord>> {
		let url = self.endpoint("ui/patches")?;
		let body = self.get_json(self.client.get(url).query(&[("instanceId", instance.as_str())])).await?;
		field(body, "patches")
	}

	/// `GET /ui/patches/replay/{id}?instanceId=`.
	pub async fn replay_patch(&self, instance: &InstanceId, patch_id: u64) -> Result<Patch> {
		let url = self.endpoint(&format!("ui/patches/replay/{patch_id}"))?;
		let body = self.get_json(self.client.get(url).query(&[("instanceId", instance.as_str())])).await?;
		field(body, "patch")
	}

	/// `POST /ui/event` with `{type, pageKey, payload}`.
	pub async fn post_event(&self, kind: &str, payload: &Value, page_key: Option<&str>) -> Result<()> {
		let url = self.endpoint("ui/event")?;
		let request = self.client.post(url).json(&EventBody { kind, page_key, payload });
		self.get_json(request).await?;
		Ok(())
	}

	async fn get_json(&self, request: reqwest::RequestBuilder) -> Result<Value> {
		let response = request.send().await?;
		let status = response.status();
		debug!(url = %response.url(), status = status.as_u16(), "http.response");
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(LoaderError::Status {
				status: status.as_u16(),
				body,
			});
		}
		let body: Value = response.json().await.map_err(|err| LoaderError::Decode(err.to_string()))?;
		check_envelope(&body)?;
		Ok(body)
	}
}

#[async_trait]
impl SchemaSource for HttpApi {
	async fn fetch_schema(&self, instance: &InstanceId) -> Result<Schema> {
		HttpApi::fetch_schema(self, instance).await
	}
}

fn check_envelope(body: &Value) -> Result<()> {
	let status = body.get("status").and_then(Value::as_str);
	if matches!(status, Some("success" | "ok")) {
		return Ok(());
	}
	let message = ["message", "error"]
		.iter()
		.find_map(|key| body.get(*key).and_then(Value::as_str))
		.map(str::to_string)
		.unwrap_or_else(|| format!("unexpected status {}", status.unwrap_or("<missing>")));
	Err(LoaderError::Api(message))
}

fn field<T: DeserializeOwned>(mut body: Value, key: &str) -> Result<T> {
	let value = body.get_mut(key).map(Value::take).unwrap_or(Value::Null);
	serde_json::from_value(value).map_err(|err| LoaderError::Decode(format!("{key}: {err}")))
}

/// Decodes and validates a schema document for `instance`.
pub(crate) fn decode_schema(instance: &InstanceId, value: Value) -> Result<Schema> {
	let schema = Schema::from_value(value).map_err(|err| LoaderError::Decode(err.to_string()))?;
	schema.validate().map_err(|source| LoaderError::InvalidSchema {
		instance: instance.clone(),
		source,
	})?;
	Ok(schema)
}
