//! Wire frames and request id generation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id of one command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
	/// Borrows the raw id.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for RequestId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

/// Counter-based generator of `"{prefix}_{counter:06}"` ids.
///
/// The counter only moves forward, so ids never repeat for the generator's lifetime.
#[derive(Debug, Clone)]
pub struct RequestIdGen {
	prefix: String,
	next: u64,
}

impl RequestIdGen {
	/// Creates a generator whose first id is `"{prefix}_000001"`.
	pub fn new(prefix: impl Into<String>) -> Self {
		Self {
			prefix: prefix.into(),
			next: 1,
		}
	}

	/// Generates the next unique id and advances the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> RequestId {
		let id = RequestId(format!("{}_{:06}", self.prefix, self.next));
		self.next += 1;
		id
	}
}

/// Client to server request frame.
#[derive(Debug, Serialize)]
pub(crate) struct CommandFrame<'a> {
	pub id: &'a RequestId,
	pub action: &'a str,
	pub params: &'a Value,
}

/// Client to server fire-and-forget frame.
#[derive(Debug, Serialize)]
pub(crate) struct EventFrame<'a> {
	#[serde(rename = "type")]
	pub kind: &'a str,
	pub payload: &'a Value,
	#[serde(rename = "pageKey", skip_serializing_if = "Option::is_none")]
	pub page_key: Option<&'a str>,
}

/// Server reply to a command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandResponse {
	/// Id of the request this answers.
	pub id: RequestId,
	/// Whether the command succeeded.
	#[serde(default)]
	pub success: bool,
	/// Replacement schema, when the command produced one.
	#[serde(default)]
	pub schema: Option<Value>,
	/// Command-specific result.
	#[serde(default)]
	pub data: Option<Value>,
	/// Failure description for `success: false`.
	#[serde(default)]
	pub error: Option<Value>,
}

impl CommandResponse {
	/// Failure text: the `error` string, the error object's `message`, or a generic text.
	pub fn error_message(&self) -> String {
		match &self.error {
			Some(Value::String(s)) => s.clone(),
			Some(Value::Object(map)) => map
				.get("message")
				.and_then(Value::as_str)
				.map_or_else(|| Value::Object(map.clone()).to_string(), str::to_string),
			Some(Value::Null) | None => "command failed without an error message".to_string(),
			Some(other) => other.to_string(),
		}
	}

	/// Field of `data`, if `data` is a map.
	pub fn data_field(&self, key: &str) -> Option<&Value> {
		self.data.as_ref()?.get(key)
	}
}
