//! Client configuration.
//!
//! Read from TOML. Every field is optional and falls back to its default, so a
//! missing file is the same as an empty one.
//!
//! # Location
//!
//! 1. `--config` on the command line.
//! 2. `SCHEMASYNC_CONFIG` environment variable.
//! 3. `$XDG_CONFIG_HOME/schemasync/config.toml` (platform config dir elsewhere).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schemasync_loader::HttpApi;
use schemasync_push::PushConfig;
use schemasync_rpc::CommandConfig;
use schemasync_schema::InstanceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The file exists but could not be read.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},
	/// The file is not valid TOML for [`ClientConfig`].
	#[error("invalid config {path}: {error}")]
	Parse {
		/// Path to the file.
		path: PathBuf,
		/// Decoder error.
		error: toml::de::Error,
	},
	/// A value is out of range.
	#[error("invalid value for {field}: {reason}")]
	Invalid {
		/// Offending field.
		field: &'static str,
		/// What is wrong with it.
		reason: String,
	},
}

/// Where fire-and-forget events are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTransport {
	/// `POST /ui/event`.
	#[default]
	Http,
	/// Event frames on the command socket.
	Command,
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// HTTP API base URL.
	pub http_base: String,
	/// Command socket URL.
	pub command_url: String,
	/// Push socket base URL; `/ui/ws/{instance}` is appended.
	pub push_url_base: String,
	/// Bound on one schema fetch.
	pub fetch_timeout_ms: u64,
	/// Freshness window of cached schemas.
	pub schema_ttl_secs: u64,
	/// Default per-command timeout.
	pub command_timeout_ms: u64,
	/// Delay between command socket reconnection attempts.
	pub command_reconnect_delay_ms: u64,
	/// Consecutive command socket reconnection attempts before giving up.
	pub command_max_reconnect_attempts: u32,
	/// Delay between push socket reconnection attempts.
	pub push_reconnect_delay_ms: u64,
	/// Field change debounce window.
	pub field_debounce_ms: u64,
	/// Request id namespace.
	pub request_id_prefix: String,
	/// Route for fire-and-forget events.
	pub event_transport: EventTransport,
	/// Instance to open when nothing was persisted.
	pub default_instance: Option<InstanceId>,
	/// Directory for persisted client state.
	pub state_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			http_base: "http://localhost:8000".to_string(),
			command_url: "ws://localhost:8765".to_string(),
			push_url_base: "ws://localhost:8000".to_string(),
			fetch_timeout_ms: 3_000,
			schema_ttl_secs: 300,
			command_timeout_ms: 10_000,
			command_reconnect_delay_ms: 3_000,
			command_max_reconnect_attempts: 5,
			push_reconnect_delay_ms: 3_000,
			field_debounce_ms: 750,
			request_id_prefix: "cmd".to_string(),
			event_transport: EventTransport::Http,
			default_instance: None,
			state_dir: None,
		}
	}
}

impl ClientConfig {
	/// Default config file location.
	pub fn default_path() -> Option<PathBuf> {
		if let Some(path) = std::env::var_os("SCHEMASYNC_CONFIG") {
			return Some(PathBuf::from(path));
		}
		dirs::config_dir().map(|dir| dir.join("schemasync").join("config.toml"))
	}

	/// Loads `path`, or defaults when it does not exist.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = match std::fs::read_to_string(path) {
			Ok(text) => text,
			Err(error) if error.kind() == ErrorKind::NotFound => {
				tracing::debug!(path = %path.display(), "config.missing");
				return Ok(Self::default());
			}
			Err(error) => {
				return Err(ConfigError::Io {
					path: path.to_path_buf(),
					error,
				});
			}
		};
		let config = Self::from_toml(&text).map_err(|err| match err {
			ConfigError::Parse { error, .. } => ConfigError::Parse {
				path: path.to_path_buf(),
				error,
			},
			other => other,
		})?;
		tracing::debug!(path = %path.display(), "config.loaded");
		Ok(config)
	}

	/// Loads from `path` if given, else from [`Self::default_path`].
	pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
		match path.map(Path::to_path_buf).or_else(Self::default_path) {
			Some(path) => Self::load(&path),
			None => Ok(Self::default()),
		}
	}

	/// Parses and validates TOML text.
	pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text).map_err(|error| ConfigError::Parse {
			path: PathBuf::new(),
			error,
		})?;
		config.validate()?;
		Ok(config)
	}

	/// Checks values that would make the client misbehave.
	pub fn validate(&self) -> Result<(), ConfigError> {
		for (field, url) in [("command_url", &self.command_url), ("push_url_base", &self.push_url_base)] {
			if !(url.starts_with("ws://") || url.starts_with("wss://")) {
				return Err(ConfigError::Invalid {
					field,
					reason: format!("{url:?} is not a ws:// or wss:// url"),
				});
			}
		}
		if HttpApi::parse_base(&self.http_base).is_err() {
			return Err(ConfigError::Invalid {
				field: "http_base",
				reason: format!("{:?} is not a valid base url", self.http_base),
			});
		}
		for (field, value) in [
			("fetch_timeout_ms", self.fetch_timeout_ms),
			("command_timeout_ms", self.command_timeout_ms),
			("schema_ttl_secs", self.schema_ttl_secs),
		] {
			if value == 0 {
				return Err(ConfigError::Invalid {
					field,
					reason: "must be greater than zero".to_string(),
				});
			}
		}
		Ok(())
	}

	/// Directory for persisted client state.
	///
	/// `state_dir` if set, else `SCHEMASYNC_STATE_DIR`, else the platform's local
	/// data directory.
	pub fn resolved_state_dir(&self) -> PathBuf {
		if let Some(dir) = &self.state_dir {
			return dir.clone();
		}
		if let Some(dir) = std::env::var_os("SCHEMASYNC_STATE_DIR") {
			return PathBuf::from(dir);
		}
		dirs::data_local_dir()
			.unwrap_or_else(std::env::temp_dir)
			.join("schemasync")
	}

	/// Fetch timeout.
	pub fn fetch_timeout(&self) -> Duration {
		Duration::from_millis(self.fetch_timeout_ms)
	}

	/// Schema cache TTL.
	pub fn schema_ttl(&self) -> Duration {
		Duration::from_secs(self.schema_ttl_secs)
	}

	/// Field change debounce window.
	pub fn field_debounce(&self) -> Duration {
		Duration::from_millis(self.field_debounce_ms)
	}

	/// Command channel settings.
	pub fn command_config(&self) -> CommandConfig {
		CommandConfig {
			url: self.command_url.clone(),
			request_timeout: Duration::from_millis(self.command_timeout_ms),
			reconnect_delay: Duration::from_millis(self.command_reconnect_delay_ms),
			max_reconnect_attempts: self.command_max_reconnect_attempts,
			id_prefix: self.request_id_prefix.clone(),
		}
	}

	/// Push channel settings.
	pub fn push_config(&self) -> PushConfig {
		PushConfig {
			url_base: self.push_url_base.clone(),
			reconnect_delay: Duration::from_millis(self.push_reconnect_delay_ms),
		}
	}
}
