use std::time::Duration;

use schemasync_schema::{InstanceId, SchemaError};

/// Errors raised while fetching from the backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoaderError {
	/// The fetch did not finish in time.
	#[error("fetching schema for {instance} timed out after {}ms", after.as_millis())]
	Timeout {
		/// Instance being fetched.
		instance: InstanceId,
		/// Timeout that elapsed.
		after: Duration,
	},
	/// Request could not be sent or its body not read.
	#[error("http request failed: {0}")]
	Http(#[from] reqwest::Error),
	/// Non-2xx HTTP status.
	#[error("http status {status}: {body}")]
	Status {
		/// Status code.
		status: u16,
		/// Response body text.
		body: String,
	},
	/// The envelope `status` was not a success.
	#[error("api error: {0}")]
	Api(String),
	/// The body did not have the expected shape.
	#[error("invalid response: {0}")]
	Decode(String),
	/// The schema violates a document invariant such as unique block ids.
	#[error("invalid schema for instance {instance}: {source}")]
	InvalidSchema {
		/// Instance the schema belongs to.
		instance: InstanceId,
		/// Violated invariant.
		source: SchemaError,
	},
	/// The response carried no schema.
	#[error("no schema for instance {0}")]
	NotFound(InstanceId),
	/// The configured base URL is unusable.
	#[error("invalid base url {url:?}: {reason}")]
	InvalidBase {
		/// Configured URL.
		url: String,
		/// Parse failure.
		reason: String,
	},
}

/// Result alias for loader operations.
pub type Result<T, E = LoaderError> = std::result::Result<T, E>;
