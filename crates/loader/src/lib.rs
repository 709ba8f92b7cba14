//! Schema fetching.
//!
//! [`HttpApi`] talks to the backend's `/ui/*` endpoints. [`SchemaLoader`] sits in
//! front of any [`SchemaSource`] and adds a per-instance TTL cache, a fetch
//! timeout, and stale-cache fallback when the network fails.

mod api;
mod error;
mod loader;

use async_trait::async_trait;
use schemasync_schema::{InstanceId, Schema};

pub use api::{HttpApi, InstanceSummary};
pub use error::{LoaderError, Result};
pub use loader::{LoadOrigin, LoadedSchema, PreloadReport, SchemaLoader};

/// Something that can produce the current schema of an instance.
#[async_trait]
pub trait SchemaSource: Send + Sync + 'static {
	/// Fetches the schema of `instance`.
	async fn fetch_schema(&self, instance: &InstanceId) -> Result<Schema>;
}
