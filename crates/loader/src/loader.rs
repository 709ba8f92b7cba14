//! TTL-cached schema loading with stale fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use schemasync_schema::{InstanceCache, InstanceId, Schema};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::SchemaSource;
use crate::error::{LoaderError, Result};

/// Default freshness window of a cached schema.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default bound on one network fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Where a loaded schema came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
	/// Fetched just now.
	Network,
	/// Served from a cache entry still within the TTL.
	Cache,
	/// The fetch failed; served from an expired cache entry.
	Stale,
}

/// Result of [`SchemaLoader::load_schema`].
#[derive(Debug, Clone)]
pub struct LoadedSchema {
	/// The schema.
	pub schema: Arc<Schema>,
	/// Where it came from.
	pub origin: LoadOrigin,
}

impl LoadedSchema {
	/// True when the network fetch failed and cached data was served instead.
	pub fn cached(&self) -> bool {
		self.origin == LoadOrigin::Stale
	}
}

/// Outcome of [`SchemaLoader::preload_schemas`].
#[derive(Debug, Default)]
pub struct PreloadReport {
	/// Instances now present in the instance cache.
	pub loaded: Vec<InstanceId>,
	/// Instances that failed, with the reason.
	pub failed: Vec<(InstanceId, String)>,
}

#[derive(Debug)]
struct Entry {
	schema: Arc<Schema>,
	fetched_at: Instant,
}

/// Loads schemas through a [`SchemaSource`] with a TTL cache.
pub struct SchemaLoader {
	source: Arc<dyn SchemaSource>,
	ttl: Duration,
	fetch_timeout: Duration,
	entries: Mutex<HashMap<InstanceId, Entry>>,
}

impl std::fmt::Debug for SchemaLoader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SchemaLoader")
			.field("ttl", &self.ttl)
			.field("fetch_timeout", &self.fetch_timeout)
			.field("entries", &self.entries.lock().len())
			.finish()
	}
}

impl SchemaLoader {
	/// Creates a loader with the default TTL and fetch timeout.
	pub fn new(source: Arc<dyn SchemaSource>) -> Self {
		Self::with_timing(source, DEFAULT_TTL, DEFAULT_FETCH_TIMEOUT)
	}

	/// Creates a loader with explicit timing.
	pub fn with_timing(source: Arc<dyn SchemaSource>, ttl: Duration, fetch_timeout: Duration) -> Self {
		Self {
			source,
			ttl,
			fetch_timeout,
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// Loads the schema of `instance`.
	///
	/// A cache entry younger than the TTL is returned without a fetch. Otherwise the
	/// source is asked, bounded by the fetch timeout, and its schema validated. When that fails, any cache
	/// entry, however old, is returned as [`LoadOrigin::Stale`]; without one the
	/// error propagates.
	pub async fn load_schema(&self, instance: &InstanceId) -> Result<LoadedSchema> {
		if let Some(schema) = self.fresh(instance) {
			debug!(instance_id = %instance, "loader.cache_hit");
			return Ok(LoadedSchema {
				schema,
				origin: LoadOrigin::Cache,
			});
		}

		let fetched = match tokio::time::timeout(self.fetch_timeout, self.source.fetch_schema(instance)).await {
			Ok(result) => result,
			Err(_) => Err(LoaderError::Timeout {
				instance: instance.clone(),
				after: self.fetch_timeout,
			}),
		};

		let fetched = fetched.and_then(|schema| match schema.validate() {
			Ok(()) => Ok(schema),
			Err(source) => Err(LoaderError::InvalidSchema {
				instance: instance.clone(),
				source,
			}),
		});

		match fetched {
			Ok(schema) => {
				let schema = Arc::new(schema);
				self.entries.lock().insert(
					instance.clone(),
					Entry {
						schema: Arc::clone(&schema),
						fetched_at: Instant::now(),
					},
				);
				debug!(instance_id = %instance, "loader.fetched");
				Ok(LoadedSchema {
					schema,
					origin: LoadOrigin::Network,
				})
			}
			Err(err) => {
				let stale = self.entries.lock().get(instance).map(|entry| Arc::clone(&entry.schema));
				match stale {
					Some(schema) => {
						warn!(instance_id = %instance, error = %err, "loader.stale_fallback");
						Ok(LoadedSchema {
							schema,
							origin: LoadOrigin::Stale,
						})
					}
					None => {
						warn!(instance_id = %instance, error = %err, "loader.fetch_failed");
						Err(err)
					}
				}
			}
		}
	}

	/// Loads every instance concurrently into `cache`.
	///
	/// Individual failures are logged and reported, never returned as an error.
	pub async fn preload_schemas(&self, instances: &[InstanceId], cache: &InstanceCache) -> PreloadReport {
		let results = join_all(instances.iter().map(|id| async move { (id, self.load_schema(id).await) })).await;
		let mut report = PreloadReport::default();
		for (id, result) in results {
			match result {
				Ok(loaded) => {
					cache.set(id.clone(), loaded.schema);
					report.loaded.push(id.clone());
				}
				Err(err) => {
					warn!(instance_id = %id, error = %err, "loader.preload_failed");
					report.failed.push((id.clone(), err.to_string()));
				}
			}
		}
		report
	}

	/// Evicts one instance, or every instance when `instance` is `None`.
	pub fn clear_schema_cache(&self, instance: Option<&InstanceId>) {
		let mut entries = self.entries.lock();
		match instance {
			Some(id) => {
				entries.remove(id);
			}
			None => entries.clear(),
		}
	}

	/// Returns true when a cache entry exists for `instance`, fresh or not.
	pub fn is_cached(&self, instance: &InstanceId) -> bool {
		self.entries.lock().contains_key(instance)
	}

	fn fresh(&self, instance: &InstanceId) -> Option<Arc<Schema>> {
		let entries = self.entries.lock();
		let entry = entries.get(instance)?;
		(entry.fetched_at.elapsed() < self.ttl).then(|| Arc::clone(&entry.schema))
	}
}

#[cfg(test)]
mod tests;
