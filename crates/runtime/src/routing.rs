//! Pushed patch routing.
//!
//! A pushed patch names its instance and goes to the first of:
//!
//! 1. the instance whose schema is loading, buffered until that schema lands;
//! 2. the active instance in the store;
//! 3. a cached instance;
//!
//! and is dropped otherwise. Buffered patches are applied in arrival order to the
//! loaded schema before the store publishes it.

use std::sync::Arc;

use parking_lot::Mutex;
use schemasync_push::PushedPatch;
use schemasync_schema::{InstanceCache, InstanceId, Schema, SchemaStore};
use tracing::{debug, warn};

/// Where a pushed patch went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
	/// Held for the instance being loaded.
	Buffered,
	/// Applied to the active schema.
	Store,
	/// Applied to a cached schema.
	Cache,
	/// Rejected by the patch engine.
	Rejected,
	/// No holder for the instance.
	Dropped,
}

struct Loading {
	instance: InstanceId,
	buffered: Vec<PushedPatch>,
}

/// Sends pushed patches to the store, the instance cache or a load buffer.
pub struct PatchRouter {
	store: Arc<SchemaStore>,
	instances: Arc<InstanceCache>,
	loading: Mutex<Option<Loading>>,
}

impl std::fmt::Debug for PatchRouter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let loading = self.loading.lock();
		f.debug_struct("PatchRouter")
			.field("loading", &loading.as_ref().map(|l| &l.instance))
			.field("buffered", &loading.as_ref().map_or(0, |l| l.buffered.len()))
			.finish_non_exhaustive()
	}
}

impl PatchRouter {
	/// Router over `store` and `instances`.
	pub fn new(store: Arc<SchemaStore>, instances: Arc<InstanceCache>) -> Self {
		Self {
			store,
			instances,
			loading: Mutex::new(None),
		}
	}

	/// Active schema holder.
	pub fn store(&self) -> &Arc<SchemaStore> {
		&self.store
	}

	/// Other instances' schemas.
	pub fn instances(&self) -> &Arc<InstanceCache> {
		&self.instances
	}

	/// Instance whose patches are being buffered.
	pub fn loading(&self) -> Option<InstanceId> {
		self.loading.lock().as_ref().map(|l| l.instance.clone())
	}

	/// Routes one pushed patch.
	pub fn route(&self, pushed: PushedPatch) -> Routed {
		// Held across the store write so a finishing load cannot interleave.
		let mut loading = self.loading.lock();
		let target = pushed.instance_id.clone();
		if let Some(load) = loading.as_mut()
			&& load.instance == target
		{
			debug!(instance_id = %target, patch_id = ?pushed.patch_id, "push.patch_buffered");
			load.buffered.push(pushed);
			return Routed::Buffered;
		}

		let outcome = if self.store.instance_id().as_ref() == Some(&target) {
			self.store.apply_patch(&pushed.patch).map(|_| Routed::Store)
		} else if self.instances.contains(&target) {
			self.instances.apply_patch(&target, &pushed.patch).map(|_| Routed::Cache)
		} else {
			debug!(instance_id = %target, patch_id = ?pushed.patch_id, "push.patch_dropped");
			return Routed::Dropped;
		};
		drop(loading);

		match outcome {
			Ok(routed) => {
				debug!(instance_id = %target, patch_id = ?pushed.patch_id, ?routed, "push.patch_applied");
				routed
			}
			Err(err) => {
				warn!(instance_id = %target, patch_id = ?pushed.patch_id, error = %err, "push.patch_rejected");
				Routed::Rejected
			}
		}
	}

	/// Starts buffering patches for `instance`, replacing any earlier load.
	pub fn begin_load(&self, instance: InstanceId) {
		let previous = self.loading.lock().replace(Loading {
			instance,
			buffered: Vec::new(),
		});
		if let Some(previous) = previous
			&& !previous.buffered.is_empty()
		{
			debug!(
				instance_id = %previous.instance,
				dropped = previous.buffered.len(),
				"push.load_buffer_superseded"
			);
		}
	}

	/// Applies the patches buffered for `instance` to `schema` and makes it active.
	///
	/// Returns how many buffered patches were applied.
	pub fn finish_load(&self, instance: InstanceId, mut schema: Schema) -> usize {
		let mut loading = self.loading.lock();
		let buffered = match loading.take() {
			Some(load) if load.instance == instance => load.buffered,
			other => {
				*loading = other;
				Vec::new()
			}
		};

		let mut applied = 0;
		for pushed in &buffered {
			match schema.patched(&pushed.patch) {
				Ok(next) => {
					schema = next;
					applied += 1;
				}
				Err(err) => {
					warn!(instance_id = %instance, patch_id = ?pushed.patch_id, error = %err, "push.patch_rejected");
				}
			}
		}
		if applied > 0 {
			debug!(instance_id = %instance, applied, "push.load_buffer_applied");
		}
		self.store.load(instance, schema);
		applied
	}

	/// Stops buffering for `instance` after its load failed.
	pub fn abandon_load(&self, instance: &InstanceId) {
		let mut loading = self.loading.lock();
		if loading.as_ref().is_some_and(|load| load.instance == *instance)
			&& let Some(load) = loading.take()
			&& !load.buffered.is_empty()
		{
			debug!(instance_id = %instance, dropped = load.buffered.len(), "push.load_buffer_dropped");
		}
	}
}
