//! Side map of instance schemas used for embedding and pre-warming.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{InstanceId, Schema};
use crate::{Patch, Result};

/// `InstanceId -> Schema` map with no expiry of its own.
///
/// Freshness belongs to the schema loader; this map only serves whatever was last written.
#[derive(Debug, Default)]
pub struct InstanceCache {
	entries: RwLock<HashMap<InstanceId, Arc<Schema>>>,
}

impl InstanceCache {
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores `schema` for `id`, replacing any previous entry.
	pub fn set(&self, id: InstanceId, schema: Arc<Schema>) {
		self.entries.write().insert(id, schema);
	}

	/// Cached schema for `id`.
	pub fn get(&self, id: &InstanceId) -> Option<Arc<Schema>> {
		self.entries.read().get(id).cloned()
	}

	/// Evicts `id`, returning the evicted schema.
	pub fn remove(&self, id: &InstanceId) -> Option<Arc<Schema>> {
		self.entries.write().remove(id)
	}

	/// Evicts everything.
	pub fn clear(&self) {
		self.entries.write().clear();
	}

	/// Returns true when `id` is cached.
	pub fn contains(&self, id: &InstanceId) -> bool {
		self.entries.read().contains_key(id)
	}

	/// Number of cached instances.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns true when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Cached instance ids, sorted.
	pub fn ids(&self) -> Vec<InstanceId> {
		let mut ids: Vec<_> = self.entries.read().keys().cloned().collect();
		ids.sort();
		ids
	}

	/// Patches the cached schema for `id` in place of the old entry.
	///
	/// Returns `Ok(false)` when `id` is not cached.
	///
	/// # Errors
	///
	/// Propagates patch engine failures; the entry is left unchanged.
	pub fn apply_patch(&self, id: &InstanceId, patch: &Patch) -> Result<bool> {
		let mut entries = self.entries.write();
		let Some(current) = entries.get(id) else {
			return Ok(false);
		};
		let next = current.patched(patch)?;
		entries.insert(id.clone(), Arc::new(next));
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn schema(v: serde_json::Value) -> Arc<Schema> {
		Arc::new(Schema::from_value(v).unwrap())
	}

	#[test]
	fn set_get_remove_clear() {
		let cache = InstanceCache::new();
		let a = InstanceId::from("a");
		assert!(cache.get(&a).is_none());
		cache.set(a.clone(), schema(json!({"v": 1})));
		cache.set(InstanceId::from("b"), schema(json!({"v": 2})));
		assert_eq!(cache.get(&a).unwrap().get("v"), Some(&json!(1)));
		assert_eq!(cache.ids(), vec![InstanceId::from("a"), InstanceId::from("b")]);
		assert!(cache.remove(&a).is_some());
		assert!(!cache.contains(&a));
		cache.clear();
		assert!(cache.is_empty());
	}

	#[test]
	fn apply_patch_replaces_entry() {
		let cache = InstanceCache::new();
		let a = InstanceId::from("a");
		let before = schema(json!({"state": {"params": {}}}));
		cache.set(a.clone(), before.clone());
		let patch = json!({"state.params.x": 1}).as_object().cloned().unwrap();
		assert!(cache.apply_patch(&a, &patch).unwrap());
		let after = cache.get(&a).unwrap();
		assert!(!Arc::ptr_eq(&before, &after));
		assert_eq!(after.get("state.params.x"), Some(&json!(1)));
		assert!(!cache.apply_patch(&InstanceId::from("zz"), &patch).unwrap());
	}
}
