//! The single authoritative holder of the active instance's schema.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::log::PatchLog;
use crate::model::{InstanceId, PatchRecord, Schema};
use crate::{Patch, Result};

/// Handle returned by [`SchemaStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(Option<&Arc<Schema>>) + Send + Sync>;

#[derive(Default)]
struct StoreState {
	schema: Option<Arc<Schema>>,
	instance: Option<InstanceId>,
	log: PatchLog,
}

/// Authoritative in-memory schema holder.
///
/// Every successful write installs a freshly allocated `Arc<Schema>`, so consumers can
/// detect change with [`Arc::ptr_eq`]. Writers never observe each other half-way: the
/// state lock is held only for the swap, never across listener calls.
pub struct SchemaStore {
	state: Mutex<StoreState>,
	listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
	next_listener: AtomicU64,
	tx: watch::Sender<Option<Arc<Schema>>>,
}

impl fmt::Debug for SchemaStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.lock();
		f.debug_struct("SchemaStore")
			.field("instance", &state.instance)
			.field("has_schema", &state.schema.is_some())
			.field("patches", &state.log.len())
			.finish_non_exhaustive()
	}
}

impl Default for SchemaStore {
	fn default() -> Self {
		Self::new()
	}
}

impl SchemaStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		let (tx, _) = watch::channel(None);
		Self {
			state: Mutex::new(StoreState::default()),
			listeners: Mutex::new(Vec::new()),
			next_listener: AtomicU64::new(1),
			tx,
		}
	}

	/// Replaces the held schema, keeping the current instance identity.
	///
	/// Taking `schema` by value means the store never aliases caller-owned data.
	pub fn set_schema(&self, schema: Schema) {
		let next = Arc::new(schema);
		self.commit(|state| state.schema = Some(next.clone()));
		self.notify(Some(&next));
	}

	/// Installs `schema` as the active schema of `instance` and clears the patch log.
	pub fn load(&self, instance: InstanceId, schema: Schema) {
		let next = Arc::new(schema);
		self.commit(|state| {
			state.instance = Some(instance);
			state.schema = Some(next.clone());
			state.log.clear();
		});
		self.notify(Some(&next));
	}

	/// Applies `patch` to the held schema.
	///
	/// Returns `Ok(false)` without notifying anyone when no schema is held.
	///
	/// # Errors
	///
	/// Propagates patch engine failures; the held schema is unchanged and nobody is
	/// notified.
	pub fn apply_patch(&self, patch: &Patch) -> Result<bool> {
		let next = {
			let mut state = self.state.lock();
			let Some(current) = state.schema.as_ref() else {
				tracing::debug!("store.patch_without_schema");
				return Ok(false);
			};
			let next = Arc::new(current.patched(patch)?);
			state.schema = Some(next.clone());
			let id = state.log.record(patch.clone());
			self.tx.send_replace(Some(next.clone()));
			tracing::trace!(patch_id = id, keys = patch.len(), "store.patch_applied");
			next
		};
		self.notify(Some(&next));
		Ok(true)
	}

	/// Clears schema, instance identity, and patch log.
	pub fn reset(&self) {
		self.commit(|state| {
			state.schema = None;
			state.instance = None;
			state.log.clear();
		});
		self.notify(None);
	}

	fn commit(&self, f: impl FnOnce(&mut StoreState)) {
		let mut state = self.state.lock();
		f(&mut state);
		self.tx.send_replace(state.schema.clone());
	}

	fn notify(&self, schema: Option<&Arc<Schema>>) {
		let listeners: Vec<Listener> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
		for listener in listeners {
			listener(schema);
		}
	}

	/// The held schema.
	pub fn schema(&self) -> Option<Arc<Schema>> {
		self.state.lock().schema.clone()
	}

	/// Identity of the active instance.
	pub fn instance_id(&self) -> Option<InstanceId> {
		self.state.lock().instance.clone()
	}

	/// Value at `path` in the held schema.
	pub fn get(&self, path: &str) -> Option<Value> {
		self.schema()?.get(path).cloned()
	}

	/// Field-level selector: value of `field_key` under `bind_path`.
	///
	/// An empty `bind_path` resolves `field_key` from the document root.
	pub fn select_field(&self, bind_path: &str, field_key: &str) -> Option<Value> {
		if bind_path.is_empty() {
			self.get(field_key)
		} else {
			self.get(&format!("{bind_path}.{field_key}"))
		}
	}

	/// Snapshot of `state.params`; empty without a schema.
	pub fn params(&self) -> Map<String, Value> {
		self.schema().map(|s| s.params()).unwrap_or_default()
	}

	/// `meta.pageKey` of the held schema.
	pub fn page_key(&self) -> Option<String> {
		self.schema()?.page_key().map(str::to_string)
	}

	/// Patches applied since the last load or reset, oldest first.
	pub fn patch_log(&self) -> Vec<PatchRecord> {
		self.state.lock().log.records()
	}

	/// Registers a listener called once per successful write with the new reference
	/// (`None` after [`Self::reset`]).
	///
	/// Listeners run on the writer's task after the write is visible; they may read the
	/// store but must not block.
	pub fn subscribe(&self, listener: impl Fn(Option<&Arc<Schema>>) + Send + Sync + 'static) -> SubscriptionId {
		let id = SubscriptionId(self.next_listener.fetch_add(1, Ordering::Relaxed));
		self.listeners.lock().push((id, Arc::new(listener)));
		id
	}

	/// Removes a listener. Returns false if it was not registered.
	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut listeners = self.listeners.lock();
		let before = listeners.len();
		listeners.retain(|(lid, _)| *lid != id);
		listeners.len() != before
	}

	/// Async view of the latest schema; intermediate writes may be coalesced.
	pub fn watch(&self) -> watch::Receiver<Option<Arc<Schema>>> {
		self.tx.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	fn schema(v: Value) -> Schema {
		Schema::from_value(v).unwrap()
	}

	fn patch(v: Value) -> Patch {
		v.as_object().cloned().unwrap()
	}

	#[test]
	fn every_write_yields_new_reference() {
		let store = SchemaStore::new();
		store.load(InstanceId::from("a"), schema(json!({"state": {"params": {}}})));
		let first = store.schema().unwrap();
		assert!(store.apply_patch(&Patch::new()).unwrap());
		let second = store.schema().unwrap();
		assert!(!Arc::ptr_eq(&first, &second));
		assert_eq!(first, second);

		store.set_schema((*second).clone());
		assert!(!Arc::ptr_eq(&second, &store.schema().unwrap()));
	}

	#[test]
	fn patch_without_schema_is_noop() {
		let store = SchemaStore::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let c = calls.clone();
		store.subscribe(move |_| {
			c.fetch_add(1, Ordering::SeqCst);
		});
		assert!(!store.apply_patch(&patch(json!({"a": 1}))).unwrap());
		assert!(store.schema().is_none());
		assert_eq!(calls.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn listeners_fire_once_per_write() {
		let store = Arc::new(SchemaStore::new());
		let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::default();
		let s = seen.clone();
		let reader = store.clone();
		let id = store.subscribe(move |schema| {
			// Listener sees the committed value and may re-enter the store.
			assert_eq!(schema.cloned(), reader.schema());
			s.lock().push(schema.and_then(|s| s.get("state.params.x").cloned()));
		});

		store.load(InstanceId::from("a"), schema(json!({"state": {"params": {"x": 0}}})));
		store.apply_patch(&patch(json!({"state.params.x": 1}))).unwrap();
		store.apply_patch(&patch(json!({"state.params.x": 2}))).unwrap();
		store.reset();
		assert_eq!(*seen.lock(), vec![Some(json!(0)), Some(json!(1)), Some(json!(2)), None]);

		assert!(store.unsubscribe(id));
		assert!(!store.unsubscribe(id));
		store.set_schema(Schema::empty());
		assert_eq!(seen.lock().len(), 4);
	}

	#[test]
	fn failed_patch_keeps_previous_schema() {
		let store = SchemaStore::new();
		store.load(InstanceId::from("a"), schema(json!({"blocks": []})));
		let before = store.schema().unwrap();
		assert!(store.apply_patch(&patch(json!({"blocks.0.id": "x"}))).is_err());
		assert!(Arc::ptr_eq(&before, &store.schema().unwrap()));
		assert!(store.patch_log().is_empty());
	}

	#[test]
	fn selectors_and_log() {
		let store = SchemaStore::new();
		store.load(
			InstanceId::from("a"),
			schema(json!({"meta": {"pageKey": "p1"}, "state": {"params": {"name": "n"}}})),
		);
		store.apply_patch(&patch(json!({"state.params.age": 3}))).unwrap();
		assert_eq!(store.select_field("state.params", "age"), Some(json!(3)));
		assert_eq!(store.select_field("", "meta"), Some(json!({"pageKey": "p1"})));
		assert_eq!(store.params().get("name"), Some(&json!("n")));
		assert_eq!(store.page_key().as_deref(), Some("p1"));
		assert_eq!(store.instance_id(), Some(InstanceId::from("a")));
		let log = store.patch_log();
		assert_eq!(log.len(), 1);
		assert_eq!(log[0].patch, patch(json!({"state.params.age": 3})));

		store.reset();
		assert!(store.instance_id().is_none());
		assert!(store.patch_log().is_empty());
	}

	#[tokio::test(flavor = "current_thread")]
	async fn watch_observes_latest() {
		let store = SchemaStore::new();
		let mut rx = store.watch();
		store.load(InstanceId::from("a"), schema(json!({"v": 1})));
		rx.changed().await.unwrap();
		assert_eq!(rx.borrow_and_update().as_ref().unwrap().get("v"), Some(&json!(1)));
	}
}
