//! Scripted backend shared by the runtime tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use schemasync_loader::{LoaderError, SchemaSource};
use schemasync_rpc::memory::{MemoryListener, MemoryPeer};
use schemasync_schema::{InstanceId, Patch, PatchRecord, Schema};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::client::PatchHistory;
use crate::sink::EventSink;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentEvent {
	pub kind: String,
	pub payload: Value,
	pub page_key: Option<String>,
}

pub(crate) struct Backend {
	schemas: Mutex<HashMap<InstanceId, Schema>>,
	delays: Mutex<HashMap<InstanceId, Duration>>,
	replays: Mutex<HashMap<u64, Patch>>,
	event_delay: Mutex<Option<Duration>>,
	fetches: AtomicUsize,
	events: mpsc::UnboundedSender<SentEvent>,
}

impl Backend {
	pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SentEvent>) {
		let (events, rx) = mpsc::unbounded_channel();
		let backend = Arc::new(Self {
			schemas: Mutex::new(HashMap::new()),
			delays: Mutex::new(HashMap::new()),
			replays: Mutex::new(HashMap::new()),
			event_delay: Mutex::new(None),
			fetches: AtomicUsize::new(0),
			events,
		});
		(backend, rx)
	}

	pub fn serve(&self, id: &str, schema: Schema) {
		self.schemas.lock().insert(InstanceId::from(id), schema);
	}

	pub fn delay(&self, id: &str, delay: Duration) {
		self.delays.lock().insert(InstanceId::from(id), delay);
	}

	pub fn event_delay(&self, delay: Duration) {
		*self.event_delay.lock() = Some(delay);
	}

	pub fn replayable(&self, patch_id: u64, patch: Patch) {
		self.replays.lock().insert(patch_id, patch);
	}

	pub fn fetches(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl SchemaSource for Backend {
	async fn fetch_schema(&self, instance: &InstanceId) -> Result<Schema, LoaderError> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		let delay = self.delays.lock().get(instance).copied();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		self.schemas
			.lock()
			.get(instance)
			.cloned()
			.ok_or_else(|| LoaderError::NotFound(instance.clone()))
	}
}

#[async_trait]
impl EventSink for Backend {
	async fn send_event(&self, kind: &str, payload: Value, page_key: Option<String>) -> crate::Result<()> {
		let delay = *self.event_delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let _ = self.events.send(SentEvent {
			kind: kind.to_string(),
			payload,
			page_key,
		});
		Ok(())
	}
}

#[async_trait]
impl PatchHistory for Backend {
	async fn list_patches(&self, _instance: &InstanceId) -> Result<Vec<PatchRecord>, LoaderError> {
		let mut replays: Vec<_> = self.replays.lock().iter().map(|(id, patch)| (*id, patch.clone())).collect();
		replays.sort_by_key(|(id, _)| *id);
		Ok(replays
			.into_iter()
			.map(|(id, patch)| PatchRecord {
				id,
				timestamp: "2024-01-01T00:00:00.000Z".to_string(),
				patch,
			})
			.collect())
	}

	async fn replay_patch(&self, _instance: &InstanceId, patch_id: u64) -> Result<Patch, LoaderError> {
		self.replays
			.lock()
			.get(&patch_id)
			.cloned()
			.ok_or_else(|| LoaderError::Api(format!("unknown patch {patch_id}")))
	}
}

pub(crate) fn schema(page: &str, params: Value) -> Schema {
	Schema::from_value(json!({
		"meta": {"pageKey": page},
		"state": {"params": params, "runtime": {}},
		"blocks": [],
		"actions": [],
	}))
	.unwrap()
}

pub(crate) fn patch(value: Value) -> Patch {
	match value {
		Value::Object(map) => map,
		other => panic!("patch must be an object, got {other}"),
	}
}

/// Accepts connections until one matches `suffix`, keeping the rest in `parked`.
pub(crate) async fn accept_url(listener: &mut MemoryListener, parked: &mut Vec<MemoryPeer>, suffix: &str) -> MemoryPeer {
	if let Some(index) = parked.iter().position(|peer| peer.url.ends_with(suffix)) {
		return parked.remove(index);
	}
	loop {
		let peer = listener.accept().await.unwrap();
		if peer.url.ends_with(suffix) {
			return peer;
		}
		parked.push(peer);
	}
}
