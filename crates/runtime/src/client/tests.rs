use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use schemasync_rpc::memory::{MemoryConnector, MemoryListener, MemoryPeer};
use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::lifecycle::InstanceStatus;
use crate::pipeline::UiEvent;
use crate::state::MemoryStateStore;
use crate::testing::{Backend, SentEvent, accept_url, patch, schema};

struct Fixture {
	client: SyncClient,
	backend: Arc<Backend>,
	sent: mpsc::UnboundedReceiver<SentEvent>,
	server: MemoryListener,
	parked: Vec<MemoryPeer>,
	state: Arc<MemoryStateStore>,
}

fn fixture(state: MemoryStateStore, config: ClientConfig, http_events: bool) -> Fixture {
	let (backend, sent) = Backend::new();
	for (id, page) in [("a", "page-a"), ("b", "page-b"), ("z", "page-z")] {
		backend.serve(id, schema(page, json!({})));
	}
	let (connector, server) = MemoryConnector::new();
	let state = Arc::new(state);
	let events: Option<Arc<dyn EventSink>> = http_events.then(|| backend.clone() as Arc<dyn EventSink>);
	let client = SyncClient::from_parts(ClientParts {
		config,
		source: backend.clone(),
		events,
		history: backend.clone(),
		connector,
		state: state.clone(),
	});
	Fixture {
		client,
		backend,
		sent,
		server,
		parked: Vec::new(),
		state,
	}
}

impl Fixture {
	async fn socket(&mut self, suffix: &str) -> MemoryPeer {
		accept_url(&mut self.server, &mut self.parked, suffix).await
	}
}

fn id(s: &str) -> InstanceId {
	InstanceId::from(s)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn start_prefers_explicit_then_persisted_then_default() {
	let config = ClientConfig {
		default_instance: Some(id("a")),
		..ClientConfig::default()
	};

	let f = fixture(MemoryStateStore::with_current("b"), config.clone(), true);
	assert_eq!(f.client.start(Some(id("z"))).await.unwrap(), Some(id("z")));
	assert_eq!(f.state.load_current().unwrap(), Some(id("z")));

	let f = fixture(MemoryStateStore::with_current("b"), config.clone(), true);
	assert_eq!(f.client.start(None).await.unwrap(), Some(id("b")));
	assert!(f.client.commands().is_connected());

	let f = fixture(MemoryStateStore::default(), config, true);
	assert_eq!(f.client.start(None).await.unwrap(), Some(id("a")));
	assert_eq!(f.client.store().page_key().as_deref(), Some("page-a"));

	let f = fixture(MemoryStateStore::default(), ClientConfig::default(), true);
	assert_eq!(f.client.start(None).await.unwrap(), None);
	assert_eq!(f.client.pipeline().status(), InstanceStatus::Idle);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn pushed_patches_route_by_instance() {
	let mut f = fixture(MemoryStateStore::with_current("a"), ClientConfig::default(), true);
	f.client.start(None).await.unwrap();
	let report = f.client.preload(&[id("z")]).await;
	assert_eq!(report.loaded, vec![id("z")]);

	let push = f.socket("/ui/ws/a").await;
	let mut schema_rx = f.client.store().watch();
	schema_rx.borrow_and_update();

	push.send_json(&json!({"type": "patch", "patch_id": 1, "patch": {"state.params.x": 1}}));
	schema_rx.changed().await.unwrap();
	assert_eq!(f.client.store().get("state.params.x"), Some(json!(1)));

	push.send_json(&json!({"type": "patch", "instance_id": "z", "patch": {"state.params.y": 2}}));
	push.send_json(&json!({"type": "patch", "instance_id": "nobody", "patch": {"state.params.y": 3}}));
	push.send_json(&json!({"type": "patch", "patch": {"state.params.x": 4}}));
	schema_rx.changed().await.unwrap();

	assert_eq!(f.client.store().get("state.params.x"), Some(json!(4)));
	assert_eq!(f.client.store().get("state.params.y"), None);
	let cached = f.client.instances().get(&id("z")).unwrap();
	assert_eq!(cached.get("state.params.y"), Some(&json!(2)));
	assert!(!f.client.instances().contains(&id("nobody")));
	assert_eq!(f.client.store().patch_log().len(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn pushed_switch_repoints_everything() {
	let mut f = fixture(MemoryStateStore::with_current("a"), ClientConfig::default(), true);
	f.client.start(None).await.unwrap();
	let old = f.socket("/ui/ws/a").await;
	let fetches = f.backend.fetches();

	let mut status = f.client.pipeline().watch_status();
	old.send_json(&json!({
		"type": "switch_instance",
		"instance_id": "c",
		"schema": {"meta": {"pageKey": "page-c"}, "state": {"params": {}}},
	}));
	status
		.wait_for(|s| *s == InstanceStatus::Ready { instance: id("c"), stale: false })
		.await
		.unwrap();

	assert_eq!(f.backend.fetches(), fetches);
	assert_eq!(f.client.store().page_key().as_deref(), Some("page-c"));
	assert_eq!(f.state.load_current().unwrap(), Some(id("c")));
	assert!(old.is_client_closed());
	let new = f.socket("/ui/ws/c").await;
	assert!(!new.is_client_closed());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn replay_and_history_use_the_active_instance() {
	let f = fixture(MemoryStateStore::default(), ClientConfig::default(), true);
	assert!(matches!(f.client.replay_patch(1).await, Err(PipelineError::NoActiveInstance)));

	f.client.start(Some(id("a"))).await.unwrap();
	f.backend.replayable(7, patch(json!({"state.params.restored": true})));

	let replayed = f.client.replay_patch(7).await.unwrap();
	assert_eq!(replayed.len(), 1);
	assert_eq!(f.client.store().get("state.params.restored"), Some(json!(true)));

	let history = f.client.patch_history().await.unwrap();
	assert_eq!(history.iter().map(|r| r.id).collect::<Vec<_>>(), vec![7]);
	assert!(matches!(
		f.client.replay_patch(8).await,
		Err(PipelineError::Load(LoaderError::Api(_)))
	));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn command_transport_carries_field_events() {
	let mut f = fixture(MemoryStateStore::default(), ClientConfig::default(), false);
	f.client.start(Some(id("a"))).await.unwrap();
	let mut rpc = f.socket(":8765").await;

	f.client
		.pipeline()
		.dispatch(UiEvent::FieldChange {
			field_key: "name".to_string(),
			value: json!("v"),
			bind_path: None,
		})
		.await
		.unwrap();

	let frame = rpc.recv_json().await.unwrap();
	assert_eq!(
		frame,
		json!({
			"type": "field:change",
			"payload": {"instanceId": "a", "fieldKey": "name", "value": "v", "bindPath": null},
			"pageKey": "page-a",
		})
	);
	assert!(f.sent.try_recv().is_err());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn shutdown_flushes_fields_and_closes_sockets() {
	let mut f = fixture(MemoryStateStore::default(), ClientConfig::default(), true);
	f.client.start(Some(id("a"))).await.unwrap();
	let rpc = f.socket(":8765").await;
	let push = f.socket("/ui/ws/a").await;

	f.client
		.pipeline()
		.field_change("name".to_string(), json!("last"), None)
		.unwrap();
	f.client.shutdown().await;

	let flushed = f.sent.recv().await.unwrap();
	assert_eq!(flushed.payload["value"], json!("last"));
	assert!(push.is_client_closed());
	assert!(!f.client.commands().is_connected());
	drop(rpc);

	tokio::time::sleep(Duration::from_secs(30)).await;
	assert!(f.server.try_accept().is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn shutdown_waits_for_slow_field_delivery() {
	let mut f = fixture(MemoryStateStore::default(), ClientConfig::default(), true);
	f.client.start(Some(id("a"))).await.unwrap();
	f.backend.event_delay(Duration::from_millis(300));

	f.client
		.pipeline()
		.field_change("name".to_string(), json!("typed"), None)
		.unwrap();
	let started = tokio::time::Instant::now();
	f.client.shutdown().await;
	assert!(started.elapsed() >= Duration::from_millis(300));
	assert_eq!(f.sent.try_recv().unwrap().payload["value"], json!("typed"));

	f.client
		.pipeline()
		.field_change("name".to_string(), json!("late"), None)
		.unwrap();
	tokio::time::sleep(Duration::from_secs(5)).await;
	assert!(f.sent.try_recv().is_err());
}
