use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use schemasync_rpc::ConnectionStatus;
use schemasync_rpc::memory::{MemoryConnector, MemoryListener};
use schemasync_schema::{InstanceId, Schema};
use serde_json::json;
use tokio::sync::mpsc;

use crate::{PushChannel, PushConfig, PushHandler, PushedPatch, SwitchRequest};

const BASE: &str = "ws://test";

#[derive(Debug, PartialEq)]
enum Seen {
	Patch(PushedPatch),
	Switch(SwitchRequest),
}

struct Recorder(mpsc::UnboundedSender<Seen>);

impl PushHandler for Recorder {
	fn on_patch(&self, patch: PushedPatch) {
		let _ = self.0.send(Seen::Patch(patch));
	}

	fn on_switch_instance(&self, request: SwitchRequest) {
		let _ = self.0.send(Seen::Switch(request));
	}
}

fn channel() -> (PushChannel, Arc<MemoryConnector>, MemoryListener, mpsc::UnboundedReceiver<Seen>) {
	let (connector, listener) = MemoryConnector::new();
	let (tx, rx) = mpsc::unbounded_channel();
	let push = PushChannel::new(PushConfig::new(BASE), connector.clone(), Arc::new(Recorder(tx)));
	(push, connector, listener, rx)
}

fn id(s: &str) -> InstanceId {
	InstanceId::from(s)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn frames_reach_handler_in_order() {
	let (push, _connector, mut listener, mut seen) = channel();
	push.set_instance(id("a")).await;
	let peer = listener.accept().await.unwrap();
	assert_eq!(peer.url, "ws://test/ui/ws/a");

	peer.send_json(&json!({"type": "patch", "patch_id": 1, "patch": {"state.params.x": 1}}));
	peer.send("{broken");
	peer.send_json(&json!({"type": "patch", "instance_id": "other", "patch": {"state.params.x": 2}}));
	peer.send_json(&json!({"type": "switch_instance", "instance_id": "b", "schema": {"state": {}}}));

	let Seen::Patch(first) = seen.recv().await.unwrap() else {
		panic!("expected patch");
	};
	assert_eq!(first.instance_id, id("a"));
	assert_eq!(first.patch_id, Some(json!(1)));
	assert_eq!(first.patch.get("state.params.x"), Some(&json!(1)));

	let Seen::Patch(second) = seen.recv().await.unwrap() else {
		panic!("expected patch");
	};
	assert_eq!(second.socket_instance, id("a"));
	assert_eq!(second.instance_id, id("other"));

	let expected = SwitchRequest {
		instance_id: id("b"),
		schema: Some(Schema::from_value(json!({"state": {}})).unwrap()),
	};
	assert_eq!(seen.recv().await.unwrap(), Seen::Switch(expected));
	assert!(push.is_connected());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn switching_never_leaves_two_sockets() {
	let (push, _connector, mut listener, _seen) = channel();
	push.set_instance(id("a")).await;
	let a = listener.accept().await.unwrap();

	push.set_instance(id("b")).await;
	assert!(a.is_client_closed());
	let b = listener.accept().await.unwrap();
	assert_eq!(b.url, "ws://test/ui/ws/b");

	tokio::join!(push.set_instance(id("c")), push.set_instance(id("d")));
	assert!(b.is_client_closed());
	assert_eq!(push.instance(), Some(id("d")));

	let mut last = listener.accept().await.unwrap();
	while !last.url.ends_with("/d") {
		assert!(last.is_client_closed(), "{} left open", last.url);
		last = listener.accept().await.unwrap();
	}
	assert!(!last.is_client_closed());
	assert!(listener.try_accept().is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn same_instance_keeps_live_socket() {
	let (push, connector, mut listener, _seen) = channel();
	push.set_instance(id("a")).await;
	let a = listener.accept().await.unwrap();
	push.set_instance(id("a")).await;
	tokio::task::yield_now().await;
	assert!(!a.is_client_closed());
	assert_eq!(connector.attempts(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn reconnects_indefinitely_while_instance_is_desired() {
	let (push, connector, mut listener, _seen) = channel();
	push.set_instance(id("a")).await;
	let peer = listener.accept().await.unwrap();

	connector.set_refuse(true);
	peer.close();
	tokio::time::sleep(Duration::from_secs(3 * 10 + 1)).await;
	assert!(connector.attempts() > 10);
	assert_eq!(push.status(), ConnectionStatus::Disconnected);

	connector.set_refuse(false);
	let again = listener.accept().await.unwrap();
	assert_eq!(again.url, "ws://test/ui/ws/a");
	let mut status = push.subscribe_status();
	status.wait_for(|s| s.is_connected()).await.unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn superseded_instance_is_never_redialed() {
	let (push, connector, mut listener, _seen) = channel();
	push.set_instance(id("a")).await;
	let a = listener.accept().await.unwrap();
	push.set_instance(id("b")).await;
	let _b = listener.accept().await.unwrap();
	a.close();

	tokio::time::sleep(Duration::from_secs(30)).await;
	assert!(listener.try_accept().is_none());
	assert_eq!(connector.attempts(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn close_stops_everything() {
	let (push, connector, mut listener, _seen) = channel();
	push.set_instance(id("a")).await;
	let a = listener.accept().await.unwrap();

	push.close().await;
	assert!(a.is_client_closed());
	assert_eq!(push.instance(), None);
	assert_eq!(push.status(), ConnectionStatus::Disconnected);

	tokio::time::sleep(Duration::from_secs(30)).await;
	assert_eq!(connector.attempts(), 1);
}
