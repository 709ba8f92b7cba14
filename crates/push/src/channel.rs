use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use schemasync_rpc::{Connection, ConnectionStatus, Connector};
use schemasync_schema::InstanceId;
use schemasync_worker::{GenerationClock, GenerationToken, TaskClass};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::message::{PushHandler, PushMessage, PushedPatch, SwitchRequest};

/// Push channel settings.
#[derive(Debug, Clone)]
pub struct PushConfig {
	/// Base URL, e.g. `ws://localhost:8000`.
	pub url_base: String,
	/// Delay before each reconnection attempt.
	pub reconnect_delay: Duration,
}

impl PushConfig {
	/// Settings for `url_base` with the default delay.
	pub fn new(url_base: impl Into<String>) -> Self {
		Self {
			url_base: url_base.into(),
			reconnect_delay: Duration::from_secs(3),
		}
	}
}

/// Socket URL for `instance` under `base`.
pub fn push_url(base: &str, instance: &InstanceId) -> String {
	format!("{}/ui/ws/{}", base.trim_end_matches('/'), instance)
}

struct Supervisor {
	instance: InstanceId,
	token: GenerationToken,
	task: JoinHandle<()>,
}

struct Inner {
	config: PushConfig,
	connector: Arc<dyn Connector>,
	handler: Arc<dyn PushHandler>,
	status: watch::Sender<ConnectionStatus>,
	desired: parking_lot::Mutex<Option<InstanceId>>,
	generations: GenerationClock,
}

/// Push socket that follows the desired instance.
///
/// Cloning shares the socket.
#[derive(Clone)]
pub struct PushChannel {
	inner: Arc<Inner>,
	// Serializes switches so joining the old supervisor and starting the new one
	// is one step.
	slot: Arc<tokio::sync::Mutex<Option<Supervisor>>>,
}

impl std::fmt::Debug for PushChannel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PushChannel")
			.field("url_base", &self.inner.config.url_base)
			.field("instance", &self.instance())
			.field("status", &self.status())
			.finish()
	}
}

impl PushChannel {
	/// Creates an idle channel.
	pub fn new(config: PushConfig, connector: Arc<dyn Connector>, handler: Arc<dyn PushHandler>) -> Self {
		Self {
			inner: Arc::new(Inner {
				config,
				connector,
				handler,
				status: watch::Sender::new(ConnectionStatus::Disconnected),
				desired: parking_lot::Mutex::new(None),
				generations: GenerationClock::new(),
			}),
			slot: Arc::new(tokio::sync::Mutex::new(None)),
		}
	}

	/// Points the channel at `instance`.
	///
	/// The previous socket is closed and its supervisor joined before the new
	/// socket dials. Re-pointing at the current instance keeps the live socket.
	pub async fn set_instance(&self, instance: InstanceId) {
		let mut slot = self.slot.lock().await;
		if slot
			.as_ref()
			.is_some_and(|current| current.instance == instance && !current.task.is_finished())
		{
			return;
		}

		*self.inner.desired.lock() = Some(instance.clone());
		if let Some(previous) = slot.take() {
			stop(previous).await;
		}

		let token = GenerationToken::new(self.inner.generations.next());
		info!(instance_id = %instance, generation = token.generation(), "push.switch");
		let task = schemasync_worker::spawn(
			TaskClass::Background,
			supervise(Arc::clone(&self.inner), instance.clone(), token.clone()),
		);
		*slot = Some(Supervisor { instance, token, task });
	}

	/// Closes the socket and forgets the desired instance.
	pub async fn close(&self) {
		let mut slot = self.slot.lock().await;
		*self.inner.desired.lock() = None;
		if let Some(previous) = slot.take() {
			stop(previous).await;
		}
		self.inner.status.send_replace(ConnectionStatus::Disconnected);
	}

	/// Instance the channel is following.
	pub fn instance(&self) -> Option<InstanceId> {
		self.inner.desired.lock().clone()
	}

	/// Current socket status.
	pub fn status(&self) -> ConnectionStatus {
		*self.inner.status.borrow()
	}

	/// Returns true while a socket is open.
	pub fn is_connected(&self) -> bool {
		self.status().is_connected()
	}

	/// Subscribes to status changes.
	pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
		self.inner.status.subscribe()
	}
}

async fn stop(supervisor: Supervisor) {
	supervisor.token.cancel();
	if let Err(err) = supervisor.task.await {
		warn!(instance_id = %supervisor.instance, error = %err, "push.supervisor_panicked");
	}
	debug!(instance_id = %supervisor.instance, "push.stopped");
}

async fn supervise(inner: Arc<Inner>, instance: InstanceId, token: GenerationToken) {
	let url = push_url(&inner.config.url_base, &instance);
	loop {
		inner.status.send_replace(ConnectionStatus::Connecting);
		let connected = tokio::select! {
			result = inner.connector.connect(&url) => result,
			_ = token.cancelled() => break,
		};
		match connected {
			Ok(connection) => {
				inner.status.send_replace(ConnectionStatus::Connected);
				info!(instance_id = %instance, %url, "push.connected");
				pump(&inner, &instance, connection, &token).await;
				info!(instance_id = %instance, "push.closed");
			}
			Err(err) => warn!(instance_id = %instance, error = %err, "push.connect_failed"),
		}

		if token.is_cancelled() {
			break;
		}
		inner.status.send_replace(ConnectionStatus::Disconnected);
		debug!(
			instance_id = %instance,
			delay_ms = inner.config.reconnect_delay.as_millis() as u64,
			"push.reconnect_scheduled"
		);
		tokio::select! {
			_ = tokio::time::sleep(inner.config.reconnect_delay) => {}
			_ = token.cancelled() => break,
		}
	}
}

async fn pump(inner: &Inner, instance: &InstanceId, connection: Connection, token: &GenerationToken) {
	let Connection { mut sink, mut stream } = connection;
	loop {
		tokio::select! {
			_ = token.cancelled() => break,
			incoming = stream.next() => match incoming {
				Some(Ok(text)) => dispatch(inner, instance, &text),
				Some(Err(err)) => {
					warn!(instance_id = %instance, error = %err, "push.receive_failed");
					break;
				}
				None => break,
			},
		}
	}
	let _ = sink.close().await;
}

fn dispatch(inner: &Inner, socket_instance: &InstanceId, text: &str) {
	match PushMessage::parse(text) {
		Ok(PushMessage::Patch {
			instance_id,
			patch_id,
			patch,
		}) => {
			let instance_id = instance_id.unwrap_or_else(|| socket_instance.clone());
			debug!(%instance_id, ?patch_id, keys = patch.len(), "push.patch");
			inner.handler.on_patch(PushedPatch {
				socket_instance: socket_instance.clone(),
				instance_id,
				patch_id,
				patch,
			});
		}
		Ok(PushMessage::SwitchInstance { instance_id, schema }) => {
			debug!(%instance_id, embedded = schema.is_some(), "push.switch_instance");
			inner.handler.on_switch_instance(SwitchRequest { instance_id, schema });
		}
		Ok(PushMessage::Unknown) => debug!(instance_id = %socket_instance, "push.unknown_message"),
		Err(err) => warn!(instance_id = %socket_instance, error = %err, "push.malformed_frame"),
	}
}
