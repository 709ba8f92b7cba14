//! Id-correlated command channel over a supervised socket.
//!
//! One background supervisor owns the socket. It forwards queued frames, routes
//! responses to their waiters by id, and reconnects after a fixed delay for a
//! bounded number of consecutive failures. Every request still pending when a
//! socket closes is rejected with [`CommandError::ConnectionClosed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use schemasync_worker::{GenerationClock, GenerationToken, TaskClass};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{CommandError, Result};
use crate::protocol::{CommandFrame, CommandResponse, EventFrame, RequestId, RequestIdGen};
use crate::status::ConnectionStatus;
use crate::transport::{Connection, Connector};

/// Command channel settings.
#[derive(Debug, Clone)]
pub struct CommandConfig {
	/// Socket endpoint.
	pub url: String,
	/// Default per-request timeout.
	pub request_timeout: Duration,
	/// Delay before each reconnection attempt.
	pub reconnect_delay: Duration,
	/// Consecutive reconnection attempts before giving up.
	pub max_reconnect_attempts: u32,
	/// Request id namespace.
	pub id_prefix: String,
}

impl CommandConfig {
	/// Settings for `url` with default timings.
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			request_timeout: Duration::from_secs(10),
			reconnect_delay: Duration::from_secs(3),
			max_reconnect_attempts: 5,
			id_prefix: "cmd".to_string(),
		}
	}
}

type Waiter = oneshot::Sender<Result<CommandResponse>>;

struct ChannelState {
	outbound: Option<mpsc::UnboundedSender<String>>,
	pending: HashMap<RequestId, Waiter>,
	ids: RequestIdGen,
	supervisor: Option<GenerationToken>,
}

struct Inner {
	config: CommandConfig,
	connector: Arc<dyn Connector>,
	state: Mutex<ChannelState>,
	status: watch::Sender<ConnectionStatus>,
	generations: GenerationClock,
}

/// Request/response channel with id correlation and timeouts.
///
/// Cloning shares the connection.
#[derive(Clone)]
pub struct CommandChannel {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for CommandChannel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CommandChannel")
			.field("url", &self.inner.config.url)
			.field("status", &self.status())
			.field("pending", &self.pending_len())
			.finish()
	}
}

impl CommandChannel {
	/// Creates a disconnected channel.
	pub fn new(config: CommandConfig, connector: Arc<dyn Connector>) -> Self {
		let ids = RequestIdGen::new(config.id_prefix.clone());
		Self {
			inner: Arc::new(Inner {
				config,
				connector,
				state: Mutex::new(ChannelState {
					outbound: None,
					pending: HashMap::new(),
					ids,
					supervisor: None,
				}),
				status: watch::Sender::new(ConnectionStatus::Disconnected),
				generations: GenerationClock::new(),
			}),
		}
	}

	/// Starts the connection supervisor and waits for its first attempt.
	///
	/// A failed first attempt still leaves the supervisor retrying in the
	/// background. Calling this while a supervisor is running only waits for the
	/// socket to come up.
	pub async fn connect(&self) -> Result<()> {
		let first = {
			let mut state = self.inner.state.lock();
			match &state.supervisor {
				Some(_) => None,
				None => {
					let token = GenerationToken::new(self.inner.generations.next());
					state.supervisor = Some(token.clone());
					let (tx, rx) = oneshot::channel();
					schemasync_worker::spawn(TaskClass::Background, supervise(Arc::clone(&self.inner), token, tx));
					Some(rx)
				}
			}
		};

		match first {
			Some(rx) => rx.await.unwrap_or(Err(CommandError::NotConnected)),
			None => self.wait_connected().await,
		}
	}

	/// Closes the socket and stops reconnecting. Pending requests are rejected.
	pub fn disconnect(&self) {
		let (token, waiters) = {
			let mut state = self.inner.state.lock();
			state.outbound = None;
			(state.supervisor.take(), state.pending.drain().collect::<Vec<_>>())
		};
		if let Some(token) = token {
			token.cancel();
			info!(url = %self.inner.config.url, "command.disconnect");
		}
		reject_all(waiters);
		self.inner.status.send_replace(ConnectionStatus::Disconnected);
	}

	/// Sends `action` and waits for the correlated response with the default timeout.
	pub async fn send_command(&self, action: &str, params: Value) -> Result<CommandResponse> {
		self.send_command_with_timeout(action, params, self.inner.config.request_timeout).await
	}

	/// Sends `action` and waits up to `timeout` for the correlated response.
	///
	/// The waiter is registered before the frame is queued, so a response can never
	/// overtake its own registration.
	pub async fn send_command_with_timeout(&self, action: &str, params: Value, timeout: Duration) -> Result<CommandResponse> {
		let (id, rx) = {
			let mut state = self.inner.state.lock();
			let Some(outbound) = state.outbound.clone() else {
				return Err(CommandError::NotConnected);
			};
			let id = state.ids.next();
			let frame = serde_json::to_string(&CommandFrame {
				id: &id,
				action,
				params: &params,
			})?;
			let (tx, rx) = oneshot::channel();
			state.pending.insert(id.clone(), tx);
			if outbound.send(frame).is_err() {
				state.pending.remove(&id);
				return Err(CommandError::NotConnected);
			}
			(id, rx)
		};
		debug!(request_id = %id, action, "command.sent");

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) => Err(CommandError::ConnectionClosed),
			Err(_) => {
				self.inner.state.lock().pending.remove(&id);
				warn!(request_id = %id, action, timeout_ms = timeout.as_millis() as u64, "command.timeout");
				Err(CommandError::Timeout {
					action: action.to_string(),
					id,
					after: timeout,
				})
			}
		}
	}

	/// Sends a fire-and-forget `{type, payload, pageKey?}` frame.
	pub fn send_event(&self, kind: &str, payload: &Value, page_key: Option<&str>) -> Result<()> {
		let frame = serde_json::to_string(&EventFrame { kind, payload, page_key })?;
		let state = self.inner.state.lock();
		let outbound = state.outbound.as_ref().ok_or(CommandError::NotConnected)?;
		outbound.send(frame).map_err(|_| CommandError::NotConnected)?;
		debug!(kind, "command.event_sent");
		Ok(())
	}

	/// Current socket status.
	pub fn status(&self) -> ConnectionStatus {
		*self.inner.status.borrow()
	}

	/// Returns true while the socket is open.
	pub fn is_connected(&self) -> bool {
		self.status().is_connected()
	}

	/// Subscribes to status changes.
	pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
		self.inner.status.subscribe()
	}

	/// Waits until the socket is open. Fails once reconnection has given up.
	pub async fn wait_connected(&self) -> Result<()> {
		let mut rx = self.inner.status.subscribe();
		let status = rx
			.wait_for(|status| matches!(status, ConnectionStatus::Connected | ConnectionStatus::Failed))
			.await
			.map_err(|_| CommandError::NotConnected)?;
		match *status {
			ConnectionStatus::Connected => Ok(()),
			_ => Err(CommandError::NotConnected),
		}
	}

	/// Number of requests awaiting a response.
	pub fn pending_len(&self) -> usize {
		self.inner.state.lock().pending.len()
	}
}

impl Inner {
	fn set_status(&self, status: ConnectionStatus) {
		self.status.send_if_modified(|current| {
			let changed = *current != status;
			*current = status;
			changed
		});
	}

	fn is_current(&self, token: &GenerationToken) -> bool {
		self.state
			.lock()
			.supervisor
			.as_ref()
			.is_some_and(|current| current.generation() == token.generation())
	}

	fn handle_frame(&self, text: &str) {
		let value: Value = match serde_json::from_str(text) {
			Ok(value) => value,
			Err(err) => {
				warn!(error = %err, "command.malformed_frame");
				return;
			}
		};
		if value.get("id").is_none_or(Value::is_null) {
			let kind = value.get("type").and_then(Value::as_str);
			debug!(kind, "command.unsolicited_frame");
			return;
		}
		let response: CommandResponse = match serde_json::from_value(value) {
			Ok(response) => response,
			Err(err) => {
				warn!(error = %err, "command.malformed_response");
				return;
			}
		};

		let waiter = self.state.lock().pending.remove(&response.id);
		let Some(waiter) = waiter else {
			debug!(request_id = %response.id, "command.late_response");
			return;
		};
		let outcome = if response.success {
			Ok(response)
		} else {
			Err(CommandError::Application(response.error_message()))
		};
		let _ = waiter.send(outcome);
	}

	/// Drops the outbound queue and rejects everything in flight.
	fn on_closed(&self, token: &GenerationToken) {
		let waiters = {
			let mut state = self.state.lock();
			if !state.supervisor.as_ref().is_some_and(|t| t.generation() == token.generation()) {
				return;
			}
			state.outbound = None;
			state.pending.drain().collect::<Vec<_>>()
		};
		if !waiters.is_empty() {
			warn!(rejected = waiters.len(), "command.pending_rejected");
		}
		reject_all(waiters);
		self.set_status(ConnectionStatus::Disconnected);
	}

	fn retire(&self, token: &GenerationToken) {
		let mut state = self.state.lock();
		if state.supervisor.as_ref().is_some_and(|t| t.generation() == token.generation()) {
			state.supervisor = None;
		}
	}
}

fn reject_all(waiters: Vec<(RequestId, Waiter)>) {
	for (_, waiter) in waiters {
		let _ = waiter.send(Err(CommandError::ConnectionClosed));
	}
}

async fn supervise(inner: Arc<Inner>, token: GenerationToken, first: oneshot::Sender<Result<()>>) {
	let url = inner.config.url.clone();
	let mut first = Some(first);
	let mut attempts = 0u32;

	loop {
		inner.set_status(ConnectionStatus::Connecting);
		let connected = tokio::select! {
			result = inner.connector.connect(&url) => result,
			_ = token.cancelled() => break,
		};

		match connected {
			Ok(connection) => {
				attempts = 0;
				let (tx, rx) = mpsc::unbounded_channel();
				{
					let mut state = inner.state.lock();
					if token.is_cancelled() {
						break;
					}
					state.outbound = Some(tx);
				}
				inner.set_status(ConnectionStatus::Connected);
				info!(%url, "command.connected");
				if let Some(first) = first.take() {
					let _ = first.send(Ok(()));
				}
				pump(&inner, connection, rx, &token).await;
				inner.on_closed(&token);
				info!(%url, "command.closed");
			}
			Err(err) => {
				warn!(%url, error = %err, "command.connect_failed");
				if let Some(first) = first.take() {
					let _ = first.send(Err(err.into()));
				}
			}
		}

		if token.is_cancelled() {
			break;
		}
		if attempts >= inner.config.max_reconnect_attempts {
			warn!(%url, attempts, "command.reconnect_exhausted");
			inner.retire(&token);
			inner.set_status(ConnectionStatus::Failed);
			return;
		}
		attempts += 1;
		inner.set_status(ConnectionStatus::Disconnected);
		debug!(
			%url,
			attempt = attempts,
			delay_ms = inner.config.reconnect_delay.as_millis() as u64,
			"command.reconnect_scheduled"
		);
		tokio::select! {
			_ = tokio::time::sleep(inner.config.reconnect_delay) => {}
			_ = token.cancelled() => break,
		}
	}

	if inner.is_current(&token) {
		inner.set_status(ConnectionStatus::Disconnected);
	}
	debug!(%url, generation = token.generation(), "command.supervisor_stopped");
}

async fn pump(inner: &Inner, connection: Connection, mut outbound: mpsc::UnboundedReceiver<String>, token: &GenerationToken) {
	let Connection { mut sink, mut stream } = connection;
	loop {
		tokio::select! {
			_ = token.cancelled() => break,
			frame = outbound.recv() => match frame {
				Some(text) => {
					if let Err(err) = sink.send(text).await {
						warn!(error = %err, "command.send_failed");
						break;
					}
				}
				None => break,
			},
			incoming = stream.next() => match incoming {
				Some(Ok(text)) => inner.handle_frame(&text),
				Some(Err(err)) => {
					warn!(error = %err, "command.receive_failed");
					break;
				}
				None => break,
			},
		}
	}
	let _ = sink.close().await;
}
