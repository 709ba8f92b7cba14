//! In-memory [`Connector`] for driving channels without sockets.
//!
//! Every successful [`Connector::connect`] hands a [`MemoryPeer`] to the paired
//! [`MemoryListener`], which plays the server side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{Connection, Connector};

/// Client side factory of in-memory connections.
#[derive(Debug)]
pub struct MemoryConnector {
	accept_tx: mpsc::UnboundedSender<MemoryPeer>,
	refuse: AtomicBool,
	attempts: AtomicUsize,
}

/// Server side queue of accepted connections.
#[derive(Debug)]
pub struct MemoryListener {
	accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
	/// URL the client connected to.
	pub url: String,
	from_client: fmpsc::UnboundedReceiver<String>,
	to_client: fmpsc::UnboundedSender<Result<String, TransportError>>,
}

impl MemoryConnector {
	/// Creates a connector and the listener receiving its connections.
	pub fn new() -> (Arc<Self>, MemoryListener) {
		let (accept_tx, accept_rx) = mpsc::unbounded_channel();
		let connector = Arc::new(Self {
			accept_tx,
			refuse: AtomicBool::new(false),
			attempts: AtomicUsize::new(0),
		});
		(connector, MemoryListener { accept_rx })
	}

	/// Makes subsequent connection attempts fail (or succeed again).
	pub fn set_refuse(&self, refuse: bool) {
		self.refuse.store(refuse, Ordering::SeqCst);
	}

	/// Number of connection attempts so far, refused ones included.
	pub fn attempts(&self) -> usize {
		self.attempts.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Connector for MemoryConnector {
	async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
		self.attempts.fetch_add(1, Ordering::SeqCst);
		if self.refuse.load(Ordering::SeqCst) {
			return Err(TransportError::Connect {
				url: url.to_string(),
				reason: "connection refused".to_string(),
			});
		}

		let (client_tx, from_client) = fmpsc::unbounded();
		let (to_client, client_rx) = fmpsc::unbounded();
		let peer = MemoryPeer {
			url: url.to_string(),
			from_client,
			to_client,
		};
		self.accept_tx.send(peer).map_err(|_| TransportError::Connect {
			url: url.to_string(),
			reason: "listener dropped".to_string(),
		})?;

		Ok(Connection {
			sink: Box::pin(client_tx.sink_map_err(|_| TransportError::Closed)),
			stream: Box::pin(client_rx),
		})
	}
}

impl MemoryListener {
	/// Waits for the next connection.
	pub async fn accept(&mut self) -> Option<MemoryPeer> {
		self.accept_rx.recv().await
	}

	/// Returns an already established connection, if any.
	pub fn try_accept(&mut self) -> Option<MemoryPeer> {
		self.accept_rx.try_recv().ok()
	}
}

impl MemoryPeer {
	/// Next frame sent by the client. `None` once the client closed.
	pub async fn recv(&mut self) -> Option<String> {
		self.from_client.next().await
	}

	/// Next client frame parsed as JSON.
	pub async fn recv_json(&mut self) -> Option<Value> {
		let text = self.recv().await?;
		serde_json::from_str(&text).ok()
	}

	/// Sends a raw text frame to the client. Returns false if the client is gone.
	pub fn send(&self, text: impl Into<String>) -> bool {
		self.to_client.unbounded_send(Ok(text.into())).is_ok()
	}

	/// Sends a JSON frame to the client.
	pub fn send_json(&self, value: &Value) -> bool {
		self.send(value.to_string())
	}

	/// Delivers a transport error to the client.
	pub fn fail(&self, error: TransportError) -> bool {
		self.to_client.unbounded_send(Err(error)).is_ok()
	}

	/// True once the client dropped its end of the connection.
	pub fn is_client_closed(&self) -> bool {
		self.to_client.is_closed()
	}

	/// Closes the connection from the server side.
	pub fn close(self) {
		self.to_client.close_channel();
	}
}
