//! Error types for transports and the command channel.

use std::time::Duration;

use crate::protocol::RequestId;

/// Failures of the underlying socket.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
	/// The connection could not be established.
	#[error("failed to connect to {url}: {reason}")]
	Connect {
		/// Target URL.
		url: String,
		/// Underlying failure.
		reason: String,
	},
	/// The connection is gone.
	#[error("connection closed")]
	Closed,
	/// WebSocket protocol or I/O failure.
	#[error("websocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
	/// A frame that is not valid UTF-8 text.
	#[error("invalid frame: {0}")]
	InvalidFrame(String),
}

/// Failures of [`CommandChannel`](crate::CommandChannel) operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CommandError {
	/// No open socket.
	#[error("command channel is not connected")]
	NotConnected,
	/// No response arrived in time.
	#[error("command {action:?} ({id}) timed out after {}ms", after.as_millis())]
	Timeout {
		/// Action name.
		action: String,
		/// Request id.
		id: RequestId,
		/// Timeout that elapsed.
		after: Duration,
	},
	/// The server answered with `success: false`.
	#[error("command failed: {0}")]
	Application(String),
	/// The socket closed while the request was in flight.
	#[error("connection closed before a response arrived")]
	ConnectionClosed,
	/// The outgoing frame could not be encoded.
	#[error("failed to encode frame: {0}")]
	Encode(#[from] serde_json::Error),
	/// Connecting failed.
	#[error(transparent)]
	Transport(#[from] TransportError),
}

/// Result alias for command channel operations.
pub type Result<T, E = CommandError> = std::result::Result<T, E>;
