//! Text-frame connection abstraction.
//!
//! Channels never touch sockets directly. They ask a [`Connector`] for a
//! [`Connection`], which is a boxed sink and stream of text frames, so the same
//! supervision logic runs over WebSockets in production and in-memory pipes in tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

/// Outgoing half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Incoming half of a connection. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open connection.
pub struct Connection {
	/// Frames to the peer.
	pub sink: FrameSink,
	/// Frames from the peer.
	pub stream: FrameStream,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection").finish_non_exhaustive()
	}
}

/// Opens connections to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
	/// Opens a connection to `url`.
	async fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}

/// [`Connector`] for `ws://` and `wss://` endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
	async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
		let (socket, _response) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|err| TransportError::Connect {
				url: url.to_string(),
				reason: err.to_string(),
			})?;
		let (sink, stream) = socket.split();

		let sink = sink
			.sink_map_err(TransportError::from)
			.with(|text: String| future::ready(Ok::<_, TransportError>(Message::text(text))));

		// Control frames are answered by tungstenite itself and never surface.
		let stream = stream.filter_map(|message| {
			future::ready(match message {
				Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
				Ok(Message::Binary(bytes)) => Some(
					String::from_utf8(bytes.to_vec()).map_err(|err| TransportError::InvalidFrame(err.to_string())),
				),
				Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_)) => None,
				Err(err) => Some(Err(TransportError::from(err))),
			})
		});

		Ok(Connection {
			sink: Box::pin(sink),
			stream: Box::pin(stream),
		})
	}
}
