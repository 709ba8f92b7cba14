//! Request/response command channel over a persistent socket.
//!
//! * [`Connector`]: opens text-frame connections ([`WsConnector`] for WebSockets).
//! * [`RequestIdGen`]: namespaced, zero-padded request ids that never repeat.
//! * [`CommandChannel`]: id-correlated RPC with per-request timeouts, fire-and-forget
//!   events, and bounded fixed-delay reconnection.
//! * [`ConnectionStatus`]: observable socket state shared with the push channel.

#![warn(missing_docs)]

pub mod channel;
pub mod error;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod protocol;
pub mod status;
pub mod transport;

pub use channel::{CommandChannel, CommandConfig};
pub use error::{CommandError, Result, TransportError};
pub use protocol::{CommandResponse, RequestId, RequestIdGen};
pub use status::ConnectionStatus;
pub use transport::{Connection, Connector, FrameSink, FrameStream, WsConnector};
