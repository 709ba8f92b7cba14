//! Push channel: one supervised socket per active instance.
//!
//! The server streams `{type: "patch"}` and `{type: "switch_instance"}` frames
//! on `/ui/ws/{instanceId}`. Frames are decoded into [`PushMessage`] and handed
//! to a [`PushHandler`] in arrival order.
//!
//! # Invariants
//!
//! 1. At most one socket is live. [`PushChannel::set_instance`] cancels and joins
//!    the previous supervisor before the new one dials.
//!    - Tested by: `tests::switching_never_leaves_two_sockets`
//! 2. A socket closed while its instance is still desired reconnects after a fixed
//!    delay, indefinitely. A socket closed by a switch never reconnects.
//!    - Tested by: `tests::reconnects_indefinitely_while_instance_is_desired`,
//!      `tests::superseded_instance_is_never_redialed`
//! 3. Malformed frames are logged and dropped without disturbing the socket.
//!    - Tested by: `tests::frames_reach_handler_in_order`

mod channel;
mod message;

pub use channel::{PushChannel, PushConfig, push_url};
pub use message::{PushHandler, PushMessage, PushedPatch, SwitchRequest};

/// Errors raised by the push channel.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PushError {
	/// A frame is not a valid push message.
	#[error("malformed push frame: {0}")]
	Malformed(#[from] serde_json::Error),
}

/// Result alias for push operations.
pub type Result<T, E = PushError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests;
