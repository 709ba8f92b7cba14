/// Observable state of a supervised socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
	/// No socket and no attempt in progress.
	#[default]
	Disconnected,
	/// An attempt is in progress.
	Connecting,
	/// The socket is open.
	Connected,
	/// Reconnection gave up after the attempt cap.
	Failed,
}

impl ConnectionStatus {
	/// Returns true for [`Self::Connected`].
	pub const fn is_connected(self) -> bool {
		matches!(self, Self::Connected)
	}
}
