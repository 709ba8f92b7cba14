use schemasync_schema::{InstanceId, Patch, Schema};
use serde::Deserialize;
use serde_json::Value;

/// Server to client push frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
	/// Patch for an instance, the socket's own one when `instance_id` is absent.
	Patch {
		/// Target instance.
		#[serde(default)]
		instance_id: Option<InstanceId>,
		/// Server log id of the patch, kept opaque since backends send numbers or strings.
		#[serde(default)]
		patch_id: Option<Value>,
		/// Dot-path updates.
		patch: Patch,
	},
	/// Request to make another instance active.
	SwitchInstance {
		/// Instance to switch to.
		instance_id: InstanceId,
		/// Schema of that instance, saving a fetch.
		#[serde(default)]
		schema: Option<Schema>,
	},
	/// Any other message type.
	#[serde(other)]
	Unknown,
}

impl PushMessage {
	/// Decodes one text frame.
	pub fn parse(text: &str) -> crate::Result<Self> {
		Ok(serde_json::from_str(text)?)
	}
}

/// A pushed patch, resolved against the socket it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct PushedPatch {
	/// Instance the socket was opened for.
	pub socket_instance: InstanceId,
	/// Instance the patch targets.
	pub instance_id: InstanceId,
	/// Server log id, when provided.
	pub patch_id: Option<Value>,
	/// Dot-path updates.
	pub patch: Patch,
}

/// A server-initiated instance switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchRequest {
	/// Instance to switch to.
	pub instance_id: InstanceId,
	/// Embedded schema, when the server sent one.
	pub schema: Option<Schema>,
}

/// Receives decoded push messages.
///
/// Called on the socket's supervisor task, one message at a time, so
/// implementations must not block.
pub trait PushHandler: Send + Sync + 'static {
	/// A patch arrived.
	fn on_patch(&self, patch: PushedPatch);

	/// The server asked for an instance switch.
	fn on_switch_instance(&self, request: SwitchRequest);
}
