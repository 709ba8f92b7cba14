use schemasync_schema::InstanceId;

/// Load state of the active instance.
///
/// `Idle -> Loading -> Ready | Error`. Any new switch re-enters `Loading`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InstanceStatus {
	/// Nothing requested yet.
	#[default]
	Idle,
	/// A switch is loading `instance`.
	Loading {
		/// Instance being loaded.
		instance: InstanceId,
	},
	/// `instance` is loaded into the store.
	Ready {
		/// Loaded instance.
		instance: InstanceId,
		/// Served from an expired cache entry after a failed fetch.
		stale: bool,
	},
	/// Loading `instance` failed with no cached fallback.
	Error {
		/// Instance that failed.
		instance: InstanceId,
		/// Failure description.
		message: String,
	},
}

impl InstanceStatus {
	/// Instance this status is about.
	pub fn instance(&self) -> Option<&InstanceId> {
		match self {
			Self::Idle => None,
			Self::Loading { instance } | Self::Ready { instance, .. } | Self::Error { instance, .. } => Some(instance),
		}
	}

	/// Returns true for [`Self::Ready`].
	pub fn is_ready(&self) -> bool {
		matches!(self, Self::Ready { .. })
	}

	/// Short label for logs and the CLI.
	pub fn label(&self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Loading { .. } => "loading",
			Self::Ready { .. } => "ready",
			Self::Error { .. } => "error",
		}
	}
}

/// Notification published on instance transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
	/// The current instance pointer moved.
	Switched {
		/// Previously active instance.
		from: Option<InstanceId>,
		/// New instance.
		to: InstanceId,
	},
	/// A switch finished loading.
	Ready {
		/// Loaded instance.
		instance: InstanceId,
		/// Served stale.
		stale: bool,
	},
	/// A switch failed.
	Failed {
		/// Instance that failed.
		instance: InstanceId,
		/// Failure description.
		message: String,
	},
}
