//! Schema sync client runtime.
//!
//! Wires the schema store, instance cache, loader, command channel and push
//! channel together behind an [`EventPipeline`] that turns UI events into
//! backend traffic:
//!
//! * field changes are debounced per `(instance, field)` and sent last-write-wins;
//! * action clicks go over the command channel and apply the returned patch;
//! * instance switches persist the current instance, re-point the push socket and
//!   load the new schema, with a generation guard discarding superseded loads;
//! * pushed patches are routed by instance, and those for an instance still
//!   loading are held until its schema lands.
//!
//! Field changes never patch the store locally. The server answers them with a
//! pushed patch.
//!
//! [`SyncClient`] owns all of it and is the entry point for embedders.

#![warn(missing_docs)]

mod client;
pub mod config;
mod debounce;
mod lifecycle;
mod pipeline;
mod routing;
mod sink;
pub mod state;
#[cfg(test)]
mod testing;

pub use client::{ClientParts, PatchHistory, SyncClient};
pub use config::{ClientConfig, ConfigError, EventTransport};
pub use debounce::Debouncer;
pub use lifecycle::{InstanceEvent, InstanceStatus};
pub use pipeline::{ActionOutcome, Dispatched, EventPipeline, FieldChange, PipelineParts, UiEvent};
pub use routing::{PatchRouter, Routed};
pub use sink::EventSink;
pub use state::{FileStateStore, InstanceStateStore, MemoryStateStore, StateError};

use schemasync_loader::LoaderError;
use schemasync_rpc::CommandError;
use schemasync_schema::SchemaError;

/// Errors raised while handling UI events.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
	/// The event needs an active instance and there is none.
	#[error("no active instance")]
	NoActiveInstance,
	/// A command failed.
	#[error(transparent)]
	Command(#[from] CommandError),
	/// Loading or fetching from the backend failed.
	#[error(transparent)]
	Load(#[from] LoaderError),
	/// A schema or patch from the backend was rejected.
	#[error(transparent)]
	Schema(#[from] SchemaError),
	/// Persisting client state failed.
	#[error(transparent)]
	State(#[from] StateError),
	/// A response did not have the expected shape.
	#[error("invalid response: {0}")]
	InvalidResponse(String),
}

/// Result alias for pipeline operations.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
