//! Schema data model and in-memory holders.
//!
//! # Purpose
//!
//! - Define the [`Schema`] document and its typed views ([`SchemaMeta`], [`Layout`],
//!   [`Block`], [`Action`]).
//! - Hold the single active schema in a [`SchemaStore`] whose every write goes through the
//!   patch engine and yields a new top-level reference.
//! - Keep other instances' schemas in an [`InstanceCache`] for embedding and pre-warming.
//! - Dispatch blocks by kind through a [`BlockRegistry`] with an explicit fallback, reading
//!   cross-instance and label data from an explicit [`RenderContext`].
//!
//! # Invariants
//!
//! 1. The store's schema `Arc` MUST change on every successful `set_schema`/`apply_patch`.
//!    - Enforced in: `SchemaStore::commit`
//!    - Tested by: `store::tests::every_write_yields_new_reference`
//! 2. Subscribers MUST be notified exactly once per successful write, after the write is
//!    visible and without the store lock held.
//!    - Enforced in: `SchemaStore::notify`
//!    - Tested by: `store::tests::listeners_fire_once_per_write`
//! 3. `apply_patch` on an empty store MUST be a no-op that notifies nobody.
//!    - Tested by: `store::tests::patch_without_schema_is_noop`
//! 4. Block ids MUST be unique within one schema.
//!    - Enforced in: `Schema::validate`, which every schema arriving from a backend
//!      passes before it reaches a loader cache or a store
//!    - Tested by: `model::tests::duplicate_block_ids_fail_validation`

mod block;
mod cache;
mod context;
mod log;
mod model;
mod store;

pub use block::{BlockKind, BlockRegistry, BlockType};
pub use cache::InstanceCache;
pub use context::{LabelIndex, RenderContext};
pub use log::{PATCH_LOG_CAPACITY, PatchLog};
pub use model::{
	Action, Block, InstanceId, Layout, LayoutKind, PatchRecord, Schema, SchemaMeta, SchemaStatus, Step,
};
pub use schemasync_patch::{Patch, PatchError};
pub use store::{SchemaStore, SubscriptionId};

/// Errors raised by schema construction and validation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SchemaError {
	/// The document root is not a JSON object.
	#[error("schema root must be an object, got {0}")]
	NotAnObject(&'static str),
	/// Two blocks share an id.
	#[error("duplicate block id {0:?}")]
	DuplicateBlockId(String),
	/// A typed view failed to decode.
	#[error("invalid {section}: {source}")]
	Section {
		/// Section that failed (`meta`, `layout`, ...).
		section: &'static str,
		/// Decoder error.
		#[source]
		source: serde_json::Error,
	},
	/// Applying a patch failed.
	#[error(transparent)]
	Patch(#[from] PatchError),
}

/// Result alias for schema operations.
pub type Result<T, E = SchemaError> = std::result::Result<T, E>;
