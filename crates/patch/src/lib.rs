//! Dot-path addressing and immutable patch application.
//!
//! A [`Patch`] is a flat, insertion-ordered map from dot-separated paths
//! (`"state.params.x"`) to JSON values. Applying a patch never mutates its input: the
//! document is deep-cloned and every `(path, value)` pair is written to the clone in map
//! order, so a later key may replace a container created by an earlier one.
//!
//! # Invariants
//!
//! 1. [`apply_patch`] MUST leave its input untouched and return a fresh document, even for
//!    an empty patch.
//! 2. Missing or non-container intermediates MUST be replaced by empty maps; array nodes are
//!    never created.
//! 3. Paths that traverse an array MUST be rejected with [`PatchError::ArrayTraversal`];
//!    array elements are not addressable by contract.
//! 4. A failing patch MUST NOT be partially visible to the caller.

mod path;


use serde_json::{Map, Value};

pub use path::{get_by_path, segments, set_by_path};

/// A flat dot-path to value update, applied in key order.
pub type Patch = Map<String, Value>;

/// Errors raised while applying a patch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
	/// The path is empty or contains an empty segment (`"a..b"`).
	#[error("invalid patch path {0:?}")]
	InvalidPath(String),
	/// The document root is not a map.
	#[error("cannot apply {path:?}: document root is not a map")]
	RootNotMap {
		/// Offending path.
		path: String,
	},
	/// An intermediate node on the path is an array.
	#[error("cannot apply {path:?}: segment {segment:?} addresses into an array")]
	ArrayTraversal {
		/// Offending path.
		path: String,
		/// Segment whose node is an array.
		segment: String,
	},
}

/// Result alias for patch operations.
pub type Result<T, E = PatchError> = std::result::Result<T, E>;

/// Applies `patch` to a deep clone of `doc` and returns the clone.
///
/// # Errors
///
/// Returns the first [`PatchError`] raised by [`set_by_path`]; `doc` is unchanged.
pub fn apply_patch(doc: &Value, patch: &Patch) -> Result<Value> {
	let mut next = doc.clone();
	for (path, value) in patch {
		set_by_path(&mut next, path, value.clone())?;
	}
	Ok(next)
}

/// Left fold of [`apply_patch`] over `patches`.
///
/// Equivalent to applying the union of all patches only when no path in one patch is a
/// strict prefix of a path in another: `{"a": 1}` followed by `{"a.b": 2}` yields
/// `{"a": {"b": 2}}`, while the reverse order yields `{"a": 1}`.
///
/// # Errors
///
/// Returns the first failure; `doc` is unchanged.
pub fn apply_patches<'a>(doc: &Value, patches: impl IntoIterator<Item = &'a Patch>) -> Result<Value> {
	let mut next = doc.clone();
	for patch in patches {
		for (path, value) in patch {
			set_by_path(&mut next, path, value.clone())?;
		}
	}
	Ok(next)
}
