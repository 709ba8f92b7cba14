use serde_json::{Map, Value};

use crate::{PatchError, Result};

/// Splits a dot path into its segments.
///
/// # Errors
///
/// Returns [`PatchError::InvalidPath`] for an empty path or an empty segment.
pub fn segments(path: &str) -> Result<Vec<&str>> {
	let parts: Vec<&str> = path.split('.').collect();
	if parts.iter().any(|s| s.is_empty()) {
		return Err(PatchError::InvalidPath(path.to_string()));
	}
	Ok(parts)
}

/// Resolves `path` against `doc`.
///
/// Returns `None` on any missing or null intermediate, on an array intermediate, and on
/// malformed paths. A null leaf resolves to `Some(Value::Null)`.
pub fn get_by_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
	let mut current = doc;
	for segment in segments(path).ok()? {
		current = match current {
			Value::Object(map) => map.get(segment)?,
			_ => return None,
		};
	}
	Some(current)
}

/// Writes `value` at `path`, creating empty maps for missing intermediates.
///
/// Mutates `doc` in place; callers wanting immutability pass a clone. An intermediate that
/// holds a scalar or null is replaced by an empty map.
///
/// # Errors
///
/// * [`PatchError::InvalidPath`] for malformed paths.
/// * [`PatchError::RootNotMap`] when `doc` is not a map.
/// * [`PatchError::ArrayTraversal`] when an intermediate is an array. Intermediates created
///   before the failing segment stay in `doc`.
pub fn set_by_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
	let parts = segments(path)?;
	let Some((leaf, parents)) = parts.split_last() else {
		return Err(PatchError::InvalidPath(path.to_string()));
	};

	let Value::Object(root) = doc else {
		return Err(PatchError::RootNotMap { path: path.to_string() });
	};
	let mut current: &mut Map<String, Value> = root;

	for segment in parents {
		let slot = current
			.entry((*segment).to_string())
			.or_insert_with(|| Value::Object(Map::new()));
		if slot.is_array() {
			return Err(PatchError::ArrayTraversal {
				path: path.to_string(),
				segment: (*segment).to_string(),
			});
		}
		if !slot.is_object() {
			*slot = Value::Object(Map::new());
		}
		current = match slot {
			Value::Object(map) => map,
			_ => unreachable!("slot normalized to a map above"),
		};
	}

	current.insert((*leaf).to_string(), value);
	Ok(())
}
