//! Schema document and its typed views.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::block::BlockType;
use crate::{Patch, Result, SchemaError};

/// Logical identity of a schema session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
	/// Wraps an instance identifier.
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Borrows the raw identifier.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for InstanceId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl From<String> for InstanceId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl Borrow<str> for InstanceId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

/// The authoritative UI description for one instance.
///
/// Stored as a JSON object so dot-path patches address it directly; the typed accessors
/// decode sections on demand and are lenient about absent sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Schema(Value);

impl Schema {
	/// An empty schema document (`{}`).
	pub fn empty() -> Self {
		Self(Value::Object(Map::new()))
	}

	/// Wraps a JSON value, requiring an object root.
	///
	/// # Errors
	///
	/// Returns [`SchemaError::NotAnObject`] for any other root.
	pub fn from_value(value: Value) -> Result<Self> {
		match value {
			Value::Object(_) => Ok(Self(value)),
			Value::Null => Err(SchemaError::NotAnObject("null")),
			Value::Bool(_) => Err(SchemaError::NotAnObject("bool")),
			Value::Number(_) => Err(SchemaError::NotAnObject("number")),
			Value::String(_) => Err(SchemaError::NotAnObject("string")),
			Value::Array(_) => Err(SchemaError::NotAnObject("array")),
		}
	}

	/// Borrows the underlying document.
	pub fn as_value(&self) -> &Value {
		&self.0
	}

	/// Unwraps the underlying document.
	pub fn into_value(self) -> Value {
		self.0
	}

	/// Resolves a dot path against the document.
	pub fn get(&self, path: &str) -> Option<&Value> {
		schemasync_patch::get_by_path(&self.0, path)
	}

	/// Returns a patched copy; `self` is unchanged.
	///
	/// # Errors
	///
	/// Propagates [`PatchError`](crate::PatchError) from the patch engine.
	pub fn patched(&self, patch: &Patch) -> Result<Self> {
		Ok(Self(schemasync_patch::apply_patch(&self.0, patch)?))
	}

	/// Returns a copy with every patch applied in order.
	///
	/// # Errors
	///
	/// Propagates the first patch engine failure.
	pub fn patched_all<'a>(&self, patches: impl IntoIterator<Item = &'a Patch>) -> Result<Self> {
		Ok(Self(schemasync_patch::apply_patches(&self.0, patches)?))
	}

	fn section<T: DeserializeOwned>(&self, key: &'static str) -> Result<Option<T>> {
		match self.0.get(key) {
			None | Some(Value::Null) => Ok(None),
			Some(v) => T::deserialize(v)
				.map(Some)
				.map_err(|source| SchemaError::Section { section: key, source }),
		}
	}

	/// Decodes `meta`.
	///
	/// # Errors
	///
	/// Returns [`SchemaError::Section`] when `meta` is present but malformed.
	pub fn meta(&self) -> Result<Option<SchemaMeta>> {
		self.section("meta")
	}

	/// Decodes `layout`.
	///
	/// # Errors
	///
	/// Returns [`SchemaError::Section`] when `layout` is present but malformed.
	pub fn layout(&self) -> Result<Option<Layout>> {
		self.section("layout")
	}

	/// Decodes `blocks`, in declaration order.
	///
	/// # Errors
	///
	/// Returns [`SchemaError::Section`] when `blocks` is present but malformed.
	pub fn blocks(&self) -> Result<Vec<Block>> {
		Ok(self.section("blocks")?.unwrap_or_default())
	}

	/// Decodes `actions`, in declaration order.
	///
	/// # Errors
	///
	/// Returns [`SchemaError::Section`] when `actions` is present but malformed.
	pub fn actions(&self) -> Result<Vec<Action>> {
		Ok(self.section("actions")?.unwrap_or_default())
	}

	/// Page key from `meta.pageKey`, if set.
	pub fn page_key(&self) -> Option<&str> {
		self.get("meta.pageKey").and_then(Value::as_str)
	}

	/// Snapshot of `state.params`; empty when absent or not a map.
	pub fn params(&self) -> Map<String, Value> {
		match self.get("state.params") {
			Some(Value::Object(map)) => map.clone(),
			_ => Map::new(),
		}
	}

	/// Checks structural invariants (block id uniqueness, decodable sections).
	///
	/// # Errors
	///
	/// Returns the first violation found.
	pub fn validate(&self) -> Result<()> {
		self.meta()?;
		self.layout()?;
		self.actions()?;
		let mut seen = HashSet::new();
		for block in self.blocks()? {
			if !seen.insert(block.id.clone()) {
				return Err(SchemaError::DuplicateBlockId(block.id));
			}
		}
		Ok(())
	}
}

impl Default for Schema {
	fn default() -> Self {
		Self::empty()
	}
}

impl TryFrom<Value> for Schema {
	type Error = SchemaError;

	fn try_from(value: Value) -> Result<Self> {
		Self::from_value(value)
	}
}

impl From<Schema> for Value {
	fn from(schema: Schema) -> Self {
		schema.0
	}
}

/// `meta` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaMeta {
	/// Page identifier sent alongside events.
	pub page_key: String,
	/// Wizard step position.
	pub step: Step,
	/// Page status.
	pub status: SchemaStatus,
	/// Backend schema revision tag.
	pub schema_version: String,
}

/// Wizard step position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
	/// One-based current step.
	pub current: i64,
	/// Total number of steps.
	pub total: i64,
}

/// Page status flag in `meta.status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
	/// Ready for input.
	#[default]
	Idle,
	/// Backend work in progress.
	Loading,
	/// Input disabled.
	Locked,
	/// Any status this client does not know.
	#[serde(other)]
	Other,
}

/// Layout arrangement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
	/// One column.
	Single,
	/// Two panes.
	Split,
	/// Grid cells.
	Grid,
	/// Flexible row/column flow.
	Flex,
	/// Tabbed panes.
	Tabs,
	/// Any layout this client does not know.
	#[serde(other)]
	Other,
}

/// `layout` section; layout-specific fields are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
	/// Arrangement kind.
	#[serde(rename = "type")]
	pub kind: LayoutKind,
	/// Kind-specific settings.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// One schema-described UI unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
	/// Unique within its schema.
	pub id: String,
	/// Block type tag.
	#[serde(rename = "type")]
	pub kind: BlockType,
	/// Dot path into `state` this block reads and edits.
	#[serde(default)]
	pub bind: Option<String>,
	/// Renderer-specific properties.
	#[serde(default)]
	pub props: Map<String, Value>,
}

impl Block {
	/// Absolute document path of the bound state, if any.
	///
	/// `bind` is relative to `state`; an already-absolute `state.` prefix is accepted.
	pub fn state_path(&self) -> Option<String> {
		let bind = self.bind.as_deref().filter(|b| !b.is_empty())?;
		if bind == "state" || bind.starts_with("state.") {
			Some(bind.to_string())
		} else {
			Some(format!("state.{bind}"))
		}
	}
}

/// A user-triggerable operation declared by the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
	/// Action identifier sent to the backend.
	pub id: String,
	/// Display label.
	#[serde(default)]
	pub label: String,
	/// Presentation style hint.
	#[serde(default)]
	pub style: Option<String>,
	/// Backend action kind.
	#[serde(default)]
	pub action_type: Option<String>,
	/// Instance to navigate to after success.
	#[serde(default)]
	pub target_instance: Option<InstanceId>,
}

/// Audit entry for one applied patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
	/// Monotonically increasing per log.
	pub id: u64,
	/// RFC 3339 timestamp.
	pub timestamp: String,
	/// The applied patch.
	pub patch: Patch,
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;
	use crate::BlockKind;

	fn sample() -> Schema {
		Schema::from_value(json!({
			"meta": {"pageKey": "wizard", "step": {"current": 1, "total": 3}, "status": "locked", "schemaVersion": "2"},
			"state": {"params": {"name": "a"}, "runtime": {}},
			"layout": {"type": "split", "ratio": [1, 2]},
			"blocks": [
				{"id": "b1", "type": "form", "bind": "params", "props": {}},
				{"id": "b2", "type": "sparkline", "bind": "runtime.series"}
			],
			"actions": [{"id": "next", "label": "Next", "style": "primary", "target_instance": "i2"}]
		}))
		.unwrap()
	}

	#[test]
	fn typed_views_decode() {
		let schema = sample();
		let meta = schema.meta().unwrap().unwrap();
		assert_eq!(meta.page_key, "wizard");
		assert_eq!(meta.step, Step { current: 1, total: 3 });
		assert_eq!(meta.status, SchemaStatus::Locked);
		let layout = schema.layout().unwrap().unwrap();
		assert_eq!(layout.kind, LayoutKind::Split);
		assert_eq!(layout.extra.get("ratio"), Some(&json!([1, 2])));
		let blocks = schema.blocks().unwrap();
		assert_eq!(blocks[0].kind, BlockType::Known(BlockKind::Form));
		assert_eq!(blocks[1].kind, BlockType::Other("sparkline".into()));
		assert_eq!(blocks[1].state_path().as_deref(), Some("state.runtime.series"));
		let actions = schema.actions().unwrap();
		assert_eq!(actions[0].target_instance, Some(InstanceId::from("i2")));
		assert_eq!(schema.page_key(), Some("wizard"));
		assert_eq!(schema.params().get("name"), Some(&json!("a")));
		schema.validate().unwrap();
	}

	#[test]
	fn unknown_status_is_tolerated() {
		let schema = Schema::from_value(json!({"meta": {"status": "archived"}})).unwrap();
		assert_eq!(schema.meta().unwrap().unwrap().status, SchemaStatus::Other);
	}

	#[test]
	fn duplicate_block_ids_fail_validation() {
		let schema = Schema::from_value(json!({"blocks": [
			{"id": "x", "type": "text"},
			{"id": "x", "type": "form"}
		]}))
		.unwrap();
		assert!(matches!(schema.validate(), Err(SchemaError::DuplicateBlockId(id)) if id == "x"));
	}

	#[test]
	fn non_object_roots_are_rejected() {
		assert!(matches!(Schema::from_value(json!([1])), Err(SchemaError::NotAnObject("array"))));
		assert!(serde_json::from_value::<Schema>(json!("s")).is_err());
	}
}
