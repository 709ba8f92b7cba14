//! Explicit per-render context.
//!
//! Replaces ambient global lookup tables: everything a block renderer may consult beyond
//! its own block (other instances, option labels of sibling fields) is reachable only
//! through the [`RenderContext`] it is handed.

use std::collections::HashMap;

use serde_json::Value;

use crate::block::BlockKind;
use crate::cache::InstanceCache;
use crate::model::{Block, InstanceId, Schema};

/// Option labels keyed by `(block id, option value)`.
///
/// Built from each block's `props.options` list of `{value, label}` entries.
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
	labels: HashMap<(String, String), String>,
}

impl LabelIndex {
	/// Indexes the option labels of `blocks`.
	pub fn build(blocks: &[Block]) -> Self {
		let mut labels = HashMap::new();
		for block in blocks {
			let Some(Value::Array(options)) = block.props.get("options") else {
				continue;
			};
			for option in options {
				let (Some(value), Some(label)) = (option.get("value"), option.get("label").and_then(Value::as_str))
				else {
					continue;
				};
				labels.insert((block.id.clone(), option_key(value)), label.to_string());
			}
		}
		Self { labels }
	}

	/// Label of `value` in block `block_id`'s options.
	pub fn get(&self, block_id: &str, value: &Value) -> Option<&str> {
		self.labels
			.get(&(block_id.to_string(), option_key(value)))
			.map(String::as_str)
	}

	/// Number of indexed labels.
	pub fn len(&self) -> usize {
		self.labels.len()
	}

	/// Returns true when nothing was indexed.
	pub fn is_empty(&self) -> bool {
		self.labels.is_empty()
	}
}

fn option_key(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

/// What a block renderer may read.
#[derive(Debug)]
pub struct RenderContext<'a> {
	schema: &'a Schema,
	instances: &'a InstanceCache,
	blocks: Vec<Block>,
	labels: LabelIndex,
}

impl<'a> RenderContext<'a> {
	/// Builds a context for one render pass over `schema`.
	///
	/// Malformed `blocks` sections render as no blocks.
	pub fn new(schema: &'a Schema, instances: &'a InstanceCache) -> Self {
		let blocks = schema.blocks().unwrap_or_else(|e| {
			tracing::warn!(error = %e, "render.blocks_undecodable");
			Vec::new()
		});
		let labels = LabelIndex::build(&blocks);
		Self {
			schema,
			instances,
			blocks,
			labels,
		}
	}

	/// The schema being rendered.
	pub fn schema(&self) -> &Schema {
		self.schema
	}

	/// Decoded blocks in declaration order.
	pub fn blocks(&self) -> &[Block] {
		&self.blocks
	}

	/// Current value bound to `block`.
	pub fn value_of(&self, block: &Block) -> Option<&Value> {
		self.schema.get(&block.state_path()?)
	}

	/// Display label for `value` among block `block_id`'s options.
	pub fn label_for(&self, block_id: &str, value: &Value) -> Option<&str> {
		self.labels.get(block_id, value)
	}

	/// Blocks of the instance a component block references.
	///
	/// Reads `props.instance_id` (or `props.instanceId`) and serves the referenced schema
	/// from the instance cache; returns `None` for non-component blocks and uncached
	/// instances.
	pub fn resolve_component(&self, block: &Block) -> Option<Vec<Block>> {
		if block.kind.kind() != Some(BlockKind::Component) {
			return None;
		}
		let id = block
			.props
			.get("instance_id")
			.or_else(|| block.props.get("instanceId"))
			.and_then(Value::as_str)?;
		let schema = self.instances.get(&InstanceId::from(id))?;
		schema.blocks().ok()
	}
}
