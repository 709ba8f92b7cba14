//! Block kind tags and kind-dispatched rendering.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::RenderContext;
use crate::model::Block;

/// Block kinds this client knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
	/// Field group bound to a params map.
	Form,
	/// Tabular data.
	Table,
	/// Slide-out panel.
	Drawer,
	/// Selection control.
	Picker,
	/// Static text.
	Text,
	/// Read-only view of another instance's blocks.
	Component,
}

impl BlockKind {
	/// Every known kind.
	pub const ALL: [Self; 6] = [Self::Form, Self::Table, Self::Drawer, Self::Picker, Self::Text, Self::Component];

	/// Wire tag.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Form => "form",
			Self::Table => "table",
			Self::Drawer => "drawer",
			Self::Picker => "picker",
			Self::Text => "text",
			Self::Component => "component",
		}
	}
}

/// A block's `type` tag: a known kind, or the raw tag of an unknown one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockType {
	/// A kind with a dedicated dispatch slot.
	Known(BlockKind),
	/// Anything else; always routed to the registry fallback.
	Other(String),
}

impl BlockType {
	/// Known kind, if any.
	pub fn kind(&self) -> Option<BlockKind> {
		match self {
			Self::Known(kind) => Some(*kind),
			Self::Other(_) => None,
		}
	}

	/// Wire tag.
	pub fn as_str(&self) -> &str {
		match self {
			Self::Known(kind) => kind.as_str(),
			Self::Other(tag) => tag,
		}
	}
}

impl From<String> for BlockType {
	fn from(tag: String) -> Self {
		BlockKind::ALL
			.into_iter()
			.find(|k| k.as_str() == tag)
			.map_or(Self::Other(tag), Self::Known)
	}
}

impl From<BlockType> for String {
	fn from(ty: BlockType) -> Self {
		match ty {
			BlockType::Known(kind) => kind.as_str().to_string(),
			BlockType::Other(tag) => tag,
		}
	}
}

impl fmt::Display for BlockType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

type Handler<R> = Box<dyn Fn(&Block, &RenderContext<'_>) -> R + Send + Sync>;

/// Kind-keyed dispatch table with a mandatory fallback.
///
/// Unknown tags and known kinds without a handler both reach the fallback.
pub struct BlockRegistry<R> {
	handlers: HashMap<BlockKind, Handler<R>>,
	fallback: Handler<R>,
}

impl<R> BlockRegistry<R> {
	/// Creates a registry whose unmatched blocks go to `fallback`.
	pub fn new(fallback: impl Fn(&Block, &RenderContext<'_>) -> R + Send + Sync + 'static) -> Self {
		Self {
			handlers: HashMap::new(),
			fallback: Box::new(fallback),
		}
	}

	/// Installs the handler for `kind`, replacing any previous one.
	pub fn register(
		mut self,
		kind: BlockKind,
		handler: impl Fn(&Block, &RenderContext<'_>) -> R + Send + Sync + 'static,
	) -> Self {
		self.handlers.insert(kind, Box::new(handler));
		self
	}

	/// Returns true when `kind` has a dedicated handler.
	pub fn handles(&self, kind: BlockKind) -> bool {
		self.handlers.contains_key(&kind)
	}

	/// Dispatches one block.
	pub fn dispatch(&self, block: &Block, cx: &RenderContext<'_>) -> R {
		let handler = block.kind.kind().and_then(|k| self.handlers.get(&k)).unwrap_or(&self.fallback);
		handler(block, cx)
	}

	/// Dispatches every block of the context's schema in declaration order.
	pub fn dispatch_all(&self, cx: &RenderContext<'_>) -> Vec<R> {
		cx.blocks().iter().map(|b| self.dispatch(b, cx)).collect()
	}
}

impl<R> fmt::Debug for BlockRegistry<R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BlockRegistry")
			.field("kinds", &self.handlers.keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}
