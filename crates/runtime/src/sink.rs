use async_trait::async_trait;
use schemasync_loader::HttpApi;
use schemasync_rpc::CommandChannel;
use serde_json::Value;

use crate::Result;

/// Destination of fire-and-forget `{type, payload, pageKey}` events.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
	/// Sends one event.
	async fn send_event(&self, kind: &str, payload: Value, page_key: Option<String>) -> Result<()>;
}

#[async_trait]
impl EventSink for HttpApi {
	async fn send_event(&self, kind: &str, payload: Value, page_key: Option<String>) -> Result<()> {
		self.post_event(kind, &payload, page_key.as_deref()).await?;
		Ok(())
	}
}

#[async_trait]
impl EventSink for CommandChannel {
	async fn send_event(&self, kind: &str, payload: Value, page_key: Option<String>) -> Result<()> {
		CommandChannel::send_event(self, kind, &payload, page_key.as_deref())?;
		Ok(())
	}
}
