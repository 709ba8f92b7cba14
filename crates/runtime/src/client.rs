//! Client assembly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemasync_loader::{HttpApi, LoaderError, SchemaLoader, SchemaSource};
use schemasync_push::{PushChannel, PushHandler, PushedPatch, SwitchRequest};
use schemasync_rpc::{CommandChannel, Connector, WsConnector};
use schemasync_schema::{InstanceCache, InstanceId, Patch, PatchRecord, SchemaStore};
use schemasync_worker::TaskClass;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, EventTransport};
use crate::pipeline::{EventPipeline, PipelineParts};
use crate::routing::PatchRouter;
use crate::sink::EventSink;
use crate::state::{FileStateStore, InstanceStateStore};
use crate::{PipelineError, Result};

/// Server-side patch log access.
#[async_trait]
pub trait PatchHistory: Send + Sync + 'static {
	/// Patch records of `instance`, oldest first.
	async fn list_patches(&self, instance: &InstanceId) -> Result<Vec<PatchRecord>, LoaderError>;

	/// The patch logged under `patch_id`.
	async fn replay_patch(&self, instance: &InstanceId, patch_id: u64) -> Result<Patch, LoaderError>;
}

#[async_trait]
impl PatchHistory for HttpApi {
	async fn list_patches(&self, instance: &InstanceId) -> Result<Vec<PatchRecord>, LoaderError> {
		HttpApi::list_patches(self, instance).await
	}

	async fn replay_patch(&self, instance: &InstanceId, patch_id: u64) -> Result<Patch, LoaderError> {
		HttpApi::replay_patch(self, instance, patch_id).await
	}
}

/// Backends and settings a [`SyncClient`] is built from.
pub struct ClientParts {
	/// Settings.
	pub config: ClientConfig,
	/// Schema fetching.
	pub source: Arc<dyn SchemaSource>,
	/// Field change destination; the command channel when `None`.
	pub events: Option<Arc<dyn EventSink>>,
	/// Patch log access.
	pub history: Arc<dyn PatchHistory>,
	/// Socket factory for both channels.
	pub connector: Arc<dyn Connector>,
	/// Current instance persistence.
	pub state: Arc<dyn InstanceStateStore>,
}

/// Longest wait for flushed field changes to be delivered on shutdown.
const FIELD_DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// Hands pushed patches to the [`PatchRouter`] and switches to the driver task.
struct PushRouter {
	patches: Arc<PatchRouter>,
	switches: mpsc::UnboundedSender<SwitchRequest>,
}

impl PushHandler for PushRouter {
	fn on_patch(&self, pushed: PushedPatch) {
		self.patches.route(pushed);
	}

	fn on_switch_instance(&self, request: SwitchRequest) {
		if self.switches.send(request).is_err() {
			debug!("push.switch_ignored");
		}
	}
}

/// Schema sync client: store, cache, loader, both channels and the pipeline.
pub struct SyncClient {
	config: ClientConfig,
	store: Arc<SchemaStore>,
	instances: Arc<InstanceCache>,
	loader: Arc<SchemaLoader>,
	commands: CommandChannel,
	push: PushChannel,
	pipeline: EventPipeline,
	history: Arc<dyn PatchHistory>,
	state: Arc<dyn InstanceStateStore>,
	switch_driver: JoinHandle<()>,
}

impl std::fmt::Debug for SyncClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SyncClient")
			.field("instance", &self.store.instance_id())
			.field("commands", &self.commands)
			.field("push", &self.push)
			.finish_non_exhaustive()
	}
}

impl SyncClient {
	/// Client talking HTTP and WebSockets to the configured backend, persisting
	/// state under the configured state directory.
	pub fn from_config(config: ClientConfig) -> Result<Self> {
		let api = Arc::new(HttpApi::new(&config.http_base, config.fetch_timeout())?);
		let state = Arc::new(FileStateStore::new(config.resolved_state_dir()));
		let events: Option<Arc<dyn EventSink>> = match config.event_transport {
			EventTransport::Http => Some(api.clone()),
			EventTransport::Command => None,
		};
		Ok(Self::from_parts(ClientParts {
			config,
			source: api.clone(),
			events,
			history: api,
			connector: Arc::new(WsConnector),
			state,
		}))
	}

	/// Client over explicit backends.
	pub fn from_parts(parts: ClientParts) -> Self {
		let ClientParts {
			config,
			source,
			events,
			history,
			connector,
			state,
		} = parts;

		let store = Arc::new(SchemaStore::new());
		let instances = Arc::new(InstanceCache::new());
		let loader = Arc::new(SchemaLoader::with_timing(source, config.schema_ttl(), config.fetch_timeout()));
		let commands = CommandChannel::new(config.command_config(), Arc::clone(&connector));
		let events = events.unwrap_or_else(|| -> Arc<dyn EventSink> { Arc::new(commands.clone()) });

		let patches = Arc::new(PatchRouter::new(Arc::clone(&store), Arc::clone(&instances)));

		let (switch_tx, switch_rx) = mpsc::unbounded_channel();
		let handler = Arc::new(PushRouter {
			patches: Arc::clone(&patches),
			switches: switch_tx,
		});
		let push = PushChannel::new(config.push_config(), connector, handler);

		let pipeline = EventPipeline::new(PipelineParts {
			router: patches,
			loader: Arc::clone(&loader),
			commands: commands.clone(),
			push: push.clone(),
			events,
			state: Arc::clone(&state),
			field_debounce: config.field_debounce(),
		});
		let switch_driver = schemasync_worker::spawn(TaskClass::Interactive, drive_switches(switch_rx, pipeline.clone()));

		Self {
			config,
			store,
			instances,
			loader,
			commands,
			push,
			pipeline,
			history,
			state,
			switch_driver,
		}
	}

	/// Connects the command socket and opens the starting instance.
	///
	/// The starting instance is `instance` if given, else the persisted pointer,
	/// else `default_instance` from the config. A failed command connection is
	/// logged; its supervisor keeps retrying in the background.
	pub async fn start(&self, instance: Option<InstanceId>) -> Result<Option<InstanceId>> {
		if let Err(err) = self.commands.connect().await {
			warn!(error = %err, "client.command_connect_failed");
		}

		let persisted = match self.state.load_current() {
			Ok(persisted) => persisted,
			Err(err) => {
				warn!(error = %err, "client.state_unreadable");
				None
			}
		};
		let Some(start) = instance.or(persisted).or_else(|| self.config.default_instance.clone()) else {
			info!("client.no_start_instance");
			return Ok(None);
		};
		self.pipeline.switch_instance(start.clone(), None).await?;
		Ok(Some(start))
	}

	/// Fetches `patch_id` from the server log of the active instance and applies it.
	pub async fn replay_patch(&self, patch_id: u64) -> Result<Patch> {
		let instance = self.store.instance_id().ok_or(PipelineError::NoActiveInstance)?;
		let patch = self.history.replay_patch(&instance, patch_id).await?;
		self.store.apply_patch(&patch)?;
		info!(instance_id = %instance, patch_id, "client.replayed");
		Ok(patch)
	}

	/// Server patch log of the active instance.
	pub async fn patch_history(&self) -> Result<Vec<PatchRecord>> {
		let instance = self.store.instance_id().ok_or(PipelineError::NoActiveInstance)?;
		Ok(self.history.list_patches(&instance).await?)
	}

	/// Loads `ids` into the instance cache for embedding.
	pub async fn preload(&self, ids: &[InstanceId]) -> schemasync_loader::PreloadReport {
		self.loader.preload_schemas(ids, &self.instances).await
	}

	/// Sends pending field changes, waits briefly for their delivery, then closes
	/// both sockets.
	///
	/// Field changes dispatched afterwards are dropped.
	pub async fn shutdown(&self) {
		let flushed = self.pipeline.close_fields(FIELD_DRAIN_LIMIT).await;
		self.push.close().await;
		self.commands.disconnect();
		self.switch_driver.abort();
		info!(flushed, "client.shutdown");
	}

	/// Settings in use.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Active schema holder.
	pub fn store(&self) -> &Arc<SchemaStore> {
		&self.store
	}

	/// Other instances' schemas.
	pub fn instances(&self) -> &Arc<InstanceCache> {
		&self.instances
	}

	/// Schema loader.
	pub fn loader(&self) -> &Arc<SchemaLoader> {
		&self.loader
	}

	/// Command channel.
	pub fn commands(&self) -> &CommandChannel {
		&self.commands
	}

	/// Push channel.
	pub fn push(&self) -> &PushChannel {
		&self.push
	}

	/// Event pipeline.
	pub fn pipeline(&self) -> &EventPipeline {
		&self.pipeline
	}
}

impl Drop for SyncClient {
	fn drop(&mut self) {
		self.switch_driver.abort();
	}
}

async fn drive_switches(mut requests: mpsc::UnboundedReceiver<SwitchRequest>, pipeline: EventPipeline) {
	while let Some(SwitchRequest { instance_id, schema }) = requests.recv().await {
		if let Err(err) = pipeline.switch_instance(instance_id.clone(), schema).await {
			warn!(%instance_id, error = %err, "client.pushed_switch_failed");
		}
	}
}

#[cfg(test)]
mod tests;
