//! UI event dispatch.
//!
//! | Event | Path |
//! |---|---|
//! | [`UiEvent::FieldChange`] | debounced per `(instance, field)`, then `field:change` on the [`EventSink`] |
//! | [`UiEvent::ActionClick`] | `action:click` on the command channel, response applied to the store |
//! | [`UiEvent::InstanceSwitch`] | persist, re-point push socket, load schema |
//!
//! Switches are ordered by a generation clock. A load that finishes after a newer
//! switch started is discarded instead of overwriting the newer instance. Patches
//! pushed for the instance being loaded are buffered by the [`PatchRouter`] and
//! land on its schema before it becomes active.
//!
//! An action response belongs to the instance the action was sent from. If another
//! instance became active meanwhile, the response only updates the cached copy.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use schemasync_loader::{LoadOrigin, SchemaLoader};
use schemasync_push::PushChannel;
use schemasync_rpc::{CommandChannel, CommandResponse};
use schemasync_schema::{InstanceId, Patch, Schema};
use schemasync_worker::{GenerationClock, TaskClass};
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::debounce::Debouncer;
use crate::lifecycle::{InstanceEvent, InstanceStatus};
use crate::routing::PatchRouter;
use crate::sink::EventSink;
use crate::state::InstanceStateStore;
use crate::{PipelineError, Result};

const FIELD_CHANGE: &str = "field:change";
const ACTION_CLICK: &str = "action:click";

/// Event raised by the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
	/// A field value changed.
	FieldChange {
		/// Field identifier within the block.
		field_key: String,
		/// New value.
		value: Value,
		/// Bind path of the owning block.
		bind_path: Option<String>,
	},
	/// An action was triggered.
	ActionClick {
		/// Action id.
		action_id: String,
		/// Explicit params; the store's `state.params` when absent.
		params: Option<Map<String, Value>>,
		/// Block the action was triggered from.
		block_id: Option<String>,
	},
	/// Another instance was selected.
	InstanceSwitch {
		/// Instance to make active.
		instance_id: InstanceId,
	},
}

/// A debounced field change ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
	/// Instance the change belongs to.
	pub instance_id: InstanceId,
	/// Field identifier.
	pub field_key: String,
	/// Last value within the window.
	pub value: Value,
	/// Bind path of the owning block.
	pub bind_path: Option<String>,
	/// Page key of the schema at dispatch time.
	pub page_key: Option<String>,
}

impl FieldChange {
	fn payload(&self) -> Value {
		json!({
			"instanceId": self.instance_id,
			"fieldKey": self.field_key,
			"value": self.value,
			"bindPath": self.bind_path,
		})
	}
}

/// What an action click did.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
	/// Server response.
	pub response: CommandResponse,
	/// A schema or patch from the response was applied, to the store or to the
	/// cached copy of an instance switched away from.
	pub applied: bool,
	/// Instance the response navigated to.
	pub navigated_to: Option<InstanceId>,
}

/// Result of [`EventPipeline::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
	/// The field change is waiting out its debounce window.
	Queued,
	/// The action completed.
	Action(ActionOutcome),
	/// The switch finished with this status.
	Switched(InstanceStatus),
}

/// Everything the pipeline drives.
pub struct PipelineParts {
	/// Store, instance cache and pushed patch routing.
	pub router: Arc<PatchRouter>,
	/// Schema loader.
	pub loader: Arc<SchemaLoader>,
	/// Command channel.
	pub commands: CommandChannel,
	/// Push channel.
	pub push: PushChannel,
	/// Destination of field change events.
	pub events: Arc<dyn EventSink>,
	/// Current instance persistence.
	pub state: Arc<dyn InstanceStateStore>,
	/// Field change debounce window.
	pub field_debounce: Duration,
}

struct Inner {
	router: Arc<PatchRouter>,
	loader: Arc<SchemaLoader>,
	commands: CommandChannel,
	push: PushChannel,
	state: Arc<dyn InstanceStateStore>,
	fields: Debouncer<(InstanceId, String), FieldChange>,
	status: watch::Sender<InstanceStatus>,
	events: broadcast::Sender<InstanceEvent>,
	generations: GenerationClock,
	sender: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.fields.cancel_all();
		if let Some(sender) = self.sender.get_mut().take() {
			sender.abort();
		}
	}
}

/// Dispatcher for [`UiEvent`]s.
///
/// Cloning shares the pipeline.
#[derive(Clone)]
pub struct EventPipeline {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for EventPipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventPipeline")
			.field("status", &*self.inner.status.borrow())
			.field("pending_fields", &self.inner.fields.pending_len())
			.finish()
	}
}

impl EventPipeline {
	/// Creates the pipeline and starts its field change sender task.
	pub fn new(parts: PipelineParts) -> Self {
		let (fields, due) = Debouncer::new(parts.field_debounce);
		let sender = schemasync_worker::spawn(TaskClass::Background, send_field_changes(due, parts.events));
		let (events, _) = broadcast::channel(64);
		Self {
			inner: Arc::new(Inner {
				router: parts.router,
				loader: parts.loader,
				commands: parts.commands,
				push: parts.push,
				state: parts.state,
				fields,
				status: watch::Sender::new(InstanceStatus::Idle),
				events,
				generations: GenerationClock::new(),
				sender: Mutex::new(Some(sender)),
			}),
		}
	}

	/// Handles one UI event.
	pub async fn dispatch(&self, event: UiEvent) -> Result<Dispatched> {
		match event {
			UiEvent::FieldChange {
				field_key,
				value,
				bind_path,
			} => {
				self.field_change(field_key, value, bind_path)?;
				Ok(Dispatched::Queued)
			}
			UiEvent::ActionClick {
				action_id,
				params,
				block_id,
			} => self.action_click(&action_id, params, block_id).await.map(Dispatched::Action),
			UiEvent::InstanceSwitch { instance_id } => self.switch_instance(instance_id, None).await.map(Dispatched::Switched),
		}
	}

	/// Queues a field change for the active instance.
	///
	/// The store is not touched; the server answers with a pushed patch.
	pub fn field_change(&self, field_key: String, value: Value, bind_path: Option<String>) -> Result<()> {
		let store = self.inner.router.store();
		let instance_id = store.instance_id().ok_or(PipelineError::NoActiveInstance)?;
		debug!(%instance_id, field_key = %field_key, "pipeline.field_change");
		let change = FieldChange {
			instance_id: instance_id.clone(),
			field_key: field_key.clone(),
			value,
			bind_path,
			page_key: store.page_key(),
		};
		self.inner.fields.schedule((instance_id, field_key), change);
		Ok(())
	}

	/// Sends an action and applies its response.
	///
	/// The response is applied to the instance the action was sent from. When that
	/// instance is no longer active, only its cached copy is updated and any
	/// navigation is skipped.
	pub async fn action_click(
		&self,
		action_id: &str,
		params: Option<Map<String, Value>>,
		block_id: Option<String>,
	) -> Result<ActionOutcome> {
		let store = self.inner.router.store();
		let origin = store.instance_id();
		let params = params.unwrap_or_else(|| store.params());
		let request = json!({
			"instanceId": origin,
			"actionId": action_id,
			"blockId": block_id,
			"params": params,
		});
		info!(action_id, "pipeline.action_click");
		let response = self.inner.commands.send_command(ACTION_CLICK, request).await?;

		let active = store.instance_id() == origin;
		if !active {
			debug!(action_id, origin = ?origin, "pipeline.action_origin_inactive");
		}

		let mut applied = false;
		if let Some(value) = response.schema.clone().filter(|schema| !schema.is_null()) {
			let schema = Schema::from_value(value)?;
			schema.validate()?;
			applied |= self.apply_action_schema(origin.as_ref(), active, schema);
		}
		match response.data_field("patch") {
			Some(Value::Object(patch)) => applied |= self.apply_action_patch(origin.as_ref(), active, patch)?,
			Some(Value::Null) | None => {}
			Some(other) => {
				return Err(PipelineError::InvalidResponse(format!("patch must be an object, got {other}")));
			}
		}

		let navigated_to = response
			.data_field("navigate_to")
			.and_then(Value::as_str)
			.map(InstanceId::from)
			.filter(|_| active);
		if let Some(target) = &navigated_to {
			debug!(action_id, instance_id = %target, "pipeline.navigate");
			self.switch_instance(target.clone(), None).await?;
		}

		Ok(ActionOutcome {
			response,
			applied,
			navigated_to,
		})
	}

	fn apply_action_schema(&self, origin: Option<&InstanceId>, active: bool, schema: Schema) -> bool {
		let router = &self.inner.router;
		if active {
			router.store().set_schema(schema);
			return true;
		}
		match origin {
			Some(origin) if router.instances().contains(origin) => {
				router.instances().set(origin.clone(), Arc::new(schema));
				true
			}
			_ => {
				debug!(origin = ?origin, "pipeline.action_schema_dropped");
				false
			}
		}
	}

	fn apply_action_patch(&self, origin: Option<&InstanceId>, active: bool, patch: &Patch) -> Result<bool> {
		let router = &self.inner.router;
		if active {
			return Ok(router.store().apply_patch(patch)?);
		}
		let applied = match origin {
			Some(origin) => router.instances().apply_patch(origin, patch)?,
			None => false,
		};
		if !applied {
			debug!(origin = ?origin, "pipeline.action_patch_dropped");
		}
		Ok(applied)
	}

	/// Makes `instance` active.
	///
	/// Pending field changes of other instances are flushed first. The pointer is
	/// persisted and the push socket re-pointed before the schema loads. An
	/// `embedded` schema skips the loader.
	pub async fn switch_instance(&self, instance: InstanceId, embedded: Option<Schema>) -> Result<InstanceStatus> {
		let inner = &self.inner;
		let generation = inner.generations.next();
		let store = inner.router.store();
		let previous = store.instance_id();
		info!(instance_id = %instance, ?previous, generation, "pipeline.switch");

		let flushed = inner.fields.flush_where(|(owner, _)| *owner != instance);
		if flushed > 0 {
			debug!(flushed, "pipeline.flushed_fields");
		}
		if let Err(err) = inner.state.save_current(&instance) {
			warn!(instance_id = %instance, error = %err, "pipeline.persist_failed");
		}
		inner.status.send_replace(InstanceStatus::Loading {
			instance: instance.clone(),
		});
		let _ = inner.events.send(InstanceEvent::Switched {
			from: previous,
			to: instance.clone(),
		});

		inner.router.begin_load(instance.clone());
		inner.push.set_instance(instance.clone()).await;

		let loaded: Result<(Schema, LoadOrigin)> = match embedded {
			Some(schema) => match schema.validate() {
				Ok(()) => Ok((schema, LoadOrigin::Network)),
				Err(err) => Err(err.into()),
			},
			None => match inner.loader.load_schema(&instance).await {
				Ok(loaded) => Ok((Schema::clone(&loaded.schema), loaded.origin)),
				Err(err) => Err(err.into()),
			},
		};

		if !inner.generations.is_current(generation) {
			debug!(instance_id = %instance, generation, "pipeline.switch_superseded");
			return Ok(self.status());
		}

		match loaded {
			Ok((schema, origin)) => {
				let stale = origin == LoadOrigin::Stale;
				// The outgoing schema stays embeddable from the new one.
				if let (Some(outgoing), Some(current)) = (store.instance_id(), store.schema())
					&& outgoing != instance
				{
					inner.router.instances().set(outgoing, current);
				}
				let caught_up = inner.router.finish_load(instance.clone(), schema);
				if caught_up > 0 {
					debug!(instance_id = %instance, caught_up, "pipeline.buffered_patches_applied");
				}
				let status = InstanceStatus::Ready {
					instance: instance.clone(),
					stale,
				};
				inner.status.send_replace(status.clone());
				let _ = inner.events.send(InstanceEvent::Ready { instance, stale });
				Ok(status)
			}
			Err(err) => {
				inner.router.abandon_load(&instance);
				let message = err.to_string();
				warn!(instance_id = %instance, error = %message, "pipeline.load_failed");
				inner.status.send_replace(InstanceStatus::Error {
					instance: instance.clone(),
					message: message.clone(),
				});
				let _ = inner.events.send(InstanceEvent::Failed { instance, message });
				Err(err)
			}
		}
	}

	/// Sends all pending field changes now.
	pub fn flush_fields(&self) -> usize {
		self.inner.fields.flush_all()
	}

	/// Sends all pending field changes, stops accepting new ones, and waits up to
	/// `limit` for the sender to deliver them.
	///
	/// Returns how many were pending.
	pub async fn close_fields(&self, limit: Duration) -> usize {
		let flushed = self.inner.fields.close();
		let sender = self.inner.sender.lock().take();
		if let Some(sender) = sender
			&& tokio::time::timeout(limit, sender).await.is_err()
		{
			warn!(flushed, limit_ms = limit.as_millis() as u64, "pipeline.field_drain_timeout");
		}
		flushed
	}

	/// Number of field changes waiting out their window.
	pub fn pending_fields(&self) -> usize {
		self.inner.fields.pending_len()
	}

	/// Current lifecycle status.
	pub fn status(&self) -> InstanceStatus {
		self.inner.status.borrow().clone()
	}

	/// Subscribes to lifecycle status changes.
	pub fn watch_status(&self) -> watch::Receiver<InstanceStatus> {
		self.inner.status.subscribe()
	}

	/// Subscribes to instance transition events.
	pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
		self.inner.events.subscribe()
	}
}

async fn send_field_changes(mut due: mpsc::UnboundedReceiver<FieldChange>, sink: Arc<dyn EventSink>) {
	while let Some(change) = due.recv().await {
		let payload = change.payload();
		match sink.send_event(FIELD_CHANGE, payload, change.page_key.clone()).await {
			Ok(()) => debug!(instance_id = %change.instance_id, field_key = %change.field_key, "pipeline.field_sent"),
			Err(err) => warn!(
				instance_id = %change.instance_id,
				field_key = %change.field_key,
				error = %err,
				"pipeline.field_send_failed"
			),
		}
	}
}
