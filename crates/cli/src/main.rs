//! `schemasync` command line client.
//!
//! Boots a [`SyncClient`] against the configured backend and either streams its
//! state (`watch`) or runs one operation and exits.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use schemasync_loader::HttpApi;
use schemasync_runtime::{ClientConfig, InstanceEvent, SyncClient};
use schemasync_schema::InstanceId;
use serde_json::{Map, Value};
use tracing::info;

/// Schema sync client.
#[derive(Parser, Debug)]
#[command(name = "schemasync")]
#[command(about = "Keep a declarative UI schema in sync with its backend")]
struct Args {
	/// Config file (defaults to $SCHEMASYNC_CONFIG or the platform config dir)
	#[arg(short, long, value_name = "PATH", global = true)]
	config: Option<PathBuf>,

	/// Instance to open instead of the persisted one
	#[arg(short, long, value_name = "ID", global = true)]
	instance: Option<String>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Open the instance and stream status and schema changes until Ctrl-C
	Watch,
	/// List instances known to the backend
	Instances,
	/// Print the schema of an instance
	Schema {
		/// Instance id
		id: String,
	},
	/// Print the server patch log of the active instance
	Patches,
	/// Re-apply a logged patch to the active instance
	Replay {
		/// Patch id
		id: u64,
	},
	/// Trigger an action on the active instance
	Action {
		/// Action id
		id: String,
		/// Params as a JSON object (defaults to the schema's state.params)
		#[arg(long, value_name = "JSON")]
		params: Option<String>,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let config = ClientConfig::load_or_default(args.config.as_deref()).context("loading config")?;
	let instance = args.instance.map(InstanceId::from);

	match args.command {
		Command::Instances => {
			let api = HttpApi::new(&config.http_base, config.fetch_timeout())?;
			for summary in api.list_instances().await? {
				let extra = Value::Object(summary.extra);
				println!("{}\t{}", summary.instance_id, extra);
			}
		}
		Command::Schema { id } => {
			let api = HttpApi::new(&config.http_base, config.fetch_timeout())?;
			let schema = api.fetch_schema(&InstanceId::from(id)).await?;
			println!("{}", serde_json::to_string_pretty(schema.as_value())?);
		}
		Command::Watch => watch(config, instance).await?,
		Command::Patches => {
			let client = boot(config, instance).await?;
			for record in client.patch_history().await? {
				println!("{}\t{}\t{}", record.id, record.timestamp, Value::Object(record.patch));
			}
			client.shutdown().await;
		}
		Command::Replay { id } => {
			let client = boot(config, instance).await?;
			let patch = client.replay_patch(id).await?;
			println!("{}", serde_json::to_string_pretty(&patch)?);
			client.shutdown().await;
		}
		Command::Action { id, params } => {
			let params = params.as_deref().map(parse_params).transpose()?;
			let client = boot(config, instance).await?;
			client.commands().wait_connected().await.context("command socket unavailable")?;
			let outcome = client.pipeline().action_click(&id, params, None).await?;
			if let Some(data) = &outcome.response.data {
				println!("{}", serde_json::to_string_pretty(data)?);
			}
			if let Some(target) = &outcome.navigated_to {
				println!("navigated to {target}");
			}
			client.shutdown().await;
		}
	}

	Ok(())
}

async fn boot(config: ClientConfig, instance: Option<InstanceId>) -> anyhow::Result<SyncClient> {
	let client = SyncClient::from_config(config)?;
	if client.start(instance).await?.is_none() {
		bail!("no instance to open: pass --instance or set default_instance");
	}
	Ok(client)
}

async fn watch(config: ClientConfig, instance: Option<InstanceId>) -> anyhow::Result<()> {
	let client = SyncClient::from_config(config)?;
	let mut events = client.pipeline().subscribe();
	let mut schemas = client.store().watch();
	if let Some(started) = client.start(instance).await? {
		info!(instance_id = %started, "watch.started");
	}
	print_schema(schemas.borrow_and_update().as_deref());

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			event = events.recv() => match event {
				Ok(InstanceEvent::Switched { from, to }) => {
					println!("switch {} -> {to}", from.map(|id| id.to_string()).unwrap_or_else(|| "-".into()));
				}
				Ok(InstanceEvent::Ready { instance, stale }) => {
					println!("ready {instance}{}", if stale { " (stale)" } else { "" });
				}
				Ok(InstanceEvent::Failed { instance, message }) => println!("failed {instance}: {message}"),
				Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "watch.events_lagged");
				}
				Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
			},
			changed = schemas.changed() => {
				if changed.is_err() {
					break;
				}
				print_schema(schemas.borrow_and_update().as_deref());
			}
		}
	}

	client.shutdown().await;
	Ok(())
}

fn print_schema(schema: Option<&schemasync_schema::Schema>) {
	let Some(schema) = schema else {
		println!("schema -");
		return;
	};
	let version = schema.get("meta.schemaVersion").cloned().unwrap_or(Value::Null);
	println!(
		"schema page={} version={} params={}",
		schema.page_key().unwrap_or("-"),
		version,
		Value::Object(schema.params())
	);
}

fn parse_params(text: &str) -> anyhow::Result<Map<String, Value>> {
	match serde_json::from_str(text).context("--params is not valid JSON")? {
		Value::Object(map) => Ok(map),
		other => bail!("--params must be a JSON object, got {other}"),
	}
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("schemasync=debug,info")
			} else {
				EnvFilter::new("warn")
			}
		})
	};

	// SCHEMASYNC_LOG_DIR keeps logs off the terminal the output goes to.
	if let Some(log_dir) = std::env::var("SCHEMASYNC_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("schemasync.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_target(true);
			tracing_subscriber::registry().with(filter()).with(file_layer).init();
			tracing::info!(path = ?log_path, "tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt()
		.with_env_filter(filter())
		.with_writer(std::io::stderr)
		.init();
}
