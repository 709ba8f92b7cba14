use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use schemasync_schema::{InstanceCache, InstanceId, Schema};
use serde_json::json;

use super::*;
use crate::SchemaSource;

enum Reply {
	Schema(Schema),
	Fail,
	Hang,
}

#[derive(Default)]
struct Scripted {
	replies: Mutex<HashMap<InstanceId, VecDeque<Reply>>>,
	calls: AtomicUsize,
}

impl Scripted {
	fn push(&self, id: &str, reply: Reply) {
		self.replies.lock().entry(InstanceId::from(id)).or_default().push_back(reply);
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl SchemaSource for Scripted {
	async fn fetch_schema(&self, instance: &InstanceId) -> Result<Schema> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let reply = self.replies.lock().get_mut(instance).and_then(VecDeque::pop_front);
		match reply {
			Some(Reply::Schema(schema)) => Ok(schema),
			Some(Reply::Hang) => {
				tokio::time::sleep(Duration::from_secs(60)).await;
				Err(LoaderError::Api("late".into()))
			}
			Some(Reply::Fail) | None => Err(LoaderError::Status {
				status: 503,
				body: "down".into(),
			}),
		}
	}
}

fn schema(version: i64) -> Schema {
	Schema::from_value(json!({"meta": {"schemaVersion": format!("v{version}")}, "state": {"params": {}}})).unwrap()
}

fn loader(source: &Arc<Scripted>) -> SchemaLoader {
	SchemaLoader::new(source.clone())
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn fetches_once_within_ttl_and_again_after() {
	let source = Arc::new(Scripted::default());
	source.push("x", Reply::Schema(schema(1)));
	source.push("x", Reply::Schema(schema(2)));
	let loader = loader(&source);
	let id = InstanceId::from("x");

	let first = loader.load_schema(&id).await.unwrap();
	assert_eq!(first.origin, LoadOrigin::Network);
	tokio::time::advance(Duration::from_secs(4 * 60)).await;
	let second = loader.load_schema(&id).await.unwrap();
	assert_eq!(second.origin, LoadOrigin::Cache);
	assert!(Arc::ptr_eq(&first.schema, &second.schema));
	assert_eq!(source.calls(), 1);

	tokio::time::advance(Duration::from_secs(60)).await;
	let third = loader.load_schema(&id).await.unwrap();
	assert_eq!(third.origin, LoadOrigin::Network);
	assert_eq!(third.schema.get("meta.schemaVersion"), Some(&json!("v2")));
	assert_eq!(source.calls(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn expired_entry_backs_up_a_failed_fetch() {
	let source = Arc::new(Scripted::default());
	source.push("x", Reply::Schema(schema(1)));
	source.push("x", Reply::Fail);
	source.push("x", Reply::Hang);
	let loader = loader(&source);
	let id = InstanceId::from("x");

	loader.load_schema(&id).await.unwrap();
	tokio::time::advance(DEFAULT_TTL).await;

	let failed = loader.load_schema(&id).await.unwrap();
	assert!(failed.cached());
	assert_eq!(failed.schema.get("meta.schemaVersion"), Some(&json!("v1")));

	let started = tokio::time::Instant::now();
	let timed_out = loader.load_schema(&id).await.unwrap();
	assert!(timed_out.cached());
	assert_eq!(started.elapsed(), DEFAULT_FETCH_TIMEOUT);
	assert_eq!(source.calls(), 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failures_without_cache_propagate() {
	let source = Arc::new(Scripted::default());
	source.push("slow", Reply::Hang);
	let loader = loader(&source);

	let err = loader.load_schema(&InstanceId::from("slow")).await.unwrap_err();
	assert!(matches!(err, LoaderError::Timeout { after, .. } if after == DEFAULT_FETCH_TIMEOUT));

	let err = loader.load_schema(&InstanceId::from("missing")).await.unwrap_err();
	assert!(matches!(err, LoaderError::Status { status: 503, .. }));
	assert!(!loader.is_cached(&InstanceId::from("missing")));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn preload_fills_instance_cache_and_reports_failures() {
	let source = Arc::new(Scripted::default());
	source.push("a", Reply::Schema(schema(1)));
	source.push("b", Reply::Fail);
	source.push("c", Reply::Schema(schema(3)));
	let loader = loader(&source);
	let cache = InstanceCache::new();
	let ids: Vec<InstanceId> = ["a", "b", "c"].into_iter().map(InstanceId::from).collect();

	let report = loader.preload_schemas(&ids, &cache).await;
	assert_eq!(report.loaded, vec![InstanceId::from("a"), InstanceId::from("c")]);
	assert_eq!(report.failed.len(), 1);
	assert_eq!(report.failed[0].0, InstanceId::from("b"));
	assert_eq!(cache.ids(), vec![InstanceId::from("a"), InstanceId::from("c")]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn clearing_forces_refetch() {
	let source = Arc::new(Scripted::default());
	for id in ["a", "b"] {
		source.push(id, Reply::Schema(schema(1)));
		source.push(id, Reply::Schema(schema(2)));
	}
	let loader = loader(&source);
	let (a, b) = (InstanceId::from("a"), InstanceId::from("b"));
	loader.load_schema(&a).await.unwrap();
	loader.load_schema(&b).await.unwrap();

	loader.clear_schema_cache(Some(&a));
	assert!(!loader.is_cached(&a));
	assert!(loader.is_cached(&b));
	assert_eq!(loader.load_schema(&a).await.unwrap().origin, LoadOrigin::Network);

	loader.clear_schema_cache(None);
	assert!(!loader.is_cached(&a) && !loader.is_cached(&b));
	assert_eq!(source.calls(), 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn invalid_schema_is_never_cached() {
	let duplicated = Schema::from_value(json!({
		"meta": {"schemaVersion": "v9"},
		"blocks": [{"id": "x", "type": "text"}, {"id": "x", "type": "text"}],
	}))
	.unwrap();
	let source = Arc::new(Scripted::default());
	source.push("fresh", Reply::Schema(duplicated.clone()));
	source.push("known", Reply::Schema(schema(1)));
	source.push("known", Reply::Schema(duplicated));
	let loader = loader(&source);

	let err = loader.load_schema(&InstanceId::from("fresh")).await.unwrap_err();
	assert!(matches!(err, LoaderError::InvalidSchema { .. }), "{err:?}");
	assert!(!loader.is_cached(&InstanceId::from("fresh")));

	let known = InstanceId::from("known");
	loader.load_schema(&known).await.unwrap();
	tokio::time::advance(DEFAULT_TTL).await;
	let fallback = loader.load_schema(&known).await.unwrap();
	assert!(fallback.cached());
	assert_eq!(fallback.schema.get("meta.schemaVersion"), Some(&json!("v1")));
}
