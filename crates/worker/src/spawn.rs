use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

use crate::TaskClass;

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("schemasync-worker")
			.build()
			.expect("failed to build schemasync global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task tagged with a [`TaskClass`].
///
/// Uses the ambient tokio runtime when there is one, so tests running on a paused
/// current-thread runtime keep control of every timer.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(flavor = "current_thread")]
	async fn spawn_uses_ambient_runtime() {
		let handle = spawn(TaskClass::Background, async { 41 + 1 });
		assert_eq!(handle.await.unwrap(), 42);
	}
}
