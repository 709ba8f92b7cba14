//! Per-key trailing-edge debouncing.
//!
//! Each key owns at most one timer task. Scheduling a key again aborts its timer
//! and starts a new one holding the new value, so only the last value of a burst
//! is emitted. Emitted values arrive on the receiver returned by
//! [`Debouncer::new`], in firing order. After [`Debouncer::close`] the receiver
//! ends once the flushed values are read.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use schemasync_worker::TaskClass;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Slot<V> {
	seq: u64,
	value: V,
	timer: JoinHandle<()>,
}

struct Slots<K, V> {
	seq: u64,
	slots: HashMap<K, Slot<V>>,
}

/// Last-write-wins debouncer keyed by `K`.
pub struct Debouncer<K, V> {
	delay: Duration,
	state: Arc<Mutex<Slots<K, V>>>,
	tx: Mutex<Option<mpsc::UnboundedSender<V>>>,
}

impl<K, V> std::fmt::Debug for Debouncer<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Debouncer")
			.field("delay", &self.delay)
			.field("pending", &self.state.lock().slots.len())
			.finish()
	}
}

impl<K, V> Debouncer<K, V>
where
	K: Eq + Hash + Clone + Send + 'static,
	V: Send + 'static,
{
	/// Creates a debouncer and the receiver of its emitted values.
	pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<V>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let debouncer = Self {
			delay,
			state: Arc::new(Mutex::new(Slots {
				seq: 0,
				slots: HashMap::new(),
			})),
			tx: Mutex::new(Some(tx)),
		};
		(debouncer, rx)
	}

	/// Debounce window.
	pub fn delay(&self) -> Duration {
		self.delay
	}

	/// Replaces any pending value for `key` and restarts its timer.
	///
	/// Ignored once the debouncer is closed.
	pub fn schedule(&self, key: K, value: V) {
		let Some(tx) = self.sender() else {
			tracing::debug!("debounce.closed");
			return;
		};
		let mut state = self.state.lock();
		state.seq += 1;
		let seq = state.seq;
		let timer = schemasync_worker::spawn(
			TaskClass::Interactive,
			fire(Arc::clone(&self.state), key.clone(), seq, self.delay, tx),
		);
		if let Some(previous) = state.slots.insert(key, Slot { seq, value, timer }) {
			previous.timer.abort();
			tracing::trace!(seq, "debounce.replaced");
		}
	}

	/// Emits every pending value whose key matches `pred` now, in scheduling order.
	///
	/// Returns how many were emitted.
	pub fn flush_where(&self, pred: impl Fn(&K) -> bool) -> usize {
		let mut due: Vec<Slot<V>> = {
			let mut state = self.state.lock();
			let keys: Vec<K> = state.slots.keys().filter(|key| pred(key)).cloned().collect();
			keys.iter().filter_map(|key| state.slots.remove(key)).collect()
		};
		due.sort_by_key(|slot| slot.seq);
		let flushed = due.len();
		let tx = self.sender();
		for slot in due {
			slot.timer.abort();
			if let Some(tx) = &tx {
				let _ = tx.send(slot.value);
			}
		}
		flushed
	}

	/// Emits everything pending now.
	pub fn flush_all(&self) -> usize {
		self.flush_where(|_| true)
	}

	/// Emits everything pending and stops accepting values.
	///
	/// Returns how many were emitted.
	pub fn close(&self) -> usize {
		let flushed = self.flush_all();
		self.tx.lock().take();
		flushed
	}

	/// Drops everything pending without emitting.
	pub fn cancel_all(&self) {
		let drained: Vec<Slot<V>> = self.state.lock().slots.drain().map(|(_, slot)| slot).collect();
		for slot in drained {
			slot.timer.abort();
		}
	}

	/// Number of keys with a pending value.
	pub fn pending_len(&self) -> usize {
		self.state.lock().slots.len()
	}

	fn sender(&self) -> Option<mpsc::UnboundedSender<V>> {
		self.tx.lock().clone()
	}
}

async fn fire<K, V>(state: Arc<Mutex<Slots<K, V>>>, key: K, seq: u64, delay: Duration, tx: mpsc::UnboundedSender<V>)
where
	K: Eq + Hash,
{
	tokio::time::sleep(delay).await;
	let due = {
		let mut state = state.lock();
		match state.slots.get(&key) {
			Some(slot) if slot.seq == seq => state.slots.remove(&key),
			_ => None,
		}
	};
	if let Some(slot) = due {
		let _ = tx.send(slot.value);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(flavor = "current_thread", start_paused = true)]
	async fn burst_on_one_key_emits_only_the_last_value() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(750));
		for n in 1..=5 {
			debouncer.schedule("name", n);
			tokio::time::advance(Duration::from_millis(100)).await;
		}
		assert!(rx.try_recv().is_err());

		tokio::time::advance(Duration::from_millis(650)).await;
		assert_eq!(rx.recv().await, Some(5));
		tokio::time::advance(Duration::from_secs(5)).await;
		assert!(rx.try_recv().is_err());
		assert_eq!(debouncer.pending_len(), 0);
	}

	#[tokio::test(flavor = "current_thread", start_paused = true)]
	async fn keys_debounce_independently() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(750));
		debouncer.schedule("a", "a1");
		tokio::time::advance(Duration::from_millis(500)).await;
		debouncer.schedule("b", "b1");
		tokio::time::advance(Duration::from_millis(100)).await;
		debouncer.schedule("a", "a2");

		assert_eq!(rx.recv().await, Some("b1"));
		assert_eq!(rx.recv().await, Some("a2"));
	}

	#[tokio::test(flavor = "current_thread", start_paused = true)]
	async fn flush_emits_now_in_schedule_order() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(750));
		debouncer.schedule(("i1", "x"), 1);
		debouncer.schedule(("i2", "x"), 2);
		debouncer.schedule(("i1", "y"), 3);

		assert_eq!(debouncer.flush_where(|(instance, _)| *instance == "i1"), 2);
		assert_eq!(rx.try_recv().ok(), Some(1));
		assert_eq!(rx.try_recv().ok(), Some(3));

		tokio::time::advance(Duration::from_secs(1)).await;
		assert_eq!(rx.recv().await, Some(2));
		tokio::time::advance(Duration::from_secs(1)).await;
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test(flavor = "current_thread", start_paused = true)]
	async fn close_flushes_then_ends_the_stream() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(750));
		debouncer.schedule("a", 1);
		debouncer.schedule("b", 2);

		assert_eq!(debouncer.close(), 2);
		debouncer.schedule("c", 3);
		assert_eq!(debouncer.pending_len(), 0);

		assert_eq!(rx.recv().await, Some(1));
		assert_eq!(rx.recv().await, Some(2));
		assert_eq!(rx.recv().await, None);
	}

	#[tokio::test(flavor = "current_thread", start_paused = true)]
	async fn cancel_drops_pending() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(10));
		debouncer.schedule(1, ());
		debouncer.cancel_all();
		tokio::time::advance(Duration::from_secs(1)).await;
		assert!(rx.try_recv().is_err());
	}
}
