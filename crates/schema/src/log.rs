use std::collections::VecDeque;

use chrono::{SecondsFormat, Utc};

use crate::Patch;
use crate::model::PatchRecord;

/// Maximum number of records a [`PatchLog`] retains.
pub const PATCH_LOG_CAPACITY: usize = 256;

/// Bounded audit log of applied patches.
#[derive(Debug, Clone)]
pub struct PatchLog {
	records: VecDeque<PatchRecord>,
	next_id: u64,
	capacity: usize,
}

impl Default for PatchLog {
	fn default() -> Self {
		Self::with_capacity(PATCH_LOG_CAPACITY)
	}
}

impl PatchLog {
	/// Creates an empty log retaining at most `capacity` records.
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			records: VecDeque::with_capacity(capacity.min(PATCH_LOG_CAPACITY)),
			next_id: 1,
			capacity: capacity.max(1),
		}
	}

	/// Appends `patch`, evicting the oldest record when full. Returns the new record id.
	pub fn record(&mut self, patch: Patch) -> u64 {
		let id = self.next_id;
		self.next_id += 1;
		if self.records.len() == self.capacity {
			self.records.pop_front();
		}
		self.records.push_back(PatchRecord {
			id,
			timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
			patch,
		});
		id
	}

	/// Retained records, oldest first.
	pub fn records(&self) -> Vec<PatchRecord> {
		self.records.iter().cloned().collect()
	}

	/// Record with `id`, if still retained.
	pub fn get(&self, id: u64) -> Option<&PatchRecord> {
		self.records.iter().find(|r| r.id == id)
	}

	/// Number of retained records.
	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Returns true when no records are retained.
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Drops all records; ids keep increasing.
	pub fn clear(&mut self) {
		self.records.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_increase_and_oldest_is_evicted() {
		let mut log = PatchLog::with_capacity(2);
		assert_eq!(log.record(Patch::new()), 1);
		assert_eq!(log.record(Patch::new()), 2);
		assert_eq!(log.record(Patch::new()), 3);
		let ids: Vec<_> = log.records().iter().map(|r| r.id).collect();
		assert_eq!(ids, vec![2, 3]);
		assert!(log.get(1).is_none());
		log.clear();
		assert!(log.is_empty());
		assert_eq!(log.record(Patch::new()), 4);
		assert!(log.get(4).unwrap().timestamp.ends_with('Z'));
	}
}
