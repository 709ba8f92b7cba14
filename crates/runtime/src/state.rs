//! Durable client state: the current instance pointer.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use schemasync_schema::InstanceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StateError {
	/// Filesystem failure.
	#[error("I/O error on {path}: {error}")]
	Io {
		/// File or directory involved.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},
	/// The state file is not valid JSON.
	#[error("corrupt state file {path}: {error}")]
	Decode {
		/// State file.
		path: PathBuf,
		/// Decoder error.
		error: serde_json::Error,
	},
	/// Encoding failed.
	#[error("failed to encode state: {0}")]
	Encode(#[from] serde_json::Error),
}

/// Storage for the current instance pointer.
pub trait InstanceStateStore: Send + Sync + 'static {
	/// Reads the persisted instance, if any.
	fn load_current(&self) -> Result<Option<InstanceId>, StateError>;

	/// Persists `instance` as current.
	fn save_current(&self, instance: &InstanceId) -> Result<(), StateError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
	#[serde(default)]
	current_instance: Option<InstanceId>,
}

/// [`InstanceStateStore`] backed by `state.json` in a directory.
///
/// Writes go to a temp file in the same directory and are renamed into place, so
/// a crash never leaves a torn file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
	dir: PathBuf,
	path: PathBuf,
}

impl FileStateStore {
	/// Store in `dir`. The directory is created on first save.
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		let dir = dir.into();
		let path = dir.join("state.json");
		Self { dir, path }
	}

	/// Path of the state file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
		move |error| StateError::Io {
			path: path.to_path_buf(),
			error,
		}
	}
}

impl InstanceStateStore for FileStateStore {
	fn load_current(&self) -> Result<Option<InstanceId>, StateError> {
		let bytes = match std::fs::read(&self.path) {
			Ok(bytes) => bytes,
			Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
			Err(error) => return Err(Self::io(&self.path)(error)),
		};
		let state: StateFile = serde_json::from_slice(&bytes).map_err(|error| StateError::Decode {
			path: self.path.clone(),
			error,
		})?;
		Ok(state.current_instance)
	}

	fn save_current(&self, instance: &InstanceId) -> Result<(), StateError> {
		std::fs::create_dir_all(&self.dir).map_err(Self::io(&self.dir))?;
		let body = serde_json::to_vec_pretty(&StateFile {
			current_instance: Some(instance.clone()),
		})?;
		let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(Self::io(&self.dir))?;
		tmp.write_all(&body).map_err(Self::io(tmp.path()))?;
		tmp.as_file().sync_all().map_err(Self::io(&self.path))?;
		tmp.persist(&self.path).map_err(|err| Self::io(&self.path)(err.error))?;
		tracing::debug!(instance_id = %instance, path = %self.path.display(), "state.saved");
		Ok(())
	}
}

/// In-memory [`InstanceStateStore`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
	current: Mutex<Option<InstanceId>>,
	saves: AtomicUsize,
}

impl MemoryStateStore {
	/// Store pre-seeded with `instance`.
	pub fn with_current(instance: impl Into<InstanceId>) -> Self {
		Self {
			current: Mutex::new(Some(instance.into())),
			saves: AtomicUsize::new(0),
		}
	}

	/// Number of successful saves.
	pub fn saves(&self) -> usize {
		self.saves.load(Ordering::SeqCst)
	}
}

impl InstanceStateStore for MemoryStateStore {
	fn load_current(&self) -> Result<Option<InstanceId>, StateError> {
		Ok(self.current.lock().clone())
	}

	fn save_current(&self, instance: &InstanceId) -> Result<(), StateError> {
		*self.current.lock() = Some(instance.clone());
		self.saves.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}
