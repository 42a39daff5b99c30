//! Durable storage for the current task and the task history.
//!
//! The lifecycle only ever needs two operations: load the whole state and save
//! the whole state. Last write wins; there is no merge.
//!
//! # Implementations
//!
//! - [`JsonFileStore`]: a single pretty-printed JSON document on disk. Saves
//!   go through a temporary file in the same directory that is renamed over
//!   the target, so a concurrent load sees either the old or the new
//!   document, never a partial one.
//! - [`MemoryStore`]: keeps the state in memory; used by tests and embedders
//!   that do not want files.
//!
//! # Example
//!
//! ```no_run
//! use taskpulse::store::{JsonFileStore, TaskStore};
//!
//! let store = JsonFileStore::new("/home/ada/.taskpulse/tasks.json");
//! let state = store.load()?;
//! println!("history entries: {}", state.history.len());
//! # Ok::<(), taskpulse::store::StoreError>(())
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace};

use crate::types::TaskState;

/// Errors that can occur while loading or saving task state.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The store file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The store file does not contain a valid task document.
    #[error("corrupt task store {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The state could not be serialized.
    #[error("failed to serialize task state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("task store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence contract required by the lifecycle.
///
/// Implementations must make `save` atomic from the point of view of a
/// concurrent `load`.
pub trait TaskStore: Send + Sync {
    /// Loads the full state. A store that has never been written loads as
    /// [`TaskState::default`].
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backing storage cannot be read.
    fn load(&self) -> Result<TaskState, StoreError>;

    /// Replaces the full state.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the state could not be persisted; the
    /// previous state is then still in place.
    fn save(&self, state: &TaskState) -> Result<(), StoreError>;
}

impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    fn load(&self) -> Result<TaskState, StoreError> {
        (**self).load()
    }

    fn save(&self, state: &TaskState) -> Result<(), StoreError> {
        (**self).save(state)
    }
}

/// Task store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store for the given file path. Nothing is touched on disk
    /// until the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl TaskStore for JsonFileStore {
    fn load(&self) -> Result<TaskState, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(path = %self.path.display(), "Task store missing, starting empty");
                return Ok(TaskState::default());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            return Ok(TaskState::default());
        }

        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, state: &TaskState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.write_error(e))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| self.write_error(e))?;
        temp.write_all(&json).map_err(|e| self.write_error(e))?;
        temp.as_file().sync_all().map_err(|e| self.write_error(e))?;
        temp.persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        debug!(
            path = %self.path.display(),
            history_len = state.history.len(),
            has_current = state.current_task.is_some(),
            "Task store saved"
        );
        Ok(())
    }
}

/// Task store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<TaskState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `state`.
    #[must_use]
    pub fn with_state(state: TaskState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl TaskStore for MemoryStore {
    fn load(&self) -> Result<TaskState, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, state: &TaskState) -> Result<(), StoreError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Task, TaskStatus};
    use tempfile::TempDir;

    fn sample_state() -> TaskState {
        let mut finished = Task::new("Old".to_string(), None);
        finished.status = TaskStatus::Completed;
        finished.progress = 100;
        TaskState {
            current_task: Some(Task::new("Now".to_string(), Some("desc".to_string()))),
            history: vec![finished],
        }
    }

    #[test]
    fn missing_file_loads_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("tasks.json"));

        assert_eq!(store.load().unwrap(), TaskState::default());
    }

    #[test]
    fn empty_file_loads_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "  \n").unwrap();

        assert_eq!(JsonFileStore::new(path).load().unwrap(), TaskState::default());
    }

    #[test]
    fn save_then_load_preserves_state() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("tasks.json"));
        let state = sample_state();

        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("tasks.json");
        let store = JsonFileStore::new(&path);

        store.save(&TaskState::default()).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("tasks.json"));

        store.save(&sample_state()).unwrap();
        store.save(&TaskState::default()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn written_document_uses_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        JsonFileStore::new(&path).save(&sample_state()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["currentTask"]["name"], "Now");
        assert_eq!(raw["history"][0]["status"], "completed");
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(err.to_string().contains("tasks.json"));
    }

    #[test]
    fn unreadable_path_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be read as a file.
        let err = JsonFileStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), TaskState::default());

        let state = sample_state();
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn arc_store_delegates() {
        let inner = Arc::new(MemoryStore::with_state(sample_state()));
        let shared: Arc<MemoryStore> = Arc::clone(&inner);

        shared.save(&TaskState::default()).unwrap();
        assert_eq!(inner.load().unwrap(), TaskState::default());
    }
}
