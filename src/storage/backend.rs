//! Pluggable storage backends. The session layer never touches a platform
//! store directly; it goes through [`StorageBackend`] so the durable and
//! tab-scoped tiers can be swapped per target (a JSON file on desktop, an
//! in-memory map in tests or for tab-local state).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend rejected the operation: {0}")]
    Rejected(String),
}

/// A string key/value store. Implementations may fail on any operation;
/// callers above [`crate::storage::KeyValueStore`] never see those failures.
pub trait StorageBackend: Send + Sync {
    /// # Errors
    /// Returns an error when the backing store cannot accept the write.
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// # Errors
    /// Returns an error when the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// # Errors
    /// Returns an error when the backing store cannot be modified.
    fn remove(&self, key: &str) -> Result<(), BackendError>;
}

/// Infallible in-process backend. The default tab-scoped tier, and the
/// backend of choice in tests.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Durable backend persisting all entries as one JSON object in a single
/// file. Every operation is read-modify-write against the file, which keeps
/// the backend stateless between calls; the scale of a credential store does
/// not warrant more.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, String>, BackendError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw)
            .map_err(|e| BackendError::Rejected(format!("malformed backing file: {e}")))
    }

    fn store(&self, entries: &HashMap<String, String>) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string(entries)
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.store(&entries)
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.load()?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.store(&entries)?;
        }
        Ok(())
    }
}
