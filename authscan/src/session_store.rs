//! Durable single-slot record of the active scan.
//!
//! At most one [`PersistedSessionRecord`] exists at a time. It is written when
//! the service accepts a scan and removed when the scan completes, fails or is
//! stopped, so a restarted client can pick the scan up again.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The persisted description of the active scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionRecord {
    pub scan_id: String,
    pub target: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
}

/// Errors raised by session store backends
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not encode session record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session store lock poisoned")]
    Poisoned,
}

/// Typed access to the single durable session slot.
///
/// Only one actor mutates the slot, so implementations need no locking
/// discipline beyond last writer wins.
pub trait SessionStore: Send + Sync {
    /// Read the slot.
    fn get(&self) -> Result<Option<PersistedSessionRecord>, StoreError>;

    /// Overwrite the slot.
    fn set(&self, record: &PersistedSessionRecord) -> Result<(), StoreError>;

    /// Empty the slot. Clearing an empty slot is not an error.
    fn clear(&self) -> Result<(), StoreError>;

    /// Empty the slot only if it holds `scan_id`. Returns whether it did.
    fn clear_matching(&self, scan_id: &str) -> Result<bool, StoreError> {
        match self.get()? {
            Some(record) if record.scan_id == scan_id => {
                self.clear()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Session slot backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Result<Option<PersistedSessionRecord>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        match serde_json::from_str::<PersistedSessionRecord>(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(
                    "⚠️  Discarding unreadable session record at {}: {e}",
                    self.path.display()
                );
                self.clear()?;
                Ok(None)
            }
        }
    }

    fn set(&self, record: &PersistedSessionRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_string_pretty(record)?;
        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path).map_err(|e| self.io_error(e))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| self.io_error(e))?;
        drop(file);
        std::fs::rename(&temp_path, &self.path).map_err(|e| self.io_error(e))?;

        debug!(
            "💾 Session record for scan {} written to {}",
            record.scan_id,
            self.path.display()
        );
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("🧹 Session record removed from {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// In-memory session slot. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    slot: Arc<Mutex<Option<PersistedSessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose slot already holds `record`.
    pub fn with_record(record: PersistedSessionRecord) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(record))),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Result<Option<PersistedSessionRecord>, StoreError> {
        Ok(self.slot.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn set(&self, record: &PersistedSessionRecord) -> Result<(), StoreError> {
        *self.slot.lock().map_err(|_| StoreError::Poisoned)? = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().map_err(|_| StoreError::Poisoned)? = None;
        Ok(())
    }
}
