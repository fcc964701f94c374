//! Policy as Code Snapshot Storage
//!
//! Durable persistence of the whole knowledge-base state as one opaque blob:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      SNAPSHOT STORAGE                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────┐   save_json    ┌───────────────┐     ┌─────────────┐ │
//! │  │  Engine  │───────────────►│               │────►│ state.json  │ │
//! │  │  State   │                │ SnapshotStore │     │ (+ .bak)    │ │
//! │  │          │◄───────────────│               │     └─────────────┘ │
//! │  └──────────┘ load_or_default└───────────────┘                     │
//! │                                      │                              │
//! │                                      ▼                              │
//! │                               ┌─────────────┐                       │
//! │                               │ MemoryStore │ (tests, dry runs)     │
//! │                               └─────────────┘                       │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure policy
//!
//! Storage never decides what a failure means. [`load_or_default`] is the one
//! place that turns a missing or unreadable snapshot into an empty state, and
//! it logs a warning when it does so.


use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Snapshot is corrupt: {0}")]
    Decode(#[source] serde_json::Error),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// Store Interface
// ============================================================================

/// An opaque, whole-state blob store.
pub trait SnapshotStore: Send + Sync {
    /// Returns `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError>;

    fn save(&self, blob: &[u8]) -> Result<(), PersistenceError>;

    fn clear(&self) -> Result<(), PersistenceError>;

    /// Human-readable location, used in log lines.
    fn location(&self) -> String;
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Configuration for the file-backed store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the snapshot file
    pub snapshot_path: PathBuf,
    /// Keep the previous snapshot next to the new one as `<name>.bak`
    pub keep_backup: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("./policyascode-state.json"),
            keep_backup: true,
        }
    }
}

impl StorageConfig {
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .snapshot_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".bak");
        self.snapshot_path.with_file_name(name)
    }
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Snapshot store backed by a single JSON file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the snapshot, so a crash mid-save leaves the previous snapshot intact.
pub struct JsonFileStore {
    config: StorageConfig,
}

impl JsonFileStore {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn parent_dir(&self) -> PathBuf {
        match self.config.snapshot_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        let path = &self.config.snapshot_path;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "loaded snapshot");
        Ok(Some(bytes))
    }

    fn save(&self, blob: &[u8]) -> Result<(), PersistenceError> {
        let path = &self.config.snapshot_path;
        let dir = self.parent_dir();
        std::fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;

        if self.config.keep_backup && path.exists() {
            let backup = self.config.backup_path();
            std::fs::copy(path, &backup).map_err(|e| PersistenceError::io(&backup, e))?;
        }

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        let tmp_path = tmp.path().to_path_buf();
        tmp.write_all(blob)
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        tmp.flush().map_err(|e| PersistenceError::io(&tmp_path, e))?;
        tmp.persist(path)
            .map_err(|e| PersistenceError::io(path, e.error))?;

        tracing::debug!(path = %path.display(), bytes = blob.len(), "saved snapshot");
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        for path in [self.config.snapshot_path.clone(), self.config.backup_path()] {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| PersistenceError::io(&path, e))?;
            }
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.config.snapshot_path.display().to_string()
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Volatile store, used by tests and `--no-save` runs.
#[derive(Default)]
pub struct MemoryStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. with a deliberately corrupt blob.
    pub fn with_blob(blob: impl Into<Vec<u8>>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blob.lock().is_none()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.blob.lock().clone())
    }

    fn save(&self, blob: &[u8]) -> Result<(), PersistenceError> {
        *self.blob.lock() = Some(blob.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        *self.blob.lock() = None;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Typed Helpers
// ============================================================================

/// Serialize `value` as pretty JSON and save it.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn SnapshotStore,
    value: &T,
) -> Result<(), PersistenceError> {
    let blob = serde_json::to_vec_pretty(value).map_err(PersistenceError::Encode)?;
    store.save(&blob)
}

/// Load and decode the snapshot, `None` if nothing was saved.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn SnapshotStore,
) -> Result<Option<T>, PersistenceError> {
    match store.load()? {
        Some(blob) => serde_json::from_slice(&blob)
            .map(Some)
            .map_err(PersistenceError::Decode),
        None => Ok(None),
    }
}

/// Load the snapshot, falling back to `T::default()` on any failure.
pub fn load_or_default<T: DeserializeOwned + Default>(store: &dyn SnapshotStore) -> T {
    match load_json(store) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(err) => {
            tracing::warn!(
                location = %store.location(),
                error = %err,
                "Failed to restore snapshot; starting from empty state"
            );
            T::default()
        }
    }
}

/// Convenience function to open a file-backed store at `path`.
pub fn open_store(path: impl AsRef<Path>) -> JsonFileStore {
    JsonFileStore::new(StorageConfig {
        snapshot_path: path.as_ref().to_path_buf(),
        ..Default::default()
    })
}
