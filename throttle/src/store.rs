//! Durable storage of the [`StatusRecord`].
//!
//! A saved record always describes a started throttler. Stopping clears the store: an absent
//! record is how "not running" looks on disk.

use std::{
    fmt::Debug,
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::status::StatusRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt status record: {0}")]
    Corrupt(#[source] serde_json::Error),
    #[error("inconsistent status record: {0:?}")]
    Inconsistent(StatusRecord),
    #[error("failed to encode status record: {0}")]
    Encode(#[source] serde_json::Error),
}

impl StoreError {
    /// Whether the stored record is unusable, as opposed to the storage being unreachable.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt(_) | Self::Inconsistent(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage for the status record. The controller is its only writer.
pub trait StatusStore: Debug + Send {
    /// Reads the record. `Ok(None)` if none is stored.
    fn load(&self) -> Result<Option<StatusRecord>>;

    /// Stores `record`, replacing any previous one. Once this returns, the record is committed.
    fn save(&self, record: &StatusRecord) -> Result<()>;

    /// Removes the record. Clearing an empty store succeeds.
    fn clear(&self) -> Result<()>;
}

fn decode(bytes: &[u8]) -> Result<StatusRecord> {
    let record: StatusRecord = serde_json::from_slice(bytes).map_err(StoreError::Corrupt)?;
    if !record.is_consistent() {
        return Err(StoreError::Inconsistent(record));
    }

    Ok(record)
}

fn encode(record: &StatusRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(StoreError::Encode)
}

/// Keeps the record as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusStore for FileStore {
    fn load(&self) -> Result<Option<StatusRecord>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        decode(&bytes).map(Some)
    }

    fn save(&self, record: &StatusRecord) -> Result<()> {
        let bytes = encode(record)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write aside and rename, so a crash never leaves a half-written record behind.
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = ?self.path, "status record saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = ?self.path, "status record removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the record in memory, as the JSON text a [`FileStore`] would write. Clones share the
/// same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    raw: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored JSON text, if any.
    pub fn raw(&self) -> Option<Vec<u8>> {
        self.raw.lock().clone()
    }

    /// Replaces the stored JSON text, valid or not.
    pub fn set_raw(&self, raw: impl Into<Vec<u8>>) {
        *self.raw.lock() = Some(raw.into());
    }
}

impl StatusStore for MemoryStore {
    fn load(&self) -> Result<Option<StatusRecord>> {
        self.raw.lock().as_deref().map(decode).transpose()
    }

    fn save(&self, record: &StatusRecord) -> Result<()> {
        let bytes = encode(record)?;
        *self.raw.lock() = Some(bytes);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.raw.lock().take();
        Ok(())
    }
}
