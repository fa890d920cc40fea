//! # Snapshot Persistence
//!
//! Durable copy of the store, rewritten in full after every successful
//! insert and read back once at startup.
//!
//! ## Recovery Model:
//! - **Full overwrite**: every save writes the complete sequence, so a
//!   successful load always reflects the last successful save.
//! - **Atomic replace**: the JSON document is written to a temporary file in
//!   the target directory, fsynced, and renamed over the target. A crash
//!   mid-write leaves the previous snapshot in place.
//! - **Never fatal**: `load` degrades to an empty history and `save` reports a
//!   plain `bool`; the in-memory store stays authoritative either way.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::core::record::PetRecord;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to replace snapshot {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Load/save seam between the tracker and durable storage.
pub trait Persistence: Send + Sync {
    /// The last saved sequence, or an empty one if there is none to read.
    fn load(&self) -> Vec<PetRecord>;

    /// Overwrites the durable copy with `records`. Returns `false` on failure.
    fn save(&self, records: &[PetRecord]) -> bool;
}

/// # JSON File Snapshot
///
/// Stores the history as a single pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Same as [`Persistence::save`] but keeps the error.
    pub fn try_save(&self, records: &[PetRecord]) -> Result<(), PersistenceError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;

        let tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, records)?;
            writer.flush().map_err(|e| self.io_err(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;

        tmp.persist(&self.path).map_err(|e| PersistenceError::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

impl Persistence for JsonFileStore {
    fn load(&self) -> Vec<PetRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No snapshot at {}. Starting with an empty history.", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                log::warn!("Failed to read snapshot {}: {}. Starting with an empty history.", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<PetRecord>>(&content) {
            Ok(records) => {
                log::info!("Loaded {} pet records from {}", records.len(), self.path.display());
                records
            }
            Err(e) => {
                log::warn!("Malformed snapshot {}: {}. Starting with an empty history.", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn save(&self, records: &[PetRecord]) -> bool {
        match self.try_save(records) {
            Ok(()) => {
                log::debug!("Saved {} pet records to {}", records.len(), self.path.display());
                true
            }
            Err(e) => {
                log::error!("Failed to save pet records: {}", e);
                false
            }
        }
    }
}
