//! Persisted export destination.
//!
//! The chosen export directory survives restarts as a small JSON record under
//! a well-known file name in the state directory. The record is opaque to
//! callers; it is re-validated on every resolve, because the directory may
//! have been moved, deleted, or made read-only since it was saved.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const RECORD_FILE: &str = "export_destination.json";

#[derive(Debug, Error)]
pub enum DestinationError {
    /// No destination has ever been saved.
    #[error("No export destination configured")]
    NotConfigured,

    /// The saved directory no longer exists or is not writable.
    #[error("Saved export destination is stale: {0}")]
    Stale(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record error: {0}")]
    Record(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct DestinationRecord {
    path: PathBuf,
}

/// Stores and re-validates the export destination directory.
pub struct DestinationStore {
    state_dir: PathBuf,
}

impl DestinationStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    fn record_path(&self) -> PathBuf {
        self.state_dir.join(RECORD_FILE)
    }

    /// Persist `dir` as the export destination.
    pub fn save(&self, dir: &Path) -> Result<(), DestinationError> {
        fs::create_dir_all(&self.state_dir)?;
        let record = DestinationRecord {
            path: dir.to_path_buf(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(self.record_path(), json)?;
        debug!(destination = %dir.display(), "export destination saved");
        Ok(())
    }

    /// Load the saved destination and verify it is still a writable
    /// directory. A stale record is reported, never silently repaired.
    pub fn resolve(&self) -> Result<PathBuf, DestinationError> {
        let record_path = self.record_path();
        let json = match fs::read_to_string(&record_path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DestinationError::NotConfigured)
            }
            Err(e) => return Err(e.into()),
        };
        let record: DestinationRecord = serde_json::from_str(&json)?;

        if !is_writable_dir(&record.path) {
            return Err(DestinationError::Stale(record.path));
        }
        Ok(record.path)
    }
}

/// Probe-write check: metadata flags lie on some filesystems, so actually
/// create and remove a marker file.
fn is_writable_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let probe = dir.join(".pixelpress-write-probe");
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
