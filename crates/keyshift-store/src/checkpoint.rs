// ABOUTME: Single-slot scan checkpoint persisted as one JSON object mirroring the scan cursor.
// ABOUTME: Saves use atomic temp-file replace; unreadable or corrupt files load as "no checkpoint".

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use keyshift_core::Cursor;
use thiserror::Error;

/// Errors that can occur while writing or clearing the checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Owns the checkpoint file for one migration target.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `cursor`, replacing any earlier value. `None` or an empty
    /// cursor clears the slot.
    pub fn save(&self, cursor: Option<&Cursor>) -> Result<(), CheckpointError> {
        let cursor = match cursor {
            Some(c) if !c.is_empty() => c,
            _ => return self.clear(),
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_string(cursor)?;
        let tmp_path = self.path.with_extension("tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;

        // Best-effort: the rename already landed if the directory fsync fails.
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }

        tracing::debug!("checkpoint saved to {}", self.path.display());
        Ok(())
    }

    /// Load the persisted cursor. With `reset`, the slot is cleared first and
    /// None is returned.
    pub fn load(&self, reset: bool) -> Result<Option<Cursor>, CheckpointError> {
        if reset {
            self.clear()?;
            tracing::info!("scan checkpoint reset");
            return Ok(None);
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::warn!(
                    "checkpoint {} unreadable, starting from the beginning: {}",
                    self.path.display(),
                    e
                );
                return Ok(None);
            }
        };

        match serde_json::from_str::<Cursor>(&contents) {
            Ok(cursor) if cursor.is_empty() => Ok(None),
            Ok(cursor) => Ok(Some(cursor)),
            Err(e) => {
                tracing::warn!(
                    "checkpoint {} is corrupt, starting from the beginning: {}",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Remove the checkpoint file. A missing file is not an error.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
