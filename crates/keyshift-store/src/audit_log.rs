// ABOUTME: Append-only CSV audit log with one row per processed item.
// ABOUTME: The header is written once when the file is created; rows are flushed and fsynced per append.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use keyshift_core::{AUDIT_FIELDS, AuditRecord};
use thiserror::Error;

/// Errors that can occur during audit log operations.
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// An append-only audit file.
pub struct AuditLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl AuditLog {
    /// Returns the path to the underlying CSV file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (or create) the audit file at `path`. Creates parent directories
    /// if needed and writes the header only when the file is new or empty.
    pub fn open(path: &Path) -> Result<Self, AuditLogError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let needs_header = match fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(AUDIT_FIELDS)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    /// Append one record and sync it to disk.
    pub fn append(&mut self, record: &AuditRecord) -> Result<(), AuditLogError> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Read every record from an audit file, in append order.
    pub fn read_all(path: &Path) -> Result<Vec<AuditRecord>, AuditLogError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;

        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }
}
