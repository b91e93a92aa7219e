// ABOUTME: Persistence layer for keyshift: scan checkpoint, CSV audit log, and SQLite-backed table.
// ABOUTME: Everything here owns a file on disk; the migration crate wires them together.

pub mod audit_log;
pub mod checkpoint;
pub mod sqlite;

pub use audit_log::{AuditLog, AuditLogError};
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use sqlite::{SqliteError, SqliteTable};
