// ABOUTME: Migration layer for keyshift: configuration, checkpointed scan, per-item engine, run driver.
// ABOUTME: `run` is the entry point the CLI calls with a table handle and a MigrationConfig.

pub mod config;
pub mod engine;
pub mod runner;
pub mod scan;

pub use config::{ConfigError, FileConfig, MigrationConfig, ScanSettings};
pub use engine::{Disposition, FailureReason, MigrationEngine, MigrationOutcome, MigrationState};
pub use runner::{RunError, Summary, run};
pub use scan::{ScanCursor, ScanError};
