// ABOUTME: Run driver: pulls batches from the scan, migrates items one by one, appends audit rows.
// ABOUTME: Stops cooperatively after the current item when the interrupt flag is raised.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use keyshift_core::KeyValueStore;
use keyshift_store::{AuditLog, AuditLogError, CheckpointStore};
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;
use ulid::Ulid;

use crate::config::MigrationConfig;
use crate::engine::{Disposition, MigrationEngine, MigrationOutcome};
use crate::scan::{ScanCursor, ScanError};

/// Errors that end a run early. Item-level failures never show up here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("audit log error: {0}")]
    AuditLog(#[from] AuditLogError),

    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
}

/// Counters for one run.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub run_id: Ulid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub interrupted: bool,
    pub audit_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Summary {
    fn start(audit_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            run_id: Ulid::new(),
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            interrupted: false,
            audit_path,
            started_at: now,
            finished_at: now,
        }
    }

    fn record(&mut self, outcome: &MigrationOutcome) {
        self.total += 1;
        match outcome.disposition() {
            Disposition::Migrated => self.succeeded += 1,
            Disposition::Skipped => self.skipped += 1,
            Disposition::Failed => self.failed += 1,
        }
    }
}

/// Migrate every item of `table`, resuming from the saved checkpoint unless
/// `config.reset_scan` is set.
pub async fn run<T: KeyValueStore + ?Sized>(
    table: &T,
    config: &MigrationConfig,
    interrupt: &AtomicBool,
) -> Result<Summary, RunError> {
    let mut summary = Summary::start(config.audit_path.clone());
    let span = tracing::info_span!("migration", run_id = %summary.run_id, table = %config.table);

    async move {
        let mut audit = AuditLog::open(&config.audit_path)?;
        let checkpoint = CheckpointStore::new(&config.scan.checkpoint_path);
        let mut scan = ScanCursor::open(table, &checkpoint, &config.scan, config.reset_scan)?;
        let engine = MigrationEngine::new(table, config.sequence_attr.clone());

        tracing::info!(
            "migrating {} ({} / {}), audit: {}",
            config.table,
            config.keys.partition_key,
            config.keys.sort_key,
            config.audit_path.display()
        );

        let mut batches = 0usize;
        let mut stopped_mid_batch = false;
        'scan: while !interrupt.load(Ordering::SeqCst) {
            let Some(batch) = scan.next_batch().await? else {
                break;
            };
            batches += 1;

            for (index, item) in batch.iter().enumerate() {
                let outcome = engine.migrate(item).await;
                audit.append(&outcome.record)?;
                summary.record(&outcome);

                if interrupt.load(Ordering::SeqCst) {
                    stopped_mid_batch = index + 1 < batch.len();
                    break 'scan;
                }
            }

            tracing::info!(
                "batch {}: {} items | total {} | ok {} | failed {} | skipped {}",
                batches,
                batch.len(),
                summary.total,
                summary.succeeded,
                summary.failed,
                summary.skipped
            );
        }

        if interrupt.load(Ordering::SeqCst) && !stopped_mid_batch {
            scan.checkpoint_completed_page()?;
        }
        if interrupt.load(Ordering::SeqCst) && !scan.is_finished() {
            summary.interrupted = true;
            tracing::warn!("interrupted; resume point is the last saved checkpoint");
        }

        summary.finished_at = Utc::now();
        tracing::info!(
            "finished {} items | ok {} | failed {} | skipped {} | audit: {}",
            summary.total,
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.audit_path.display()
        );
        Ok::<_, RunError>(summary)
    }
    .instrument(span)
    .await
}
