// ABOUTME: Per-item migration state machine: build the new key, conditionally insert, verify, delete.
// ABOUTME: Every item yields exactly one audit record; failures are recorded, never raised to the run.

use keyshift_core::orderkey::{self, KeyError};
use keyshift_core::{
    AttributeValue, AuditRecord, Item, KeyValueStore, PutOutcome, StepStatus, StoreError,
};
use thiserror::Error;

/// Why an item stopped short of migration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("malformed sort key: {0}")]
    MalformedKey(KeyError),

    #[error("insert failed: {0}")]
    InsertFailed(StoreError),

    #[error("read-back failed: {0}")]
    VerifyFailed(StoreError),

    #[error("read-back expected sequence {expected}, found {found:?}")]
    VerificationMismatch {
        expected: i64,
        found: Option<String>,
    },

    #[error("delete failed: {0}")]
    DeleteFailed(StoreError),
}

/// States an item moves through. `Deleted` and `AlreadyMigrated` are the
/// successful terminal states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationState {
    Read,
    KeyBuilt,
    Inserted,
    Verified,
    Deleted,
    AlreadyMigrated,
    Failed(FailureReason),
}

/// How an item counts toward the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Migrated,
    Skipped,
    Failed,
}

/// Result of processing one item.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub state: MigrationState,
    pub record: AuditRecord,
}

impl MigrationOutcome {
    pub fn disposition(&self) -> Disposition {
        match self.state {
            MigrationState::Deleted => Disposition::Migrated,
            MigrationState::AlreadyMigrated => Disposition::Skipped,
            _ => Disposition::Failed,
        }
    }

    /// True when the item ended with exactly one copy under the new key.
    pub fn succeeded(&self) -> bool {
        self.disposition() != Disposition::Failed
    }
}

/// Drives items through the migration steps against one table.
pub struct MigrationEngine<'a, T: ?Sized> {
    table: &'a T,
    sequence_attr: String,
}

impl<'a, T: KeyValueStore + ?Sized> MigrationEngine<'a, T> {
    pub fn new(table: &'a T, sequence_attr: impl Into<String>) -> Self {
        Self {
            table,
            sequence_attr: sequence_attr.into(),
        }
    }

    /// Migrate one scanned item. Never retries; rerunning the migration is
    /// the retry mechanism, and the conditional insert keeps it idempotent.
    pub async fn migrate(&self, item: &Item) -> MigrationOutcome {
        let schema = self.table.schema();
        let pk = item.get(&schema.partition_key);
        let old_sk_value = item.get(&schema.sort_key);

        let mut record = AuditRecord::read(
            pk.map(ToString::to_string).unwrap_or_default(),
            old_sk_value.map(ToString::to_string).unwrap_or_default(),
        );

        let (Some(pk), Some(old_sk_value), Some(old_sk)) = (
            pk,
            old_sk_value,
            old_sk_value.and_then(AttributeValue::as_str),
        ) else {
            record.new_sk_created = StepStatus::FormatError;
            let reason = FailureReason::MalformedKey(KeyError::Malformed(record.old_sk.clone()));
            return self.fail(record, reason);
        };

        // KeyBuilt
        if orderkey::parse_migrated(old_sk).is_some() {
            record.new_sk_created = StepStatus::AlreadyMigrated;
            record.processed(pk.to_string(), old_sk);
            tracing::debug!("{} / {} already in the new format", pk, old_sk);
            return MigrationOutcome {
                state: MigrationState::AlreadyMigrated,
                record,
            };
        }

        let (new_sk, sequence) = match orderkey::rebuild(old_sk) {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                record.new_sk_created = StepStatus::FormatError;
                return self.fail(record, FailureReason::MalformedKey(e));
            }
        };
        record.new_sk_created = StepStatus::Yes;

        // Inserted
        let mut migrated = item.clone();
        migrated.insert(schema.sort_key.clone(), AttributeValue::S(new_sk.clone()));
        migrated.insert(self.sequence_attr.clone(), AttributeValue::number(sequence));

        match self.table.put_if_absent(&migrated).await {
            Ok(PutOutcome::Inserted) => record.new_sk_inserted = StepStatus::Yes,
            Ok(PutOutcome::AlreadyExists) => {
                tracing::debug!("{} / {} already inserted by an earlier run", pk, new_sk);
                record.new_sk_inserted = StepStatus::Duplicate;
            }
            Err(e) => {
                record.new_sk_inserted = StepStatus::Error(e.code.clone());
                return self.fail(record, FailureReason::InsertFailed(e));
            }
        }

        // Verified
        let new_key = schema.key(pk.clone(), AttributeValue::S(new_sk.clone()));
        match self.table.get(&new_key).await {
            Ok(Some(stored))
                if stored
                    .get(&self.sequence_attr)
                    .and_then(AttributeValue::as_exact_i64)
                    == Some(sequence) =>
            {
                record.new_sk_read = StepStatus::Yes;
            }
            Ok(stored) => {
                record.new_sk_read = StepStatus::SeqMismatch;
                let found = stored
                    .as_ref()
                    .and_then(|s| s.get(&self.sequence_attr))
                    .map(ToString::to_string);
                let reason = FailureReason::VerificationMismatch {
                    expected: sequence,
                    found,
                };
                return self.fail(record, reason);
            }
            Err(e) => {
                record.new_sk_read = StepStatus::Error(e.code.clone());
                return self.fail(record, FailureReason::VerifyFailed(e));
            }
        }

        // Deleted
        let old_key = schema.key(pk.clone(), old_sk_value.clone());
        if let Err(e) = self.table.delete(&old_key).await {
            record.old_sk_deleted = StepStatus::Error(e.code.clone());
            return self.fail(record, FailureReason::DeleteFailed(e));
        }
        record.old_sk_deleted = StepStatus::Yes;
        record.processed(pk.to_string(), new_sk.as_str());
        tracing::debug!("migrated {} / {} -> {}", pk, old_sk, new_sk);

        MigrationOutcome {
            state: MigrationState::Deleted,
            record,
        }
    }

    fn fail(&self, record: AuditRecord, reason: FailureReason) -> MigrationOutcome {
        tracing::warn!("item {} / {} not migrated: {}", record.pk, record.old_sk, reason);
        MigrationOutcome {
            state: MigrationState::Failed(reason),
            record,
        }
    }
}
