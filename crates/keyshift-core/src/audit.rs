// ABOUTME: Audit record types describing the processing history of one migrated item.
// ABOUTME: Step statuses render to the fixed vocabulary written into the audit CSV columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Column order of the audit file.
pub const AUDIT_FIELDS: [&str; 9] = [
    "pk",
    "old_sk",
    "read",
    "new_sk_created",
    "new_sk_inserted",
    "new_sk_read",
    "old_sk_deleted",
    "processed_pk",
    "processed_sk",
];

/// Status of a single step of the per-item migration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StepStatus {
    /// The step was never reached.
    #[default]
    Pending,
    Yes,
    /// The conditional put found the new key already present.
    Duplicate,
    FormatError,
    /// The sort key is already in the 13-digit format.
    AlreadyMigrated,
    SeqMismatch,
    /// The store rejected the call with this code.
    Error(String),
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => Ok(()),
            StepStatus::Yes => f.write_str("yes"),
            StepStatus::Duplicate => f.write_str("duplicate"),
            StepStatus::FormatError => f.write_str("format_error"),
            StepStatus::AlreadyMigrated => f.write_str("already_migrated"),
            StepStatus::SeqMismatch => f.write_str("seq_mismatch"),
            StepStatus::Error(code) => write!(f, "error:{}", code),
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(StepStatus::Pending),
            "yes" => Ok(StepStatus::Yes),
            "duplicate" => Ok(StepStatus::Duplicate),
            "format_error" => Ok(StepStatus::FormatError),
            "already_migrated" => Ok(StepStatus::AlreadyMigrated),
            "seq_mismatch" => Ok(StepStatus::SeqMismatch),
            other => match other.strip_prefix("error:") {
                Some(code) => Ok(StepStatus::Error(code.to_string())),
                None => Err(format!("unknown step status: {}", other)),
            },
        }
    }
}

impl Serialize for StepStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StepStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One audit row. Written exactly once per processed item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuditRecord {
    pub pk: String,
    pub old_sk: String,
    pub read: StepStatus,
    pub new_sk_created: StepStatus,
    pub new_sk_inserted: StepStatus,
    pub new_sk_read: StepStatus,
    pub old_sk_deleted: StepStatus,
    pub processed_pk: String,
    pub processed_sk: String,
}

impl AuditRecord {
    /// Start a record for an item that has just been read.
    pub fn read(pk: impl Into<String>, old_sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            old_sk: old_sk.into(),
            read: StepStatus::Yes,
            ..Self::default()
        }
    }

    /// Mark the item as having reached its final key pair.
    pub fn processed(&mut self, pk: impl Into<String>, sk: impl Into<String>) {
        self.processed_pk = pk.into();
        self.processed_sk = sk.into();
    }

    /// True once the item has a recorded final key pair.
    pub fn is_processed(&self) -> bool {
        !self.processed_sk.is_empty()
    }
}
