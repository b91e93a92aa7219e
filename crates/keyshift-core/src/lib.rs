// ABOUTME: Core library for keyshift: order-key codec, item model, and the store capability.
// ABOUTME: Shared by the persistence crate, the migration engine, and the CLI.

pub mod audit;
pub mod item;
pub mod memory;
pub mod orderkey;
pub mod table;

pub use audit::{AUDIT_FIELDS, AuditRecord, StepStatus};
pub use item::{AttributeValue, Cursor, Item, Key, KeySchema};
pub use memory::{CallCounts, MemoryTable, Operation};
pub use orderkey::{KeyError, ParsedKey};
pub use table::{KeyValueStore, PutOutcome, ScanPage, StoreError};
