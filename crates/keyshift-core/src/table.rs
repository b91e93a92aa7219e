// ABOUTME: Defines the KeyValueStore capability that the migration needs from a table.
// ABOUTME: Conditional puts report duplicates as an outcome, not an error, so callers branch on it.

use async_trait::async_trait;
use thiserror::Error;

use crate::item::{Cursor, Item, Key, KeySchema};

/// Error code for requests the store refuses to run, such as an item without
/// its key attributes.
pub const CODE_VALIDATION: &str = "ValidationException";

/// A failed store call. `code` is the short machine-readable reason that ends
/// up in audit rows as `error:<code>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store error {code}: {message}")]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The item was written.
    Inserted,
    /// An item with the same partition and sort key already exists.
    AlreadyExists,
}

/// One page of a table scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// Key to resume after. Present whenever the page was filled to the
    /// requested limit, so a final empty page is possible.
    pub last_key: Option<Cursor>,
}

/// The table operations the migration relies on. Calls are issued one at a
/// time; implementations do not retry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// The table's key attribute names.
    fn schema(&self) -> &KeySchema;

    /// Read up to `limit` items in key order, starting strictly after `start`.
    async fn scan(&self, limit: usize, start: Option<&Cursor>) -> Result<ScanPage, StoreError>;

    /// Insert `item` only if no item exists under its partition and sort key.
    async fn put_if_absent(&self, item: &Item) -> Result<PutOutcome, StoreError>;

    /// Fetch the item stored under `key`.
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError>;

    /// Delete the item stored under `key`. Deleting a missing item succeeds.
    async fn delete(&self, key: &Key) -> Result<(), StoreError>;
}
