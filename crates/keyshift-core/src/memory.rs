// ABOUTME: In-memory KeyValueStore with fault injection, used to exercise migration paths in tests.
// ABOUTME: Items are ordered by their (partition, sort) key strings, matching the SQLite table.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::item::{Cursor, Item, Key, KeySchema};
use crate::table::{CODE_VALIDATION, KeyValueStore, PutOutcome, ScanPage, StoreError};

/// Store operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Scan,
    Put,
    Get,
    Delete,
}

/// Number of calls made per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub scan: usize,
    pub put: usize,
    pub get: usize,
    pub delete: usize,
}

#[derive(Default)]
struct Inner {
    rows: BTreeMap<(String, String), Item>,
    faults: HashMap<Operation, Vec<StoreError>>,
    calls: CallCounts,
}

/// A table held entirely in memory.
pub struct MemoryTable {
    schema: KeySchema,
    inner: Mutex<Inner>,
}

impl MemoryTable {
    pub fn new(schema: KeySchema) -> Self {
        Self {
            schema,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Build a table pre-populated with `items`.
    pub fn with_items(schema: KeySchema, items: impl IntoIterator<Item = Item>) -> Self {
        let table = Self::new(schema);
        for item in items {
            table.insert(item);
        }
        table
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_key(&self, item: &Item) -> Result<(String, String), StoreError> {
        self.schema.key_strings(item).ok_or_else(|| {
            StoreError::new(CODE_VALIDATION, "item is missing a key attribute")
        })
    }

    /// Write an item unconditionally. Items without key attributes are ignored.
    pub fn insert(&self, item: Item) {
        if let Some(key) = self.schema.key_strings(&item) {
            self.lock().rows.insert(key, item);
        }
    }

    /// Make the next call of `op` fail with `code`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: Operation, code: &str) {
        let error = StoreError::new(code, format!("injected {:?} failure", op));
        self.lock().faults.entry(op).or_default().push(error);
    }

    /// Snapshot of the stored items in key order.
    pub fn items(&self) -> Vec<Item> {
        self.lock().rows.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up an item by partition and sort key strings.
    pub fn find(&self, pk: &str, sk: &str) -> Option<Item> {
        self.lock()
            .rows
            .get(&(pk.to_string(), sk.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    fn begin(&self, op: Operation) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.lock();
        match op {
            Operation::Scan => inner.calls.scan += 1,
            Operation::Put => inner.calls.put += 1,
            Operation::Get => inner.calls.get += 1,
            Operation::Delete => inner.calls.delete += 1,
        }
        if let Some(queue) = inner.faults.get_mut(&op)
            && !queue.is_empty()
        {
            return Err(queue.remove(0));
        }
        Ok(inner)
    }
}

#[async_trait]
impl KeyValueStore for MemoryTable {
    fn schema(&self) -> &KeySchema {
        &self.schema
    }

    async fn scan(&self, limit: usize, start: Option<&Cursor>) -> Result<ScanPage, StoreError> {
        let inner = self.begin(Operation::Scan)?;
        let lower = match start {
            Some(cursor) => Bound::Excluded(self.row_key(cursor)?),
            None => Bound::Unbounded,
        };

        let items: Vec<Item> = inner
            .rows
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect();

        let last_key = if limit > 0 && items.len() == limit {
            items.last().and_then(|item| self.schema.key_of(item))
        } else {
            None
        };

        Ok(ScanPage { items, last_key })
    }

    async fn put_if_absent(&self, item: &Item) -> Result<PutOutcome, StoreError> {
        let key = self.row_key(item)?;
        let mut inner = self.begin(Operation::Put)?;
        if inner.rows.contains_key(&key) {
            return Ok(PutOutcome::AlreadyExists);
        }
        inner.rows.insert(key, item.clone());
        Ok(PutOutcome::Inserted)
    }

    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        let key = self.row_key(key)?;
        let inner = self.begin(Operation::Get)?;
        Ok(inner.rows.get(&key).cloned())
    }

    async fn delete(&self, key: &Key) -> Result<(), StoreError> {
        let key = self.row_key(key)?;
        let mut inner = self.begin(Operation::Delete)?;
        inner.rows.remove(&key);
        Ok(())
    }
}
