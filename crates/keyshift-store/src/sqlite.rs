// ABOUTME: SQLite-backed KeyValueStore holding one or more named tables in a local database file.
// ABOUTME: Items are stored as JSON bodies keyed by (table, pk, sk); conditional puts use ON CONFLICT DO NOTHING.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use keyshift_core::table::CODE_VALIDATION;
use keyshift_core::{Cursor, Item, Key, KeySchema, KeyValueStore, PutOutcome, ScanPage, StoreError};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Errors that can occur while opening a SQLite table.
#[derive(Debug, Error)]
pub enum SqliteError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("table {table} is keyed on ({found}), not ({expected})")]
    SchemaMismatch {
        table: String,
        expected: String,
        found: String,
    },
}

/// A named table inside a SQLite database file.
pub struct SqliteTable {
    conn: Mutex<Connection>,
    table: String,
    schema: KeySchema,
}

impl SqliteTable {
    /// Open or create the database at `path` and register `table` with the
    /// given key schema. Reopening an existing table with a different schema
    /// is refused.
    pub fn open(path: &Path, table: &str, schema: KeySchema) -> Result<Self, SqliteError> {
        let conn = Connection::open(path)?;
        Self::init(conn, table, schema)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(table: &str, schema: KeySchema) -> Result<Self, SqliteError> {
        Self::init(Connection::open_in_memory()?, table, schema)
    }

    fn init(conn: Connection, table: &str, schema: KeySchema) -> Result<Self, SqliteError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tables (
                table_name TEXT PRIMARY KEY,
                partition_key TEXT NOT NULL,
                sort_key TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS items (
                table_name TEXT NOT NULL,
                pk TEXT NOT NULL,
                sk TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (table_name, pk, sk)
            ) WITHOUT ROWID;",
        )?;

        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT partition_key, sort_key FROM tables WHERE table_name = ?1",
                params![table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((pk, sk)) if pk != schema.partition_key || sk != schema.sort_key => {
                return Err(SqliteError::SchemaMismatch {
                    table: table.to_string(),
                    expected: format!("{}, {}", schema.partition_key, schema.sort_key),
                    found: format!("{}, {}", pk, sk),
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO tables (table_name, partition_key, sort_key) VALUES (?1, ?2, ?3)",
                    params![table, schema.partition_key, schema.sort_key],
                )?;
                tracing::info!("created table {}", table);
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
            schema,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_key(&self, item: &Item) -> Result<(String, String), StoreError> {
        self.schema.key_strings(item).ok_or_else(|| {
            StoreError::new(CODE_VALIDATION, "item is missing a key attribute")
        })
    }

    /// Write an item unconditionally, replacing any item under the same key.
    pub fn put(&self, item: &Item) -> Result<(), StoreError> {
        let (pk, sk) = self.row_key(item)?;
        let body = encode_body(item)?;
        self.lock()
            .execute(
                "INSERT INTO items (table_name, pk, sk, body) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(table_name, pk, sk) DO UPDATE SET body = excluded.body",
                params![self.table, pk, sk, body],
            )
            .map_err(store_error)?;
        Ok(())
    }

    /// Number of items in the table.
    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM items WHERE table_name = ?1",
                params![self.table],
                |row| row.get(0),
            )
            .map_err(store_error)?;
        Ok(n as usize)
    }
}

#[async_trait]
impl KeyValueStore for SqliteTable {
    fn schema(&self) -> &KeySchema {
        &self.schema
    }

    async fn scan(&self, limit: usize, start: Option<&Cursor>) -> Result<ScanPage, StoreError> {
        let start = start.map(|c| self.row_key(c)).transpose()?;
        let limit_param = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.lock();

        let bodies: Vec<String> = match &start {
            Some((pk, sk)) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT body FROM items
                         WHERE table_name = ?1 AND (pk, sk) > (?2, ?3)
                         ORDER BY pk, sk LIMIT ?4",
                    )
                    .map_err(store_error)?;
                let rows = stmt
                    .query_map(params![self.table, pk, sk, limit_param], |row| {
                        row.get::<_, String>(0)
                    })
                    .map_err(store_error)?;
                rows.collect::<Result<_, _>>().map_err(store_error)?
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT body FROM items
                         WHERE table_name = ?1
                         ORDER BY pk, sk LIMIT ?2",
                    )
                    .map_err(store_error)?;
                let rows = stmt
                    .query_map(params![self.table, limit_param], |row| row.get::<_, String>(0))
                    .map_err(store_error)?;
                rows.collect::<Result<_, _>>().map_err(store_error)?
            }
        };

        let items = bodies
            .iter()
            .map(|body| decode_body(body))
            .collect::<Result<Vec<_>, _>>()?;

        let last_key = if limit > 0 && items.len() == limit {
            items.last().and_then(|item| self.schema.key_of(item))
        } else {
            None
        };

        Ok(ScanPage { items, last_key })
    }

    async fn put_if_absent(&self, item: &Item) -> Result<PutOutcome, StoreError> {
        let (pk, sk) = self.row_key(item)?;
        let body = encode_body(item)?;
        let changed = self
            .lock()
            .execute(
                "INSERT INTO items (table_name, pk, sk, body) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(table_name, pk, sk) DO NOTHING",
                params![self.table, pk, sk, body],
            )
            .map_err(store_error)?;

        if changed == 0 {
            Ok(PutOutcome::AlreadyExists)
        } else {
            Ok(PutOutcome::Inserted)
        }
    }

    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        let (pk, sk) = self.row_key(key)?;
        let body: Option<String> = self
            .lock()
            .query_row(
                "SELECT body FROM items WHERE table_name = ?1 AND pk = ?2 AND sk = ?3",
                params![self.table, pk, sk],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)?;

        body.as_deref().map(decode_body).transpose()
    }

    async fn delete(&self, key: &Key) -> Result<(), StoreError> {
        let (pk, sk) = self.row_key(key)?;
        self.lock()
            .execute(
                "DELETE FROM items WHERE table_name = ?1 AND pk = ?2 AND sk = ?3",
                params![self.table, pk, sk],
            )
            .map_err(store_error)?;
        Ok(())
    }
}

fn store_error(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => {
            StoreError::new(format!("{:?}", err.code), e.to_string())
        }
        _ => StoreError::new("SqliteError", e.to_string()),
    }
}

fn encode_body(item: &Item) -> Result<String, StoreError> {
    serde_json::to_string(item)
        .map_err(|e| StoreError::new("SerializationException", e.to_string()))
}

fn decode_body(body: &str) -> Result<Item, StoreError> {
    serde_json::from_str(body)
        .map_err(|e| StoreError::new("SerializationException", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyshift_core::AttributeValue;
    use tempfile::TempDir;

    fn item(pk: &str, sk: &str, amount: i64) -> Item {
        let mut item = Item::new();
        item.insert("pk".into(), AttributeValue::S(pk.into()));
        item.insert("sk".into(), AttributeValue::S(sk.into()));
        item.insert("amount".into(), AttributeValue::number(amount));
        item
    }

    fn schema() -> KeySchema {
        KeySchema::new("pk", "sk")
    }

    #[tokio::test]
    async fn put_if_absent_detects_existing_key() {
        let table = SqliteTable::open_in_memory("orders", schema()).unwrap();

        let first = table.put_if_absent(&item("a", "1", 10)).await.unwrap();
        assert_eq!(first, PutOutcome::Inserted);

        let second = table.put_if_absent(&item("a", "1", 99)).await.unwrap();
        assert_eq!(second, PutOutcome::AlreadyExists);

        let stored = table
            .get(&schema().key_of(&item("a", "1", 0)).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["amount"], AttributeValue::number(10));
    }

    #[tokio::test]
    async fn scan_resumes_after_cursor() {
        let table = SqliteTable::open_in_memory("orders", schema()).unwrap();
        for i in 0..5 {
            table.put(&item("a", &format!("{:02}", i), i)).unwrap();
        }

        let first = table.scan(3, None).await.unwrap();
        assert_eq!(first.items.len(), 3);
        let cursor = first.last_key.expect("full page has a cursor");

        let second = table.scan(3, Some(&cursor)).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[0]["sk"], AttributeValue::S("03".into()));
        assert!(second.last_key.is_none());
    }

    #[tokio::test]
    async fn scan_orders_across_partitions() {
        let table = SqliteTable::open_in_memory("orders", schema()).unwrap();
        table.put(&item("b", "1", 0)).unwrap();
        table.put(&item("a", "2", 0)).unwrap();
        table.put(&item("a", "1", 0)).unwrap();

        let page = table.scan(10, None).await.unwrap();
        let keys: Vec<_> = page
            .items
            .iter()
            .map(|i| schema().key_strings(i).unwrap())
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn delete_removes_only_that_key() {
        let table = SqliteTable::open_in_memory("orders", schema()).unwrap();
        table.put(&item("a", "1", 0)).unwrap();
        table.put(&item("a", "2", 0)).unwrap();

        table.delete(&schema().key_of(&item("a", "1", 0)).unwrap()).await.unwrap();
        assert_eq!(table.count().unwrap(), 1);

        // Deleting a missing key is not an error.
        table.delete(&schema().key_of(&item("a", "1", 0)).unwrap()).await.unwrap();
    }

    #[test]
    fn tables_are_isolated_and_schema_is_enforced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");

        let orders = SqliteTable::open(&path, "orders", schema()).unwrap();
        orders.put(&item("a", "1", 0)).unwrap();
        drop(orders);

        let other = SqliteTable::open(&path, "other", schema()).unwrap();
        assert_eq!(other.count().unwrap(), 0);
        drop(other);

        let reopened = SqliteTable::open(&path, "orders", schema()).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        drop(reopened);

        let err = SqliteTable::open(&path, "orders", KeySchema::new("id", "sk"))
            .err()
            .expect("schema mismatch should be refused");
        assert!(matches!(err, SqliteError::SchemaMismatch { .. }));
    }
}
