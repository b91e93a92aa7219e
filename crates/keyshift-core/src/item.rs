// ABOUTME: Attribute value, item, and key types shared by every store implementation.
// ABOUTME: Numbers travel as exact decimal text so 13-digit sequence values never lose precision.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single attribute value. The externally tagged JSON form (`{"S": "abc"}`,
/// `{"N": "42"}`) matches the wire shape of document key-value stores, which
/// is also what gets written to the checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    Bool(bool),
    Null(bool),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Build a numeric attribute from an exact integer.
    pub fn number(n: i64) -> Self {
        AttributeValue::N(n.to_string())
    }

    /// Borrow the string payload, if this is an `S` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret an `N` value as an exact integer. Strings are never numbers
    /// here, and a decimal with a non-zero fraction is rejected rather than
    /// rounded.
    pub fn as_exact_i64(&self) -> Option<i64> {
        let AttributeValue::N(text) = self else {
            return None;
        };
        if let Ok(n) = text.parse::<i64>() {
            return Some(n);
        }
        let (whole, frac) = text.split_once('.')?;
        if !frac.is_empty() && frac.bytes().all(|b| b == b'0') {
            whole.parse::<i64>().ok()
        } else {
            None
        }
    }
}

impl fmt::Display for AttributeValue {
    /// Scalars render as their bare text so key values read naturally in
    /// audit rows and logs; containers fall back to their JSON form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) => f.write_str(s),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Null(_) => f.write_str("null"),
            other => {
                let json = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

/// A stored item: attribute name to value, kept in a stable order.
pub type Item = BTreeMap<String, AttributeValue>;

/// The key attributes of an item.
pub type Key = BTreeMap<String, AttributeValue>;

/// A scan continuation token: the key of the last item evaluated.
pub type Cursor = Key;

/// Names of the two attributes that form an item's composite key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub partition_key: String,
    pub sort_key: String,
}

impl KeySchema {
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }

    /// Project an item down to its key attributes. Returns None if either key
    /// attribute is missing.
    pub fn key_of(&self, item: &Item) -> Option<Key> {
        let pk = item.get(&self.partition_key)?;
        let sk = item.get(&self.sort_key)?;
        Some(self.key(pk.clone(), sk.clone()))
    }

    /// Build a key from explicit partition and sort values.
    pub fn key(&self, pk: AttributeValue, sk: AttributeValue) -> Key {
        let mut key = Key::new();
        key.insert(self.partition_key.clone(), pk);
        key.insert(self.sort_key.clone(), sk);
        key
    }

    /// Render the (partition, sort) pair of a key or item as strings, the
    /// form stores use for ordering and lookups.
    pub fn key_strings(&self, item: &Item) -> Option<(String, String)> {
        let pk = item.get(&self.partition_key)?;
        let sk = item.get(&self.sort_key)?;
        Some((pk.to_string(), sk.to_string()))
    }
}
