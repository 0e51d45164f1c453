//! Persistent collection storage.
//!
//! `IP`, `SESSION`, `USER`, `GLOBAL` and `RESOURCE` live outside the
//! transaction. The engine talks to them through [`KvStore`]; records are
//! addressed by `(collection, collection_key, field)`.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

/// Key-value contract for persistent collections.
///
/// Implementations must make `sum`, `set` and `remove` atomic per
/// `(collection, collection_key, key)`.
pub trait KvStore: Send + Sync + fmt::Debug {
    /// Open the backing store.
    fn open(&self, _uri: &str) -> Result<()> {
        Ok(())
    }

    /// Close the backing store.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Read one field.
    fn get(&self, collection: &str, collection_key: &str, key: &str) -> Result<Option<String>>;

    /// Write one field.
    fn set(&self, collection: &str, collection_key: &str, key: &str, value: &str) -> Result<()>;

    /// Add `delta` to an integer field (missing or non-numeric is 0) and
    /// return the new value.
    fn sum(&self, collection: &str, collection_key: &str, key: &str, delta: i64) -> Result<i64>;

    /// Delete one field.
    fn remove(&self, collection: &str, collection_key: &str, key: &str) -> Result<()>;

    /// Every live field of a record.
    fn all(&self, collection: &str, collection_key: &str) -> Result<Vec<(String, String)>>;

    /// Expire one field after `ttl`.
    fn expire(&self, collection: &str, collection_key: &str, key: &str, ttl: Duration) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

type Record = BTreeMap<String, Entry>;

/// In-process [`KvStore`] backed by a locked hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<(String, String), Record>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_key(collection: &str, collection_key: &str) -> (String, String) {
        (collection.to_lowercase(), collection_key.to_string())
    }

    /// Number of records (collection/key pairs).
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, collection: &str, collection_key: &str, key: &str) -> Result<Option<String>> {
        let records = self.records.read();
        let now = Instant::now();
        Ok(records
            .get(&Self::record_key(collection, collection_key))
            .and_then(|r| r.get(&key.to_lowercase()))
            .filter(|e| e.live(now))
            .map(|e| e.value.clone()))
    }

    fn set(&self, collection: &str, collection_key: &str, key: &str, value: &str) -> Result<()> {
        let mut records = self.records.write();
        records
            .entry(Self::record_key(collection, collection_key))
            .or_default()
            .insert(
                key.to_lowercase(),
                Entry {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
        Ok(())
    }

    fn sum(&self, collection: &str, collection_key: &str, key: &str, delta: i64) -> Result<i64> {
        let mut records = self.records.write();
        let now = Instant::now();
        let record = records
            .entry(Self::record_key(collection, collection_key))
            .or_default();
        let entry = record.entry(key.to_lowercase()).or_insert(Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current = if entry.live(now) {
            entry.value.trim().parse::<i64>().unwrap_or(0)
        } else {
            entry.expires_at = None;
            0
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| Error::Persistence {
                message: format!("overflow adding {delta} to {collection}.{key}"),
            })?;
        entry.value = next.to_string();
        Ok(next)
    }

    fn remove(&self, collection: &str, collection_key: &str, key: &str) -> Result<()> {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(&Self::record_key(collection, collection_key)) {
            record.remove(&key.to_lowercase());
        }
        Ok(())
    }

    fn all(&self, collection: &str, collection_key: &str) -> Result<Vec<(String, String)>> {
        let mut records = self.records.write();
        let now = Instant::now();
        let Some(record) = records.get_mut(&Self::record_key(collection, collection_key)) else {
            return Ok(Vec::new());
        };
        record.retain(|_, e| e.live(now));
        Ok(record
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    fn expire(&self, collection: &str, collection_key: &str, key: &str, ttl: Duration) -> Result<()> {
        let mut records = self.records.write();
        if let Some(entry) = records
            .get_mut(&Self::record_key(collection, collection_key))
            .and_then(|r| r.get_mut(&key.to_lowercase()))
        {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
