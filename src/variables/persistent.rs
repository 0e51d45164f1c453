//! Persistent collections (`IP`, `SESSION`, ...).

use super::{Collection, MatchData, Variable};
use crate::persistence::KvStore;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const CREATE_TIME: &str = "CREATE_TIME";
const LAST_UPDATE_TIME: &str = "LAST_UPDATE_TIME";
const UPDATE_COUNTER: &str = "UPDATE_COUNTER";
const UPDATE_RATE: &str = "UPDATE_RATE";
const TIMEOUT: &str = "TIMEOUT";
const IS_NEW: &str = "IS_NEW";
const KEY: &str = "KEY";

/// A collection that forwards every operation to a [`KvStore`].
///
/// It is empty until a collection key is bound (`initcol`, `setsid`,
/// `setuid`), and always empty when no store is configured.
#[derive(Debug, Clone)]
pub struct PersistentCollection {
    variable: Variable,
    store: Option<Arc<dyn KvStore>>,
    key: Option<String>,
    timeout: u64,
}

impl PersistentCollection {
    /// Create an unbound collection.
    pub fn new(variable: Variable, store: Option<Arc<dyn KvStore>>, timeout: u64) -> Self {
        Self {
            variable,
            store,
            key: None,
            timeout,
        }
    }

    fn collection(&self) -> String {
        self.variable.name().to_lowercase()
    }

    fn target(&self) -> Option<(&dyn KvStore, &str)> {
        match (&self.store, &self.key) {
            (Some(store), Some(key)) => Some((store.as_ref(), key.as_str())),
            _ => None,
        }
    }

    /// The bound collection key.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Bind the collection key and initialise record metadata.
    pub fn bind(&mut self, key: &str, now: i64) {
        self.key = Some(key.to_string());
        let collection = self.collection();
        let timeout = self.timeout;
        let Some((store, ck)) = self.target() else {
            return;
        };
        let result = store.all(&collection, ck).and_then(|existing| {
            if existing.is_empty() {
                store.set(&collection, ck, CREATE_TIME, &now.to_string())?;
                store.set(&collection, ck, LAST_UPDATE_TIME, &now.to_string())?;
                store.set(&collection, ck, UPDATE_COUNTER, "0")?;
                store.set(&collection, ck, UPDATE_RATE, "0")?;
                store.set(&collection, ck, TIMEOUT, &timeout.to_string())?;
                store.set(&collection, ck, KEY, ck)?;
                store.set(&collection, ck, IS_NEW, "1")
            } else {
                store.set(&collection, ck, IS_NEW, "0")
            }
        });
        if let Err(e) = result {
            warn!(collection = %collection, error = %e, "failed to initialise persistent collection");
        }
    }

    /// First value of `field`.
    pub fn get(&self, field: &str) -> Option<String> {
        let (store, ck) = self.target()?;
        match store.get(&self.collection(), ck, field) {
            Ok(v) => v,
            Err(e) => {
                warn!(collection = %self.collection(), error = %e, "persistent read failed");
                None
            }
        }
    }

    /// Write `field`.
    pub fn set(&self, field: &str, value: &str, now: i64) {
        let collection = self.collection();
        if let Some((store, ck)) = self.target() {
            if let Err(e) = store.set(&collection, ck, field, value) {
                warn!(collection = %collection, error = %e, "persistent write failed");
            }
            self.touch(now);
        }
    }

    /// Add `delta` to `field`.
    pub fn sum(&self, field: &str, delta: i64, now: i64) {
        let collection = self.collection();
        if let Some((store, ck)) = self.target() {
            if let Err(e) = store.sum(&collection, ck, field, delta) {
                warn!(collection = %collection, error = %e, "persistent sum failed");
            }
            self.touch(now);
        }
    }

    /// Delete `field`.
    pub fn remove(&self, field: &str, now: i64) {
        let collection = self.collection();
        if let Some((store, ck)) = self.target() {
            if let Err(e) = store.remove(&collection, ck, field) {
                warn!(collection = %collection, error = %e, "persistent remove failed");
            }
            self.touch(now);
        }
    }

    /// Expire `field` after `seconds`.
    pub fn expire(&self, field: &str, seconds: u64) {
        let collection = self.collection();
        if let Some((store, ck)) = self.target() {
            if let Err(e) = store.expire(&collection, ck, field, Duration::from_secs(seconds)) {
                warn!(collection = %collection, error = %e, "persistent expire failed");
            }
        }
    }

    fn touch(&self, now: i64) {
        let collection = self.collection();
        let Some((store, ck)) = self.target() else {
            return;
        };
        let result = store.sum(&collection, ck, UPDATE_COUNTER, 1).and_then(|counter| {
            store.set(&collection, ck, LAST_UPDATE_TIME, &now.to_string())?;
            let created = store
                .get(&collection, ck, CREATE_TIME)?
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(now);
            let minutes = ((now - created) / 60).max(1);
            store.set(&collection, ck, UPDATE_RATE, &(counter / minutes).to_string())
        });
        if let Err(e) = result {
            warn!(collection = %collection, error = %e, "failed to update collection metadata");
        }
    }

    fn entries(&self) -> Vec<(String, String)> {
        let Some((store, ck)) = self.target() else {
            return Vec::new();
        };
        store.all(&self.collection(), ck).unwrap_or_else(|e| {
            warn!(collection = %self.collection(), error = %e, "persistent scan failed");
            Vec::new()
        })
    }
}

impl Collection for PersistentCollection {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn find_all(&self) -> Vec<MatchData> {
        self.entries()
            .into_iter()
            .map(|(k, v)| MatchData::new(self.variable, k, v))
            .collect()
    }

    fn find_string(&self, key: &str) -> Vec<MatchData> {
        if key.is_empty() {
            return self.find_all();
        }
        self.get(key)
            .map(|v| vec![MatchData::new(self.variable, key.to_lowercase(), v)])
            .unwrap_or_default()
    }

    fn find_regex(&self, re: &Regex) -> Vec<MatchData> {
        self.entries()
            .into_iter()
            .filter(|(k, _)| re.is_match(&k.to_lowercase()))
            .map(|(k, v)| MatchData::new(self.variable, k, v))
            .collect()
    }
}
