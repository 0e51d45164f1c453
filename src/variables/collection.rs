//! Collection trait and the owning containers.

use super::Variable;
use once_cell::unsync::OnceCell;
use regex::Regex;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;

/// A value selected from a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchData {
    /// The variable the value came from.
    pub variable: Variable,
    /// Key inside the collection (empty for singles).
    pub key: String,
    /// The selected value.
    pub value: String,
    /// Expanded rule message at the time of the match.
    pub message: String,
    /// Expanded rule logdata at the time of the match.
    pub data: String,
    /// Depth in the rule chain (0 for the chain root).
    pub chain_level: usize,
}

impl MatchData {
    /// Create a match entry without message or data.
    pub fn new(variable: Variable, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            variable,
            key: key.into(),
            value: value.into(),
            message: String::new(),
            data: String::new(),
            chain_level: 0,
        }
    }

    /// Variable name (`ARGS_GET`, ...).
    pub fn variable_name(&self) -> &'static str {
        self.variable.name()
    }

    /// `VAR:key` (or `VAR` for singles), as used by `MATCHED_VAR_NAME`.
    pub fn full_name(&self) -> String {
        if self.key.is_empty() {
            self.variable.name().to_string()
        } else {
            format!("{}:{}", self.variable.name(), self.key)
        }
    }
}

/// Selection primitives shared by every container and view.
pub trait Collection {
    /// The variable this collection represents.
    fn variable(&self) -> Variable;

    /// Every entry.
    fn find_all(&self) -> Vec<MatchData>;

    /// Entries under `key`; an empty key selects everything.
    fn find_string(&self, key: &str) -> Vec<MatchData>;

    /// Entries whose (lowercased) key matches `re`.
    fn find_regex(&self, re: &Regex) -> Vec<MatchData>;

    /// Variable name.
    fn name(&self) -> &'static str {
        self.variable().name()
    }
}

/// A key/value pair that keeps the key as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchoredValue {
    /// Key in its original casing.
    pub key: String,
    /// The value.
    pub value: String,
}

#[derive(Debug, Clone)]
struct Bucket {
    key: String,
    values: Vec<AnchoredValue>,
}

/// Ordered multimap with case-insensitive keys.
#[derive(Debug, Clone)]
pub struct Map {
    variable: Variable,
    case_sensitive: bool,
    buckets: Vec<Bucket>,
    index: HashMap<String, usize>,
}

impl Map {
    /// Create an empty map for `variable`.
    pub fn new(variable: Variable) -> Self {
        Self {
            variable,
            case_sensitive: variable.is_case_sensitive(),
            buckets: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Create an empty map with explicit key sensitivity.
    pub fn with_case_sensitivity(variable: Variable, case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            ..Self::new(variable)
        }
    }

    fn normalize(&self, key: &str) -> String {
        if self.case_sensitive {
            key.to_string()
        } else {
            key.to_lowercase()
        }
    }

    fn bucket(&self, key: &str) -> Option<&Bucket> {
        self.index
            .get(&self.normalize(key))
            .and_then(|&i| self.buckets.get(i))
    }

    fn bucket_mut(&mut self, key: &str) -> &mut Bucket {
        let normalized = self.normalize(key);
        let idx = match self.index.get(&normalized) {
            Some(&i) => i,
            None => {
                self.buckets.push(Bucket {
                    key: normalized.clone(),
                    values: Vec::new(),
                });
                let i = self.buckets.len() - 1;
                self.index.insert(normalized, i);
                i
            }
        };
        &mut self.buckets[idx]
    }

    /// Values stored under `key`.
    pub fn get(&self, key: &str) -> Vec<&str> {
        self.bucket(key)
            .map(|b| b.values.iter().map(|v| v.value.as_str()).collect())
            .unwrap_or_default()
    }

    /// First value stored under `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.bucket(key)
            .and_then(|b| b.values.first())
            .map(|v| v.value.as_str())
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.bucket(key).is_some()
    }

    /// Append a value under `key`.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.bucket_mut(key).values.push(AnchoredValue {
            key: key.to_string(),
            value,
        });
    }

    /// Append a value under `key` unless it is already there.
    pub fn add_unique(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let bucket = self.bucket_mut(key);
        if !bucket.values.iter().any(|v| v.value == value) {
            bucket.values.push(AnchoredValue {
                key: key.to_string(),
                value,
            });
        }
    }

    /// Replace every value under `key`.
    pub fn set(&mut self, key: &str, values: Vec<String>) {
        let bucket = self.bucket_mut(key);
        bucket.values = values
            .into_iter()
            .map(|value| AnchoredValue {
                key: key.to_string(),
                value,
            })
            .collect();
    }

    /// Write the value at `index`; indexes past the end append.
    pub fn set_index(&mut self, key: &str, index: usize, value: impl Into<String>) {
        let value = value.into();
        let bucket = self.bucket_mut(key);
        match bucket.values.get_mut(index) {
            Some(slot) => slot.value = value,
            None => bucket.values.push(AnchoredValue {
                key: key.to_string(),
                value,
            }),
        }
    }

    /// Remove `key` and all of its values.
    pub fn remove(&mut self, key: &str) {
        let normalized = self.normalize(key);
        if let Some(idx) = self.index.remove(&normalized) {
            self.buckets.remove(idx);
            for slot in self.index.values_mut() {
                if *slot > idx {
                    *slot -= 1;
                }
            }
        }
    }

    /// Remove everything.
    pub fn reset(&mut self) {
        self.buckets.clear();
        self.index.clear();
    }

    /// Keys in insertion order, as first written.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buckets
            .iter()
            .filter_map(|b| b.values.first().map(|v| v.key.as_str()))
    }

    /// Every stored pair in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &AnchoredValue> {
        self.buckets.iter().flat_map(|b| b.values.iter())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.values.len()).sum()
    }

    /// Whether the map holds no values.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.values.is_empty())
    }

    /// Names view: one entry per key, in insertion order.
    pub(crate) fn find_names(&self, variable: Variable, key: Option<&str>, re: Option<&Regex>) -> Vec<MatchData> {
        let wanted = key.filter(|k| !k.is_empty()).map(|k| self.normalize(k));
        self.buckets
            .iter()
            .filter(|b| wanted.as_deref().map_or(true, |w| b.key == w))
            .filter(|b| re.map_or(true, |re| re.is_match(&b.key)))
            .filter_map(|b| b.values.first())
            .map(|v| MatchData::new(variable, v.key.clone(), v.key.clone()))
            .collect()
    }
}

impl Collection for Map {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn find_all(&self) -> Vec<MatchData> {
        self.entries()
            .map(|v| MatchData::new(self.variable, v.key.clone(), v.value.clone()))
            .collect()
    }

    fn find_string(&self, key: &str) -> Vec<MatchData> {
        if key.is_empty() {
            return self.find_all();
        }
        self.bucket(key)
            .map(|b| {
                b.values
                    .iter()
                    .map(|v| MatchData::new(self.variable, v.key.clone(), v.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find_regex(&self, re: &Regex) -> Vec<MatchData> {
        self.buckets
            .iter()
            .filter(|b| re.is_match(&b.key))
            .flat_map(|b| b.values.iter())
            .map(|v| MatchData::new(self.variable, v.key.clone(), v.value.clone()))
            .collect()
    }
}

/// A single string value.
#[derive(Debug, Clone)]
pub struct Single {
    variable: Variable,
    value: String,
}

impl Single {
    /// Create an empty single.
    pub fn new(variable: Variable) -> Self {
        Self {
            variable,
            value: String::new(),
        }
    }

    /// Current value.
    pub fn get(&self) -> &str {
        &self.value
    }

    /// Replace the value.
    pub fn set(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    /// Clear the value.
    pub fn reset(&mut self) {
        self.value.clear();
    }
}

impl Collection for Single {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn find_all(&self) -> Vec<MatchData> {
        vec![MatchData::new(self.variable, "", self.value.clone())]
    }

    fn find_string(&self, _key: &str) -> Vec<MatchData> {
        self.find_all()
    }

    fn find_regex(&self, _re: &Regex) -> Vec<MatchData> {
        self.find_all()
    }
}

type Thunk = Box<dyn FnOnce() -> String + Send>;

/// A single whose value is computed on first read.
pub struct LazySingle {
    variable: Variable,
    value: OnceCell<String>,
    thunk: Cell<Option<Thunk>>,
}

impl LazySingle {
    /// Create a lazy single backed by `thunk`.
    pub fn new(variable: Variable, thunk: impl FnOnce() -> String + Send + 'static) -> Self {
        Self {
            variable,
            value: OnceCell::new(),
            thunk: Cell::new(Some(Box::new(thunk))),
        }
    }

    /// Value, computing it on first call.
    pub fn get(&self) -> &str {
        self.value
            .get_or_init(|| self.thunk.take().map(|f| f()).unwrap_or_default())
    }

    /// Replace the value (and drop the thunk).
    pub fn set(&mut self, value: impl Into<String>) {
        self.thunk.set(None);
        self.value = OnceCell::with_value(value.into());
    }
}

impl fmt::Debug for LazySingle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySingle")
            .field("variable", &self.variable)
            .field("value", &self.value.get())
            .finish()
    }
}

impl Collection for LazySingle {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn find_all(&self) -> Vec<MatchData> {
        vec![MatchData::new(self.variable, "", self.get())]
    }

    fn find_string(&self, _key: &str) -> Vec<MatchData> {
        self.find_all()
    }

    fn find_regex(&self, _re: &Regex) -> Vec<MatchData> {
        self.find_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(matches: &[MatchData]) -> Vec<&str> {
        matches.iter().map(|m| m.value.as_str()).collect()
    }

    #[test]
    fn test_map_case_insensitive_selection() {
        let mut map = Map::with_case_sensitivity(Variable::RequestHeaders, false);
        map.add("Content-Type", "text/html");
        map.add("content-type", "application/json");

        let upper = map.find_string("CONTENT-TYPE");
        let lower = map.find_string("content-type");
        assert_eq!(values(&upper), values(&lower));
        assert_eq!(upper.len(), 2);
        // original casing survives
        assert_eq!(upper[0].key, "Content-Type");
        assert_eq!(upper[1].key, "content-type");
    }

    #[test]
    fn test_map_case_sensitive_selection() {
        let mut map = Map::with_case_sensitivity(Variable::ArgsGet, true);
        map.add("K", "upper");
        map.add("k", "lower");
        assert_eq!(values(&map.find_string("K")), vec!["upper"]);
        assert_eq!(values(&map.find_string("k")), vec!["lower"]);
    }

    #[test]
    fn test_map_set_index_appends_past_end() {
        let mut map = Map::new(Variable::Tx);
        map.set_index("score", 0, "1");
        map.set_index("score", 0, "2");
        map.set_index("score", 5, "3");
        assert_eq!(map.get("score"), vec!["2", "3"]);
    }

    #[test]
    fn test_map_set_index_keeps_first_key() {
        let mut map = Map::new(Variable::ArgsPost);
        map.add("Foo", "a");
        map.set_index("FOO", 0, "b");
        let found = map.find_all();
        assert_eq!(found[0].key, "Foo");
        assert_eq!(found[0].value, "b");
    }

    #[test]
    fn test_map_add_unique() {
        let mut map = Map::new(Variable::RequestHeaders);
        map.add_unique("host", "a");
        map.add_unique("host", "a");
        map.add_unique("host", "b");
        assert_eq!(map.get("host"), vec!["a", "b"]);
    }

    #[test]
    fn test_map_remove_keeps_order() {
        let mut map = Map::new(Variable::Tx);
        map.add("a", "1");
        map.add("b", "2");
        map.add("c", "3");
        map.remove("B");
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(map.get("c"), vec!["3"]);
        map.add("d", "4");
        assert_eq!(map.get("d"), vec!["4"]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_map_find_regex_uses_lowercase_key() {
        let mut map = Map::new(Variable::RequestHeaders);
        map.add("X-Forwarded-For", "1.1.1.1");
        map.add("Host", "example.com");
        let re = Regex::new("^x-").unwrap();
        let found = map.find_regex(&re);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "X-Forwarded-For");
    }

    #[test]
    fn test_map_missing_key_is_empty() {
        let map = Map::new(Variable::Tx);
        assert!(map.find_string("nope").is_empty());
        assert!(map.get("nope").is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn test_names_view_unique_keys() {
        let mut map = Map::new(Variable::ArgsGet);
        map.add("User", "a");
        map.add("user", "b");
        map.add("id", "1");
        let names = map.find_names(Variable::ArgsGetNames, None, None);
        assert_eq!(values(&names), vec!["User", "id"]);
    }

    #[test]
    fn test_single() {
        let mut single = Single::new(Variable::RequestUri);
        single.set("/index.php");
        let found = single.find_string("ignored");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "/index.php");
        assert_eq!(found[0].full_name(), "REQUEST_URI");
    }

    #[test]
    fn test_lazy_single_memoizes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lazy = LazySingle::new(Variable::Duration, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            "42".to_string()
        });
        assert_eq!(lazy.get(), "42");
        assert_eq!(lazy.get(), "42");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
