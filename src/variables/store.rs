//! Tag-indexed variable storage for one transaction.

use super::{
    CollectionRef, LazySingle, Map, NamesView, PersistentCollection, ProxyView, Single, SizeView,
    Variable, VariableKind,
};
use crate::persistence::KvStore;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
enum Slot {
    Single(Single),
    Lazy(LazySingle),
    Map(Map),
    Persistent(PersistentCollection),
    View,
}

/// Every variable of a transaction, one slot per tag.
///
/// Mutators silently ignore tags whose shape does not support the
/// operation, which makes writes to views a no-op.
#[derive(Debug)]
pub struct TransactionVariables {
    slots: Vec<Slot>,
}

impl TransactionVariables {
    /// Create the store; `DURATION` is measured from `started`.
    pub fn new(started: Instant, store: Option<Arc<dyn KvStore>>, collection_timeout: u64) -> Self {
        let slots = Variable::ALL
            .iter()
            .map(|&v| match v.kind() {
                VariableKind::Single => Slot::Single(Single::new(v)),
                VariableKind::LazySingle => Slot::Lazy(LazySingle::new(v, move || {
                    started.elapsed().as_micros().to_string()
                })),
                VariableKind::Map => Slot::Map(Map::new(v)),
                VariableKind::Persistent => Slot::Persistent(PersistentCollection::new(
                    v,
                    store.clone(),
                    collection_timeout,
                )),
                VariableKind::Names(_) | VariableKind::Proxy(_) | VariableKind::Size(_) => Slot::View,
            })
            .collect();
        Self { slots }
    }

    fn slot(&self, v: Variable) -> Option<&Slot> {
        self.slots.get(v.index())
    }

    fn slot_mut(&mut self, v: Variable) -> Option<&mut Slot> {
        self.slots.get_mut(v.index())
    }

    fn maps(&self, members: &[Variable]) -> Vec<&Map> {
        members.iter().filter_map(|&m| self.map(m)).collect()
    }

    /// Resolve a variable to its container or view.
    pub fn collection(&self, v: Variable) -> CollectionRef<'_> {
        match (v.kind(), self.slot(v)) {
            (_, Some(Slot::Single(s))) => CollectionRef::Single(s),
            (_, Some(Slot::Lazy(s))) => CollectionRef::Lazy(s),
            (_, Some(Slot::Map(m))) => CollectionRef::Map(m),
            (_, Some(Slot::Persistent(p))) => CollectionRef::Persistent(p),
            (VariableKind::Names(members), _) => CollectionRef::Names(NamesView::new(v, self.maps(members))),
            (VariableKind::Size(members), _) => CollectionRef::Size(SizeView::new(v, self.maps(members))),
            (VariableKind::Proxy(members), _) => CollectionRef::Proxy(ProxyView::new(v, self.maps(members))),
            _ => CollectionRef::Proxy(ProxyView::new(v, Vec::new())),
        }
    }

    /// Owning map for `v`.
    pub fn map(&self, v: Variable) -> Option<&Map> {
        match self.slot(v) {
            Some(Slot::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Mutable owning map for `v`.
    pub fn map_mut(&mut self, v: Variable) -> Option<&mut Map> {
        match self.slot_mut(v) {
            Some(Slot::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Persistent collection for `v`.
    pub fn persistent(&self, v: Variable) -> Option<&PersistentCollection> {
        match self.slot(v) {
            Some(Slot::Persistent(p)) => Some(p),
            _ => None,
        }
    }

    /// Mutable persistent collection for `v`.
    pub fn persistent_mut(&mut self, v: Variable) -> Option<&mut PersistentCollection> {
        match self.slot_mut(v) {
            Some(Slot::Persistent(p)) => Some(p),
            _ => None,
        }
    }

    /// Value of a single variable ("" for other shapes).
    pub fn get(&self, v: Variable) -> &str {
        match self.slot(v) {
            Some(Slot::Single(s)) => s.get(),
            Some(Slot::Lazy(s)) => s.get(),
            _ => "",
        }
    }

    /// Set a single variable.
    pub fn set(&mut self, v: Variable, value: impl Into<String>) {
        match self.slot_mut(v) {
            Some(Slot::Single(s)) => s.set(value),
            Some(Slot::Lazy(s)) => s.set(value),
            _ => {}
        }
    }

    /// Append to a map variable.
    pub fn add(&mut self, v: Variable, key: &str, value: impl Into<String>) {
        if let Some(m) = self.map_mut(v) {
            m.add(key, value);
        }
    }

    /// Append to a map variable unless the value is already present.
    pub fn add_unique(&mut self, v: Variable, key: &str, value: impl Into<String>) {
        if let Some(m) = self.map_mut(v) {
            m.add_unique(key, value);
        }
    }

    /// Write one index of a map variable.
    pub fn set_index(&mut self, v: Variable, key: &str, index: usize, value: impl Into<String>) {
        if let Some(m) = self.map_mut(v) {
            m.set_index(key, index, value);
        }
    }

    /// Remove a key from a map variable.
    pub fn remove(&mut self, v: Variable, key: &str) {
        if let Some(m) = self.map_mut(v) {
            m.remove(key);
        }
    }

    /// Clear an owning variable; views are left alone.
    pub fn reset(&mut self, v: Variable) {
        match self.slot_mut(v) {
            Some(Slot::Single(s)) => s.reset(),
            Some(Slot::Map(m)) => m.reset(),
            _ => {}
        }
    }

    /// First value of `key` in a map variable.
    pub fn first(&self, v: Variable, key: &str) -> Option<&str> {
        self.map(v).and_then(|m| m.first(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::Collection;

    fn store() -> TransactionVariables {
        TransactionVariables::new(Instant::now(), None, 3600)
    }

    #[test]
    fn test_single_and_map_access() {
        let mut vars = store();
        vars.set(Variable::RequestUri, "/a");
        vars.add(Variable::ArgsGet, "x", "1");
        assert_eq!(vars.get(Variable::RequestUri), "/a");
        assert_eq!(vars.first(Variable::ArgsGet, "X"), Some("1"));
    }

    #[test]
    fn test_views_follow_underlying_maps() {
        let mut vars = store();
        vars.add(Variable::ArgsGet, "a", "12");
        vars.add(Variable::ArgsPost, "b", "345");
        assert_eq!(vars.collection(Variable::Args).find_all().len(), 2);
        assert_eq!(vars.collection(Variable::ArgsCombinedSize).find_all()[0].value, "5");

        vars.reset(Variable::Args);
        assert_eq!(vars.collection(Variable::Args).find_all().len(), 2);

        vars.reset(Variable::ArgsGet);
        let names: Vec<_> = vars
            .collection(Variable::ArgsNames)
            .find_all()
            .into_iter()
            .map(|m| m.value)
            .collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_writes_to_views_are_ignored() {
        let mut vars = store();
        vars.add(Variable::Args, "a", "1");
        vars.set(Variable::ArgsNames, "x");
        assert!(vars.collection(Variable::Args).find_all().is_empty());
    }

    #[test]
    fn test_xml_alias() {
        let mut vars = store();
        vars.add(Variable::RequestXml, "/*", "text");
        let found = vars.collection(Variable::Xml).find_string("/*");
        assert_eq!(found[0].value, "text");
        assert_eq!(found[0].variable, Variable::Xml);
    }

    #[test]
    fn test_duration_is_numeric() {
        let vars = store();
        assert!(vars.get(Variable::Duration).parse::<u128>().is_ok());
    }
}
