//! Composite views over owning maps.
//!
//! Views borrow the maps they cover and are built on demand, so a reset of
//! an underlying map is observed by every view and the views themselves
//! have nothing to reset.

use super::{Collection, LazySingle, Map, MatchData, PersistentCollection, Single, Variable};
use regex::Regex;

/// Concatenation of several maps, relabelled with the view's variable.
#[derive(Debug, Clone)]
pub struct ProxyView<'a> {
    variable: Variable,
    maps: Vec<&'a Map>,
}

impl<'a> ProxyView<'a> {
    /// Create a view over `maps`.
    pub fn new(variable: Variable, maps: Vec<&'a Map>) -> Self {
        Self { variable, maps }
    }

    fn relabel(&self, found: Vec<MatchData>) -> impl Iterator<Item = MatchData> + '_ {
        found.into_iter().map(move |mut m| {
            m.variable = self.variable;
            m
        })
    }

    /// First value under `key` across the covered maps.
    pub fn first(&self, key: &str) -> Option<&'a str> {
        self.maps.iter().find_map(|m| m.first(key))
    }
}

impl Collection for ProxyView<'_> {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn find_all(&self) -> Vec<MatchData> {
        self.maps
            .iter()
            .flat_map(|m| self.relabel(m.find_all()).collect::<Vec<_>>())
            .collect()
    }

    fn find_string(&self, key: &str) -> Vec<MatchData> {
        self.maps
            .iter()
            .flat_map(|m| self.relabel(m.find_string(key)).collect::<Vec<_>>())
            .collect()
    }

    fn find_regex(&self, re: &Regex) -> Vec<MatchData> {
        self.maps
            .iter()
            .flat_map(|m| self.relabel(m.find_regex(re)).collect::<Vec<_>>())
            .collect()
    }
}

/// Keys of several maps exposed as values (`*_NAMES`).
#[derive(Debug, Clone)]
pub struct NamesView<'a> {
    variable: Variable,
    maps: Vec<&'a Map>,
}

impl<'a> NamesView<'a> {
    /// Create a view over `maps`.
    pub fn new(variable: Variable, maps: Vec<&'a Map>) -> Self {
        Self { variable, maps }
    }
}

impl Collection for NamesView<'_> {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn find_all(&self) -> Vec<MatchData> {
        self.maps
            .iter()
            .flat_map(|m| m.find_names(self.variable, None, None))
            .collect()
    }

    fn find_string(&self, key: &str) -> Vec<MatchData> {
        self.maps
            .iter()
            .flat_map(|m| m.find_names(self.variable, Some(key), None))
            .collect()
    }

    fn find_regex(&self, re: &Regex) -> Vec<MatchData> {
        self.maps
            .iter()
            .flat_map(|m| m.find_names(self.variable, None, Some(re)))
            .collect()
    }
}

/// Summed byte length of every value in several maps.
#[derive(Debug, Clone)]
pub struct SizeView<'a> {
    variable: Variable,
    maps: Vec<&'a Map>,
}

impl<'a> SizeView<'a> {
    /// Create a view over `maps`.
    pub fn new(variable: Variable, maps: Vec<&'a Map>) -> Self {
        Self { variable, maps }
    }

    /// The combined size.
    pub fn size(&self) -> usize {
        self.maps
            .iter()
            .flat_map(|m| m.entries())
            .map(|v| v.value.len())
            .sum()
    }
}

impl Collection for SizeView<'_> {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn find_all(&self) -> Vec<MatchData> {
        vec![MatchData::new(self.variable, "", self.size().to_string())]
    }

    fn find_string(&self, _key: &str) -> Vec<MatchData> {
        self.find_all()
    }

    fn find_regex(&self, _re: &Regex) -> Vec<MatchData> {
        self.find_all()
    }
}

/// A resolved variable: either an owning container or a borrowed view.
#[derive(Debug)]
pub enum CollectionRef<'a> {
    /// Plain single.
    Single(&'a Single),
    /// Lazily computed single.
    Lazy(&'a LazySingle),
    /// Owning map.
    Map(&'a Map),
    /// Persistent collection.
    Persistent(&'a PersistentCollection),
    /// Concatenation view.
    Proxy(ProxyView<'a>),
    /// Key names view.
    Names(NamesView<'a>),
    /// Size view.
    Size(SizeView<'a>),
}

impl<'a> CollectionRef<'a> {
    /// Value used by macro expansion: the single's value, or the first
    /// value under `key`.
    pub fn expand_value(&self, key: &str) -> Option<String> {
        match self {
            CollectionRef::Single(s) => Some(s.get().to_string()),
            CollectionRef::Lazy(s) => Some(s.get().to_string()),
            CollectionRef::Size(s) => Some(s.size().to_string()),
            CollectionRef::Map(m) if !key.is_empty() => m.first(key).map(str::to_string),
            CollectionRef::Proxy(p) if !key.is_empty() => p.first(key).map(str::to_string),
            CollectionRef::Persistent(p) if !key.is_empty() => p.get(key),
            other => other.find_string(key).into_iter().next().map(|m| m.value),
        }
    }

    fn inner(&self) -> &dyn Collection {
        match self {
            CollectionRef::Single(s) => *s,
            CollectionRef::Lazy(s) => *s,
            CollectionRef::Map(m) => *m,
            CollectionRef::Persistent(p) => *p,
            CollectionRef::Proxy(p) => p,
            CollectionRef::Names(n) => n,
            CollectionRef::Size(s) => s,
        }
    }
}

impl Collection for CollectionRef<'_> {
    fn variable(&self) -> Variable {
        self.inner().variable()
    }

    fn find_all(&self) -> Vec<MatchData> {
        self.inner().find_all()
    }

    fn find_string(&self, key: &str) -> Vec<MatchData> {
        self.inner().find_string(key)
    }

    fn find_regex(&self, re: &Regex) -> Vec<MatchData> {
        self.inner().find_regex(re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> (Map, Map, Map) {
        let mut get = Map::new(Variable::ArgsGet);
        get.add("id", "1");
        get.add("Name", "alice");
        let mut post = Map::new(Variable::ArgsPost);
        post.add("comment", "hello world");
        let mut path = Map::new(Variable::ArgsPath);
        path.add("slug", "abc");
        (get, post, path)
    }

    #[test]
    fn test_proxy_concatenates_in_order() {
        let (get, post, path) = args();
        let view = ProxyView::new(Variable::Args, vec![&get, &post, &path]);
        let pairs: Vec<_> = view
            .find_all()
            .into_iter()
            .map(|m| (m.key, m.value))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("id".to_string(), "1".to_string()),
                ("Name".to_string(), "alice".to_string()),
                ("comment".to_string(), "hello world".to_string()),
                ("slug".to_string(), "abc".to_string()),
            ]
        );
        assert!(view.find_all().iter().all(|m| m.variable == Variable::Args));
        assert_eq!(view.find_string("NAME")[0].value, "alice");
    }

    #[test]
    fn test_names_view() {
        let (get, post, path) = args();
        let view = NamesView::new(Variable::ArgsNames, vec![&get, &post, &path]);
        let names: Vec<_> = view.find_all().into_iter().map(|m| m.value).collect();
        assert_eq!(names, vec!["id", "Name", "comment", "slug"]);
    }

    #[test]
    fn test_size_view() {
        let (get, post, _) = args();
        let view = SizeView::new(Variable::ArgsCombinedSize, vec![&get, &post]);
        assert_eq!(view.size(), 1 + 5 + 11);
        assert_eq!(view.find_all()[0].value, "17");
    }

    #[test]
    fn test_expand_value() {
        let (get, post, path) = args();
        let proxy = CollectionRef::Proxy(ProxyView::new(Variable::Args, vec![&get, &post, &path]));
        assert_eq!(proxy.expand_value("comment").as_deref(), Some("hello world"));
        assert_eq!(proxy.expand_value("missing"), None);
    }
}
