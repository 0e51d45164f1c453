//! Value metadata classification.
//!
//! A rule tagged `metadatafilter/<kind>[,<kind>...]` only evaluates
//! argument values whose classification contains one of the listed kinds.

use base64::{engine::general_purpose, Engine as _};
use std::fmt;

/// A classification a value can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueMetadata {
    /// Digits only, with an optional sign or decimal point.
    Numeric = 0,
    /// Anything that is not numeric.
    NotNumeric = 1,
    /// `true`/`false`/`on`/`off`/`yes`/`no`/`0`/`1`.
    Boolean = 2,
    /// ASCII letters and digits only.
    Alphanumeric = 3,
    /// Only ASCII characters.
    Ascii = 4,
    /// Valid padded base64 with no other characters.
    Base64 = 5,
    /// Parses as an absolute URI with a scheme.
    Uri = 6,
    /// Contains non-ASCII characters.
    Unicode = 7,
}

impl ValueMetadata {
    /// Parse a kind name as used in the `metadatafilter/` tag.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "numeric" => Some(Self::Numeric),
            "not_numeric" | "notnumeric" => Some(Self::NotNumeric),
            "boolean" => Some(Self::Boolean),
            "alphanumeric" => Some(Self::Alphanumeric),
            "ascii" => Some(Self::Ascii),
            "base64" => Some(Self::Base64),
            "uri" => Some(Self::Uri),
            "unicode" => Some(Self::Unicode),
            _ => None,
        }
    }

    /// Kind name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::NotNumeric => "not_numeric",
            Self::Boolean => "boolean",
            Self::Alphanumeric => "alphanumeric",
            Self::Ascii => "ascii",
            Self::Base64 => "base64",
            Self::Uri => "uri",
            Self::Unicode => "unicode",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u8)
    }
}

impl fmt::Display for ValueMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`ValueMetadata`] kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MetadataSet(u16);

impl MetadataSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a kind.
    pub fn insert(&mut self, kind: ValueMetadata) {
        self.0 |= kind.bit();
    }

    /// Whether the kind is present.
    pub fn contains(self, kind: ValueMetadata) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether the two sets share a kind.
    pub fn intersects(self, other: MetadataSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse the list after `metadatafilter/` (comma separated).
    pub fn parse_filter(list: &str) -> Option<Self> {
        let mut set = Self::empty();
        for name in list.split(',').filter(|s| !s.trim().is_empty()) {
            set.insert(ValueMetadata::parse(name)?);
        }
        (!set.is_empty()).then_some(set)
    }

    /// Classify a value.
    pub fn classify(value: &str) -> Self {
        let mut set = Self::empty();
        if is_numeric(value) {
            set.insert(ValueMetadata::Numeric);
        } else {
            set.insert(ValueMetadata::NotNumeric);
        }
        if is_boolean(value) {
            set.insert(ValueMetadata::Boolean);
        }
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            set.insert(ValueMetadata::Alphanumeric);
        }
        if value.is_ascii() {
            set.insert(ValueMetadata::Ascii);
        } else {
            set.insert(ValueMetadata::Unicode);
        }
        if is_base64(value) {
            set.insert(ValueMetadata::Base64);
        }
        if is_uri(value) {
            set.insert(ValueMetadata::Uri);
        }
        set
    }
}

fn is_numeric(value: &str) -> bool {
    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    if digits.is_empty() {
        return false;
    }
    let mut seen_dot = false;
    let mut seen_digit = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    seen_digit
}

fn is_boolean(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "false" | "on" | "off" | "yes" | "no" | "0" | "1"
    )
}

fn is_base64(value: &str) -> bool {
    value.len() >= 4
        && value.len() % 4 == 0
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        && general_purpose::STANDARD.decode(value).is_ok()
}

fn is_uri(value: &str) -> bool {
    let Some((scheme, rest)) = value.split_once("://") else {
        return false;
    };
    !scheme.is_empty()
        && scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
        && !rest.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_numeric() {
        let set = MetadataSet::classify("-12.5");
        assert!(set.contains(ValueMetadata::Numeric));
        assert!(!set.contains(ValueMetadata::NotNumeric));
        assert!(MetadataSet::classify("12a").contains(ValueMetadata::NotNumeric));
        assert!(MetadataSet::classify(".").contains(ValueMetadata::NotNumeric));
    }

    #[test]
    fn test_classify_boolean_and_alnum() {
        let set = MetadataSet::classify("true");
        assert!(set.contains(ValueMetadata::Boolean));
        assert!(set.contains(ValueMetadata::Alphanumeric));
        assert!(!MetadataSet::classify("a b").contains(ValueMetadata::Alphanumeric));
    }

    #[test]
    fn test_classify_unicode_base64_uri() {
        assert!(MetadataSet::classify("héllo").contains(ValueMetadata::Unicode));
        assert!(MetadataSet::classify("aGVsbG8=").contains(ValueMetadata::Base64));
        assert!(!MetadataSet::classify("hello!").contains(ValueMetadata::Base64));
        assert!(MetadataSet::classify("https://example.com/x").contains(ValueMetadata::Uri));
        assert!(!MetadataSet::classify("not a uri").contains(ValueMetadata::Uri));
    }

    #[test]
    fn test_parse_filter() {
        let filter = MetadataSet::parse_filter("numeric,boolean").unwrap();
        assert!(filter.contains(ValueMetadata::Numeric));
        assert!(filter.contains(ValueMetadata::Boolean));
        assert!(filter.intersects(MetadataSet::classify("42")));
        assert!(!filter.intersects(MetadataSet::classify("abc")));
        assert!(MetadataSet::parse_filter("bogus").is_none());
        assert!(MetadataSet::parse_filter("").is_none());
    }
}
