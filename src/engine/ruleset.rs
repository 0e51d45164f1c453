//! The ordered rule list of a WAF and rule filters.

use crate::error::{Error, Result};
use std::fmt;

use super::rule::Rule;

/// An inclusive id range (`100-200`) or single id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    /// First id.
    pub start: i32,
    /// Last id.
    pub end: i32,
}

impl IdRange {
    /// Parse `N` or `A-B`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let parse_id = |s: &str| {
            s.trim()
                .parse::<i32>()
                .map_err(|_| Error::config(format!("invalid rule id: {s}")))
        };
        // Leading '-' would be a negative number, not a range.
        let (start, end) = match value.get(1..).and_then(|rest| rest.find('-')) {
            Some(pos) => (parse_id(&value[..pos + 1])?, parse_id(&value[pos + 2..])?),
            None => {
                let id = parse_id(value)?;
                (id, id)
            }
        };
        if start > end {
            return Err(Error::config(format!("invalid id range: {value}")));
        }
        Ok(Self { start, end })
    }

    /// Parse a whitespace- or comma-separated list of ids and ranges.
    pub fn parse_list(value: &str) -> Result<Vec<Self>> {
        let ranges = value
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect::<Result<Vec<_>>>()?;
        if ranges.is_empty() {
            return Err(Error::config("empty rule id list"));
        }
        Ok(ranges)
    }

    /// Whether `id` falls in the range.
    pub fn contains(&self, id: i32) -> bool {
        (self.start..=self.end).contains(&id)
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Selects rules by id, tag or message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleFilter {
    /// Ids and id ranges.
    Ids(Vec<IdRange>),
    /// A `tag` value, compared case-insensitively.
    Tag(String),
    /// A `msg` value as written.
    Msg(String),
}

impl RuleFilter {
    /// Whether `rule` is selected.
    pub fn matches(&self, rule: &Rule) -> bool {
        match self {
            RuleFilter::Ids(ranges) => rule.id != 0 && ranges.iter().any(|r| r.contains(rule.id)),
            RuleFilter::Tag(tag) => rule.has_tag(tag),
            RuleFilter::Msg(msg) => rule.metadata.msg.is_some() && rule.msg_text() == msg,
        }
    }
}

/// The ordered list of compiled rules.
#[derive(Debug, Clone, Default)]
pub struct RuleGroup {
    rules: Vec<Rule>,
}

impl RuleGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Ids must be unique; markers carry id 0.
    pub fn add(&mut self, rule: Rule) -> Result<()> {
        if rule.id != 0 && self.find_by_id(rule.id).is_some() {
            return Err(Error::DuplicateRuleId { id: rule.id });
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Rule with `id`.
    pub fn find_by_id(&self, id: i32) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Mutable rule with `id`.
    pub fn find_by_id_mut(&mut self, id: i32) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|r| r.id == id)
    }

    /// Rules selected by `filter`.
    pub fn find_matching<'a>(&'a self, filter: &'a RuleFilter) -> impl Iterator<Item = &'a Rule> {
        self.rules.iter().filter(move |r| filter.matches(r))
    }

    /// Mutable rules selected by `filter`.
    pub fn find_matching_mut<'a>(
        &'a mut self,
        filter: &'a RuleFilter,
    ) -> impl Iterator<Item = &'a mut Rule> {
        self.rules.iter_mut().filter(move |r| filter.matches(r))
    }

    /// Remove every rule selected by `filter`; returns how many went.
    pub fn delete(&mut self, filter: &RuleFilter) -> usize {
        let before = self.rules.len();
        self.rules.retain(|r| !filter.matches(r));
        before - self.rules.len()
    }

    /// Remove the rule with `id`.
    pub fn delete_by_id(&mut self, id: i32) -> usize {
        self.delete(&RuleFilter::Ids(vec![IdRange { start: id, end: id }]))
    }

    /// The most recently added rule.
    pub fn last_mut(&mut self) -> Option<&mut Rule> {
        self.rules.last_mut()
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules, markers included.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Remove every rule.
    pub fn clear(&mut self) {
        self.rules.clear();
    }
}
