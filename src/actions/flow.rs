//! Flow control actions (chain, skip, skipAfter).

use crate::engine::{Rule, Transaction};
use crate::error::{Error, Result};

/// Actions that change which rules run next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowAction {
    /// The next rule is part of this one.
    Chain,
    /// Skip the next N rules.
    Skip(u32),
    /// Skip until the named marker.
    SkipAfter(String),
}

impl FlowAction {
    /// Action name.
    pub fn name(&self) -> &'static str {
        match self {
            FlowAction::Chain => "chain",
            FlowAction::Skip(_) => "skip",
            FlowAction::SkipAfter(_) => "skipAfter",
        }
    }

    pub(crate) fn init(&self, rule: &mut Rule) {
        if *self == FlowAction::Chain {
            rule.has_chain = true;
        }
    }

    pub(crate) fn evaluate(&self, _rule: &Rule, tx: &mut Transaction) {
        match self {
            FlowAction::Chain => {}
            FlowAction::Skip(n) => tx.skip = *n,
            FlowAction::SkipAfter(label) => tx.skip_after = Some(label.clone()),
        }
    }
}

/// Parse `skip:N` (N must be at least 1).
pub fn parse_skip(value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::action("skip", format!("expected a positive count, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skip() {
        assert_eq!(parse_skip("3").unwrap(), 3);
        assert!(parse_skip("0").is_err());
        assert!(parse_skip("x").is_err());
    }

    #[test]
    fn test_chain_init() {
        let mut rule = Rule::new();
        FlowAction::Chain.init(&mut rule);
        assert!(rule.has_chain);
    }
}
