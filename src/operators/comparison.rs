//! String and numeric comparison operators.
//!
//! Every argument is a macro, expanded when the operator runs, so
//! `@eq %{tx.threshold}` compares against the live transaction value.

use super::traits::{expand_arg, Operator, OperatorContext};
use crate::error::Result;
use crate::macros::Macro;

/// String test applied between the input and the expanded argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringTest {
    /// Input contains the argument.
    Contains,
    /// Input contains the argument as a whole word.
    ContainsWord,
    /// Input equals the argument.
    Equals,
    /// Input starts with the argument.
    BeginsWith,
    /// Input ends with the argument.
    EndsWith,
    /// Input is found inside the argument.
    Within,
}

/// String comparison operator (@contains, @streq, @within, ...).
#[derive(Debug)]
pub struct StringOperator {
    test: StringTest,
    arg: Macro,
}

impl StringOperator {
    /// Compile a string comparison.
    pub fn new(test: StringTest, argument: &str) -> Result<Self> {
        Ok(Self {
            test,
            arg: Macro::new(argument)?,
        })
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    if word.is_empty() {
        return true;
    }
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    haystack.match_indices(word).any(|(start, m)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + m.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

impl Operator for StringOperator {
    fn evaluate(&self, tx: &mut dyn OperatorContext, input: &str) -> bool {
        let arg = expand_arg(tx, &self.arg);
        let matched = match self.test {
            StringTest::Contains => input.contains(arg.as_str()),
            StringTest::ContainsWord => contains_word(input, &arg),
            StringTest::Equals => input == arg,
            StringTest::BeginsWith => input.starts_with(arg.as_str()),
            StringTest::EndsWith => input.ends_with(arg.as_str()),
            StringTest::Within => arg.contains(input),
        };
        if matched && tx.capturing() {
            let captured = if self.test == StringTest::Within { input } else { arg.as_str() };
            tx.capture_field(0, captured);
        }
        matched
    }

    fn name(&self) -> &'static str {
        match self.test {
            StringTest::Contains => "contains",
            StringTest::ContainsWord => "containsWord",
            StringTest::Equals => "streq",
            StringTest::BeginsWith => "beginsWith",
            StringTest::EndsWith => "endsWith",
            StringTest::Within => "within",
        }
    }
}

/// Numeric relation applied as `input <op> argument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericTest {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
}

/// Numeric comparison operator (@eq, @gt, ...).
#[derive(Debug)]
pub struct NumericOperator {
    test: NumericTest,
    arg: Macro,
}

impl NumericOperator {
    /// Compile a numeric comparison.
    pub fn new(test: NumericTest, argument: &str) -> Result<Self> {
        Ok(Self {
            test,
            arg: Macro::new(argument.trim())?,
        })
    }
}

/// Integer value of a string; anything unparsable is 0.
pub(crate) fn parse_number(s: &str) -> i64 {
    s.trim().parse::<i64>().unwrap_or(0)
}

impl Operator for NumericOperator {
    fn evaluate(&self, tx: &mut dyn OperatorContext, input: &str) -> bool {
        let expected = parse_number(&expand_arg(tx, &self.arg));
        let actual = parse_number(input);
        match self.test {
            NumericTest::Eq => actual == expected,
            NumericTest::Ne => actual != expected,
            NumericTest::Gt => actual > expected,
            NumericTest::Ge => actual >= expected,
            NumericTest::Lt => actual < expected,
            NumericTest::Le => actual <= expected,
        }
    }

    fn name(&self) -> &'static str {
        match self.test {
            NumericTest::Eq => "eq",
            NumericTest::Ne => "ne",
            NumericTest::Gt => "gt",
            NumericTest::Ge => "ge",
            NumericTest::Lt => "lt",
            NumericTest::Le => "le",
        }
    }
}
