//! Pattern matching operators (@rx, @pm, @strmatch, @restpath).

use super::traits::{Operator, OperatorContext};
use super::OperatorOptions;
use crate::error::{Error, Result};
use aho_corasick::AhoCorasick;
use regex::{Regex, RegexBuilder};

const REGEX_SIZE_LIMIT: usize = 32 * 1024 * 1024;
const MAX_CAPTURES: usize = 10;

/// Compile a rule regex with the engine's flags (dot matches newline,
/// multi-line anchors).
pub(crate) fn compile_regex(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .multi_line(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|source| Error::RegexCompile {
            pattern: pattern.to_string(),
            source,
        })
}

/// Regex operator (@rx).
#[derive(Debug)]
pub struct RxOperator {
    regex: Regex,
}

impl RxOperator {
    /// Compile a regex operator.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::operator("rx", "empty pattern"));
        }
        Ok(Self {
            regex: compile_regex(pattern)?,
        })
    }
}

impl Operator for RxOperator {
    fn evaluate(&self, tx: &mut dyn OperatorContext, input: &str) -> bool {
        if !tx.capturing() {
            return self.regex.is_match(input);
        }
        let Some(captures) = self.regex.captures(input) else {
            return false;
        };
        for (i, group) in captures.iter().take(MAX_CAPTURES).enumerate() {
            if let Some(m) = group {
                tx.capture_field(i, m.as_str());
            }
        }
        true
    }

    fn name(&self) -> &'static str {
        "rx"
    }
}

/// Phrase match operator (@pm, @pmFromFile, @pmFromDataset).
#[derive(Debug)]
pub struct PmOperator {
    automaton: AhoCorasick,
    name: &'static str,
}

impl PmOperator {
    /// Create a phrase matcher from space-separated phrases.
    pub fn new(phrases: &str) -> Result<Self> {
        Self::from_patterns("pm", phrases.split_whitespace().map(str::to_string).collect())
    }

    /// Create a phrase matcher from a pattern list.
    pub fn from_patterns(name: &'static str, patterns: Vec<String>) -> Result<Self> {
        if patterns.is_empty() {
            return Err(Error::PatternSet {
                message: format!("@{name}: empty pattern list"),
            });
        }

        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&patterns)
            .map_err(|e| Error::PatternSet {
                message: e.to_string(),
            })?;

        Ok(Self { automaton, name })
    }

    /// Create a phrase matcher from a file of one phrase per line.
    pub fn from_file(options: &OperatorOptions<'_>) -> Result<Self> {
        let content = options.read_data_file()?;
        Self::from_patterns("pmFromFile", pattern_lines(&content))
    }

    /// Create a phrase matcher from a `SecDataset` table entry.
    pub fn from_dataset(options: &OperatorOptions<'_>) -> Result<Self> {
        let name = options.arguments.trim();
        let lines = options
            .datasets
            .get(name)
            .ok_or_else(|| Error::operator("pmFromDataset", format!("dataset {name} not found")))?;
        Self::from_patterns("pmFromDataset", lines.clone())
    }
}

/// Non-empty, non-comment lines of a data file.
pub(crate) fn pattern_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

impl Operator for PmOperator {
    fn evaluate(&self, tx: &mut dyn OperatorContext, input: &str) -> bool {
        if !tx.capturing() {
            return self.automaton.is_match(input);
        }
        let mut matched = false;
        for (i, m) in self.automaton.find_iter(input).take(MAX_CAPTURES).enumerate() {
            tx.capture_field(i, &input[m.start()..m.end()]);
            matched = true;
        }
        matched
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Case-sensitive single string search (@strmatch).
#[derive(Debug)]
pub struct StrMatchOperator {
    needle: String,
}

impl StrMatchOperator {
    /// Create a string search.
    pub fn new(needle: &str) -> Result<Self> {
        if needle.is_empty() {
            return Err(Error::operator("strmatch", "empty pattern"));
        }
        Ok(Self {
            needle: needle.to_string(),
        })
    }
}

impl Operator for StrMatchOperator {
    fn evaluate(&self, _tx: &mut dyn OperatorContext, input: &str) -> bool {
        input.contains(&self.needle)
    }

    fn name(&self) -> &'static str {
        "strmatch"
    }
}

/// REST path template (@restpath /users/{id}) that fills `ARGS_PATH`.
#[derive(Debug)]
pub struct RestPathOperator {
    regex: Regex,
    names: Vec<String>,
}

impl RestPathOperator {
    /// Compile a path template.
    pub fn new(template: &str) -> Result<Self> {
        let template = template.trim();
        if template.is_empty() {
            return Err(Error::operator("restpath", "empty template"));
        }
        let mut pattern = String::from("^");
        let mut names = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                return Err(Error::operator("restpath", "unterminated '{'"));
            };
            let name = &rest[open + 1..close];
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
                return Err(Error::operator("restpath", format!("invalid parameter name '{name}'")));
            }
            pattern.push_str(&regex::escape(&rest[..open]));
            pattern.push_str(&format!("(?P<{name}>[^/?]+)"));
            names.push(name.to_string());
            rest = &rest[close + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');
        Ok(Self {
            regex: compile_regex(&pattern)?,
            names,
        })
    }
}

impl Operator for RestPathOperator {
    fn evaluate(&self, tx: &mut dyn OperatorContext, input: &str) -> bool {
        let Some(captures) = self.regex.captures(input) else {
            return false;
        };
        for name in &self.names {
            if let Some(m) = captures.name(name) {
                tx.add_path_argument(name, m.as_str());
            }
        }
        true
    }

    fn name(&self) -> &'static str {
        "restpath"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::traits::testing::TestContext;

    #[test]
    fn test_rx_simple() {
        let op = RxOperator::new("^admin").unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "admin"));
        assert!(!op.evaluate(&mut ctx, "user"));
    }

    #[test]
    fn test_rx_captures_only_when_capturing() {
        let op = RxOperator::new(r"user=(\w+)").unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "user=john"));
        assert!(ctx.captures.is_empty());

        let mut ctx = TestContext::capturing();
        assert!(op.evaluate(&mut ctx, "user=john"));
        assert_eq!(
            ctx.captures,
            vec![(0, "user=john".to_string()), (1, "john".to_string())]
        );
    }

    #[test]
    fn test_rx_invalid_pattern() {
        assert!(RxOperator::new("(unclosed").is_err());
        assert!(RxOperator::new("").is_err());
    }

    #[test]
    fn test_pm_simple() {
        let op = PmOperator::new("admin root user").unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "the admin user"));
        assert!(!op.evaluate(&mut ctx, "guest"));
    }

    #[test]
    fn test_pm_case_insensitive() {
        let op = PmOperator::new("ADMIN").unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "admin"));
        assert!(op.evaluate(&mut ctx, "Admin"));
    }

    #[test]
    fn test_pm_capture() {
        let op = PmOperator::new("foo bar").unwrap();
        let mut ctx = TestContext::capturing();
        assert!(op.evaluate(&mut ctx, "xx BAR yy"));
        assert_eq!(ctx.captures, vec![(0, "BAR".to_string())]);
    }

    #[test]
    fn test_pattern_lines_skip_comments() {
        let lines = pattern_lines("# header\nfoo\n\n  bar  \n");
        assert_eq!(lines, vec!["foo", "bar"]);
    }

    #[test]
    fn test_strmatch_case_sensitive() {
        let op = StrMatchOperator::new("WebZIP").unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "Mozilla WebZIP/4.0"));
        assert!(!op.evaluate(&mut ctx, "webzip"));
    }

    #[test]
    fn test_restpath() {
        let op = RestPathOperator::new("/api/users/{id}/posts/{post_id}").unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "/api/users/42/posts/7"));
        assert_eq!(
            ctx.path_args,
            vec![
                ("id".to_string(), "42".to_string()),
                ("post_id".to_string(), "7".to_string())
            ]
        );
        assert!(!op.evaluate(&mut ctx, "/api/users/42"));
        assert!(RestPathOperator::new("/a/{bad-name}").is_err());
    }
}
