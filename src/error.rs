//! Error types for zentinel-seclang.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zentinel-seclang operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Error parsing a SecLang directive.
    #[error("parse error at {location}: {message}")]
    Parse {
        /// Human-readable error message.
        message: String,
        /// Location in the source (file:line:col or line:col).
        location: String,
        /// The source text that caused the error (if available).
        source_text: Option<String>,
    },

    /// Unknown configuration directive.
    #[error("unknown directive: {name}")]
    UnknownDirective {
        /// The directive as written.
        name: String,
    },

    /// Error loading a rule file.
    #[error("failed to load rule file {path}: {source}")]
    RuleFileLoad {
        /// Path to the file that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Include nesting went past the recursion cap.
    #[error("include depth exceeded ({depth}) while loading {path}")]
    IncludeDepthExceeded {
        /// Depth at which loading stopped.
        depth: usize,
        /// The include target being loaded.
        path: String,
    },

    /// Error compiling a regex pattern.
    #[error("invalid regex pattern '{pattern}': {source}")]
    RegexCompile {
        /// The pattern that failed to compile.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// Error compiling an Aho-Corasick pattern set.
    #[error("invalid pattern set: {message}")]
    PatternSet {
        /// Error message.
        message: String,
    },

    /// Error parsing an IP address or network.
    #[error("invalid IP address or network '{value}': {message}")]
    InvalidIp {
        /// The value that failed to parse.
        value: String,
        /// Error message.
        message: String,
    },

    /// Unknown variable name.
    #[error("unknown variable: {name}")]
    UnknownVariable {
        /// The unknown variable name.
        name: String,
    },

    /// Unknown operator name.
    #[error("unknown operator: @{name}")]
    UnknownOperator {
        /// The unknown operator name.
        name: String,
    },

    /// Invalid operator argument.
    #[error("invalid argument for operator '@{operator}': {message}")]
    InvalidOperatorArgument {
        /// The operator name.
        operator: String,
        /// Error message.
        message: String,
    },

    /// Unknown transformation name.
    #[error("unknown transformation: t:{name}")]
    UnknownTransformation {
        /// The unknown transformation name.
        name: String,
    },

    /// Unknown action name.
    #[error("unknown action: {name}")]
    UnknownAction {
        /// The unknown action name.
        name: String,
    },

    /// Invalid action argument.
    #[error("invalid argument for action '{action}': {message}")]
    InvalidActionArgument {
        /// The action name.
        action: String,
        /// Error message.
        message: String,
    },

    /// Invalid macro template.
    #[error("invalid macro '{input}': {message}")]
    InvalidMacro {
        /// The template text.
        input: String,
        /// Error message.
        message: String,
    },

    /// Rule is missing required 'id' action.
    #[error("rule is missing required 'id' action")]
    MissingRuleId,

    /// Duplicate rule ID.
    #[error("duplicate rule id: {id}")]
    DuplicateRuleId {
        /// The duplicate ID.
        id: i32,
    },

    /// A directive referenced a rule that does not exist.
    #[error("rule {id} not found")]
    RuleNotFound {
        /// The missing rule ID.
        id: i32,
    },

    /// Rule chain is incomplete.
    #[error("incomplete rule chain: chain action without following rule (rule {id})")]
    IncompleteChain {
        /// ID of the chain root left open.
        id: i32,
    },

    /// A body processor rejected its input.
    #[error("{processor} body processor failed: {message}")]
    BodyProcessor {
        /// Processor name (URLENCODED, MULTIPART, JSON, ...).
        processor: String,
        /// Error message.
        message: String,
    },

    /// The persistence collaborator failed.
    #[error("persistence error: {message}")]
    Persistence {
        /// Error message.
        message: String,
    },

    /// The audit log writer failed.
    #[error("audit log error: {message}")]
    AuditLog {
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Underlying I/O error (body buffers, temp files).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a parse error with location information.
    pub fn parse(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            location: location.into(),
            source_text: None,
        }
    }

    /// Create a parse error with location and source text.
    pub fn parse_with_source(
        message: impl Into<String>,
        location: impl Into<String>,
        source_text: impl Into<String>,
    ) -> Self {
        Self::Parse {
            message: message.into(),
            location: location.into(),
            source_text: Some(source_text.into()),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid action argument error.
    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidActionArgument {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create an invalid operator argument error.
    pub fn operator(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperatorArgument {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// Create a body processor error.
    pub fn body(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BodyProcessor {
            processor: processor.into(),
            message: message.into(),
        }
    }

    /// Whether this error was raised while compiling rules (and may be
    /// skipped under `SecIgnoreRuleCompilationErrors On`).
    pub fn is_compilation_error(&self) -> bool {
        !matches!(
            self,
            Error::Io(_)
                | Error::RuleFileLoad { .. }
                | Error::IncludeDepthExceeded { .. }
                | Error::BodyProcessor { .. }
                | Error::Persistence { .. }
                | Error::AuditLog { .. }
        )
    }
}

/// Source location for error reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    /// File path (if known).
    pub file: Option<PathBuf>,
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
}

impl SourceLocation {
    /// Location at the start of a line.
    pub fn new(file: Option<PathBuf>, line: usize) -> Self {
        Self {
            file,
            line,
            column: 1,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:{}:{}", file.display(), self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let loc = SourceLocation::new(Some(PathBuf::from("rules/base.conf")), 12);
        assert_eq!(loc.to_string(), "rules/base.conf:12:1");
        let loc = SourceLocation::new(None, 3);
        assert_eq!(loc.to_string(), "3:1");
    }

    #[test]
    fn test_compilation_error_classification() {
        assert!(Error::MissingRuleId.is_compilation_error());
        assert!(Error::UnknownOperator { name: "foo".into() }.is_compilation_error());
        let depth = Error::IncludeDepthExceeded {
            depth: 101,
            path: "a.conf".into(),
        };
        assert!(!depth.is_compilation_error());
    }
}
