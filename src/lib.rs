//! # zentinel-seclang
//!
//! Pure Rust engine for the SecLang rule language used by ModSecurity and
//! the OWASP Core Rule Set.
//!
//! Directives are compiled once into a [`Waf`]. Each HTTP exchange gets its
//! own [`Transaction`], stepped through the five phases by the embedder;
//! a disruptive rule leaves an [`Interruption`] the embedder acts on.
//!
//! ## Features
//!
//! - SecLang directives, `Include` with globs, chains, markers and default actions
//! - Tag-indexed variables with composite views over the argument maps
//! - URL-encoded, multipart, JSON, NDJSON and XML request body processors
//! - Persistent collections behind a pluggable [`KvStore`]
//! - JSON audit records and ModSecurity-style error-log lines
//!
//! ## Quick Start
//!
//! ```
//! use zentinel_seclang::Waf;
//!
//! let waf = Waf::from_string(r#"
//!     SecRuleEngine On
//!     SecRule ARGS "@contains <script>" "id:100,phase:1,deny,status:403,msg:'XSS'"
//! "#)?;
//!
//! let mut tx = waf.new_transaction();
//! tx.process_connection("203.0.113.7", 51234, "192.0.2.1", 80);
//! tx.process_uri("/search?q=<script>", "GET", "HTTP/1.1");
//! tx.add_request_header("Host", "example.com");
//!
//! if let Some(it) = tx.process_request_headers() {
//!     assert_eq!(it.status, 403);
//!     assert_eq!(it.rule_id, 100);
//! }
//! tx.process_logging();
//! # Ok::<(), zentinel_seclang::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod actions;
pub mod audit;
pub mod body;
pub mod config;
pub mod engine;
pub mod error;
pub mod macros;
pub mod metadata;
pub mod operators;
pub mod parser;
pub mod persistence;
pub mod transformations;
pub mod variables;

// Re-export main types at crate root
pub use audit::{AuditLog, AuditLogWriter};
pub use config::{RuleEngineMode, WafConfig};
pub use engine::{
    Interruption, InterruptionAction, MatchedRule, Phase, Rule, RuleGroup, Transaction, Waf,
    WafBuilder,
};
pub use error::{Error, Result};
pub use parser::{Filesystem, MemoryFilesystem, OsFilesystem, ParserMode};
pub use persistence::{KvStore, MemoryStore};
pub use variables::Variable;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
