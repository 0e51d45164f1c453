//! Rule engine: the compiled WAF and its transactions.
//!
//! A [`Waf`] is built once from SecLang directives and is immutable
//! afterwards; it can be shared across threads and hands out one
//! [`Transaction`] per HTTP exchange.

mod evaluate;
pub mod interruption;
pub mod matched;
pub mod phase;
pub mod rule;
pub mod ruleset;
pub mod transaction;

pub use interruption::{Interruption, InterruptionAction};
pub use matched::MatchedRule;
pub use phase::Phase;
pub use rule::{KeySelector, Rule, RuleMetadata, RuleOperator, VariableSelector, VariableTarget};
pub use ruleset::{IdRange, RuleFilter, RuleGroup};
pub use transaction::Transaction;

use crate::audit::{writer_from_config, AuditLogWriter};
use crate::body::{BodyProcessor, BodyProcessorRegistry};
use crate::config::WafConfig;
use crate::error::Result;
use crate::operators::{OperatorFactory, OperatorRegistry};
use crate::parser::{Filesystem, OsFilesystem, Parser, ParserMode};
use crate::persistence::{KvStore, MemoryStore};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Called for every matched rule that has `log` set.
pub type ErrorCallback = Arc<dyn Fn(&MatchedRule) + Send + Sync>;

/// Everything a transaction reads from its WAF.
pub(crate) struct WafInner {
    pub(crate) rules: RuleGroup,
    pub(crate) config: WafConfig,
    pub(crate) audit_writer: Option<Arc<dyn AuditLogWriter>>,
    pub(crate) error_callback: Option<ErrorCallback>,
    pub(crate) store: Option<Arc<dyn KvStore>>,
    pub(crate) body_processors: BodyProcessorRegistry,
}

/// A compiled, immutable rule set with its engine configuration.
#[derive(Clone)]
pub struct Waf {
    inner: Arc<WafInner>,
}

impl Waf {
    /// Start configuring a WAF.
    pub fn builder() -> WafBuilder {
        WafBuilder::default()
    }

    /// Build a WAF from directive text.
    pub fn from_string(directives: &str) -> Result<Self> {
        Self::builder().directives(directives).build()
    }

    /// Build a WAF from a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().file(path).build()
    }

    /// Start a transaction with a random id.
    pub fn new_transaction(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.inner), None)
    }

    /// Start a transaction with the given id.
    pub fn new_transaction_with_id(&self, id: impl Into<String>) -> Transaction {
        Transaction::new(Arc::clone(&self.inner), Some(id.into()))
    }

    /// Compiled rules in evaluation order.
    pub fn rules(&self) -> &RuleGroup {
        &self.inner.rules
    }

    /// Engine configuration.
    pub fn config(&self) -> &WafConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Waf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waf")
            .field("rule_count", &self.inner.rules.len())
            .field("rule_engine", &self.inner.config.rule_engine)
            .finish()
    }
}

enum Source {
    Text(String),
    File(PathBuf),
}

/// Collects directives and collaborators, then compiles a [`Waf`].
pub struct WafBuilder {
    sources: Vec<Source>,
    error_callback: Option<ErrorCallback>,
    audit_writer: Option<Arc<dyn AuditLogWriter>>,
    store: Option<Arc<dyn KvStore>>,
    fs: Arc<dyn Filesystem>,
    mode: ParserMode,
    operators: OperatorRegistry,
    body_processors: BodyProcessorRegistry,
}

impl Default for WafBuilder {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            error_callback: None,
            audit_writer: None,
            store: None,
            fs: Arc::new(OsFilesystem),
            mode: ParserMode::Strict,
            operators: OperatorRegistry::new(),
            body_processors: BodyProcessorRegistry::new(),
        }
    }
}

impl WafBuilder {
    /// Append directive text.
    pub fn directives(mut self, text: impl Into<String>) -> Self {
        self.sources.push(Source::Text(text.into()));
        self
    }

    /// Append a configuration file; `Include` inside it resolves relative to it.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.sources.push(Source::File(path.as_ref().to_path_buf()));
        self
    }

    /// Receive every logged rule match.
    pub fn error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MatchedRule) + Send + Sync + 'static,
    {
        self.error_callback = Some(Arc::new(callback));
        self
    }

    /// Write audit records here instead of the writer named by `SecAuditLog*`.
    pub fn audit_writer(mut self, writer: Arc<dyn AuditLogWriter>) -> Self {
        self.audit_writer = Some(writer);
        self
    }

    /// Back persistent collections with `store`. Defaults to an in-memory store.
    pub fn persistence(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Read rule files and data files through `fs`.
    pub fn filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Choose how directive errors are handled.
    pub fn mode(mut self, mode: ParserMode) -> Self {
        self.mode = mode;
        self
    }

    /// Register an operator usable as `@name`.
    pub fn operator(mut self, name: &str, factory: OperatorFactory) -> Self {
        self.operators.register(name, factory);
        self
    }

    /// Register a body processor under its own name.
    pub fn body_processor(mut self, processor: Arc<dyn BodyProcessor>) -> Self {
        self.body_processors.register(processor);
        self
    }

    /// Compile every source in order and freeze the result.
    pub fn build(self) -> Result<Waf> {
        let mut parser = Parser::new()
            .with_filesystem(self.fs)
            .with_mode(self.mode)
            .with_operators(self.operators);
        for source in &self.sources {
            match source {
                Source::Text(text) => parser.parse(text)?,
                Source::File(path) => parser.parse_file(path)?,
            }
        }
        let (rules, config) = parser.finish()?;

        let audit_writer = match self.audit_writer {
            Some(writer) => Some(writer),
            None => writer_from_config(&config.audit_log)?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KvStore>);

        info!(
            rules = rules.len(),
            rule_engine = %config.rule_engine,
            "WAF compiled"
        );
        Ok(Waf {
            inner: Arc::new(WafInner {
                rules,
                config,
                audit_writer,
                error_callback: self.error_callback,
                store: Some(store),
                body_processors: self.body_processors,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleEngineMode;
    use crate::error::Error;
    use crate::operators::{Operator, OperatorOptions, UnconditionalMatchOperator};
    use crate::parser::MemoryFilesystem;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_from_string() {
        let waf = Waf::from_string(
            r#"
            SecRuleEngine On
            SecRule REQUEST_URI "@contains /admin" "id:1,phase:1,deny"
            "#,
        )
        .unwrap();
        assert_eq!(waf.rules().len(), 1);
        assert_eq!(waf.config().rule_engine, RuleEngineMode::On);
        assert!(format!("{waf:?}").contains("rule_count: 1"));
    }

    #[test]
    fn test_sources_compile_in_order() {
        let fs = MemoryFilesystem::new().with_file("/waf/rules.conf", "SecAction \"id:2,pass\"");
        let waf = Waf::builder()
            .filesystem(Arc::new(fs))
            .directives("SecAction \"id:1,pass\"")
            .file("/waf/rules.conf")
            .directives("SecRuleRemoveById 1")
            .build()
            .unwrap();
        let ids: Vec<i32> = waf.rules().rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_incomplete_chain_fails_build() {
        let err = Waf::from_string(r#"SecRule ARGS "@rx a" "id:1,chain""#).unwrap_err();
        assert!(matches!(err, Error::IncompleteChain { id: 1 }));
    }

    #[test]
    fn test_tolerant_mode() {
        let waf = Waf::builder()
            .mode(ParserMode::Tolerant)
            .directives("SecRule ARGS \"@nope x\" \"id:1\"\nSecAction \"id:2,pass\"")
            .build()
            .unwrap();
        assert_eq!(waf.rules().len(), 1);
    }

    #[test]
    fn test_error_callback_only_for_logged_rules() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let waf = Waf::builder()
            .directives(
                r#"
                SecRuleEngine On
                SecAction "id:1,phase:1,pass,log"
                SecAction "id:2,phase:1,pass,nolog"
                "#,
            )
            .error_callback(move |m| {
                assert_eq!(m.rule_id, 1);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        let mut tx = waf.new_transaction();
        tx.process_request_headers();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(tx.matched_rules().len(), 2);
    }

    #[test]
    fn test_custom_operator() {
        fn always(_: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
            Ok(Arc::new(UnconditionalMatchOperator))
        }
        let waf = Waf::builder()
            .operator("alwaysMatch", always)
            .directives(
                r#"
                SecRuleEngine On
                SecRule REQUEST_METHOD "@alwaysMatch" "id:1,phase:1,deny,status:418"
                "#,
            )
            .build()
            .unwrap();
        let mut tx = waf.new_transaction();
        tx.process_uri("/", "GET", "HTTP/1.1");
        assert_eq!(tx.process_request_headers().unwrap().status, 418);
    }

    #[test]
    fn test_waf_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Waf>();
    }
}
