//! SecLang configuration parser.
//!
//! Compiles directive text into a [`RuleGroup`] and a [`WafConfig`]:
//!
//! - [`lexer`] turns text into logical lines
//! - [`directive`] maps directive names to handlers
//! - [`variable`], [`operator`] and [`action`] tokenize the fields of a rule
//!
//! `Include` is resolved here, relative to the including file, through the
//! [`Filesystem`] collaborator.

pub mod action;
pub mod directive;
mod fs;
pub mod lexer;
pub mod operator;
pub mod variable;

pub use fs::{Filesystem, MemoryFilesystem, OsFilesystem};

use crate::actions::Action;
use crate::config::WafConfig;
use crate::engine::{Rule, RuleGroup, RuleOperator};
use crate::error::{Error, Result, SourceLocation};
use crate::operators::{OperatorOptions, OperatorRegistry};
use lexer::{split_directive, Lexer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum `Include` nesting.
pub const MAX_INCLUDE_DEPTH: usize = 100;

/// Maximum number of links in one chain.
pub const MAX_CHAIN_LENGTH: usize = 100;

/// Default actions used for phase 2 when none were declared.
const IMPLICIT_DEFAULT_ACTIONS: &str = "phase:2,log,auditlog,pass";

/// How the parser reacts to a directive that fails to compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParserMode {
    /// Fail on the first error.
    #[default]
    Strict,
    /// Log the error and skip the directive.
    Tolerant,
}

/// SecLang parser state.
pub struct Parser {
    pub(crate) config: WafConfig,
    pub(crate) rules: RuleGroup,
    pub(crate) default_actions: HashMap<u8, Vec<Action>>,
    pub(crate) datasets: HashMap<String, Vec<String>>,
    fs: Arc<dyn Filesystem>,
    operators: OperatorRegistry,
    mode: ParserMode,
    include_depth: usize,
    current_file: Option<PathBuf>,
    current_line: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a strict parser reading from the host filesystem.
    pub fn new() -> Self {
        Self {
            config: WafConfig::default(),
            rules: RuleGroup::new(),
            default_actions: HashMap::new(),
            datasets: HashMap::new(),
            fs: Arc::new(OsFilesystem),
            operators: OperatorRegistry::new(),
            mode: ParserMode::Strict,
            include_depth: 0,
            current_file: None,
            current_line: 0,
        }
    }

    /// Read `Include` targets and data files through `fs`.
    pub fn with_filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Set the error mode.
    pub fn with_mode(mut self, mode: ParserMode) -> Self {
        self.mode = mode;
        self
    }

    /// Use `operators` to compile rule operators.
    pub fn with_operators(mut self, operators: OperatorRegistry) -> Self {
        self.operators = operators;
        self
    }

    /// Parse directive text.
    pub fn parse(&mut self, input: &str) -> Result<()> {
        for line in Lexer::new(input, self.current_file.clone()) {
            let line = line?;
            self.current_line = line.number;
            let (name, opts) = split_directive(&line.text);

            if name.eq_ignore_ascii_case("include") {
                self.include(opts)?;
                continue;
            }

            let result = match directive::lookup(name) {
                Some(handler) => handler(self, opts),
                None => Err(Error::UnknownDirective {
                    name: name.to_string(),
                }),
            };
            if let Err(e) = result {
                self.recover(e, &line.text)?;
            }
        }
        Ok(())
    }

    /// Parse a configuration file.
    pub fn parse_file(&mut self, path: &Path) -> Result<()> {
        let content = self
            .fs
            .read_to_string(path)
            .map_err(|source| Error::RuleFileLoad {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(file = %path.display(), "loading rules");

        let saved_file = self.current_file.replace(path.to_path_buf());
        let saved_line = self.current_line;
        let result = self.parse(&content);
        self.current_file = saved_file;
        self.current_line = saved_line;
        result
    }

    /// Finish parsing; fails if the last chain was left open.
    pub fn finish(self) -> Result<(RuleGroup, WafConfig)> {
        if let Some(rule) = self.rules.rules().last() {
            if rule.is_chain_open() {
                return Err(Error::IncompleteChain { id: rule.id });
            }
        }
        Ok((self.rules, self.config))
    }

    /// Rules compiled so far.
    pub fn rules(&self) -> &RuleGroup {
        &self.rules
    }

    /// Configuration written so far.
    pub fn config(&self) -> &WafConfig {
        &self.config
    }

    /// Where the parser currently is.
    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.current_file.clone(), self.current_line)
    }

    /// Skip a failed directive in tolerant mode, otherwise attach the
    /// location and fail.
    fn recover(&self, error: Error, text: &str) -> Result<()> {
        if !error.is_compilation_error() {
            return Err(error);
        }
        let location = self.location().to_string();
        if self.mode == ParserMode::Tolerant || self.config.ignore_rule_compilation_errors {
            warn!(location = %location, error = %error, "skipping directive that failed to compile");
            return Ok(());
        }
        Err(match error {
            Error::Parse { message, .. } => Error::parse_with_source(message, location, text),
            other => Error::parse_with_source(other.to_string(), location, text),
        })
    }

    fn include(&mut self, opts: &str) -> Result<()> {
        let target = lexer::unquote(opts).replace('\\', "/");
        if target.is_empty() {
            return Err(Error::parse("Include requires a path", self.location().to_string()));
        }
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(Error::IncludeDepthExceeded {
                depth: self.include_depth + 1,
                path: target,
            });
        }

        let mut path = PathBuf::from(&target);
        if path.is_relative() {
            if let Some(dir) = self.current_dir() {
                path = dir.join(path);
            }
        }

        let files = if target.contains(['*', '?', '[']) {
            let pattern = path.to_string_lossy().into_owned();
            let files = self
                .fs
                .glob(&pattern)
                .map_err(|source| Error::RuleFileLoad {
                    path: path.clone(),
                    source,
                })?;
            if files.is_empty() {
                warn!(pattern = %pattern, "Include pattern matched no files");
            }
            files
        } else {
            vec![path]
        };

        self.include_depth += 1;
        let result = files.iter().try_for_each(|file| self.parse_file(file));
        self.include_depth -= 1;
        result
    }

    fn current_dir(&self) -> Option<PathBuf> {
        self.current_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
    }

    /// Compile a `SecRule` or `SecAction` and add it to the group, or link
    /// it to the open chain.
    pub(crate) fn add_rule(
        &mut self,
        variables: Option<&str>,
        operator: Option<&str>,
        actions: &str,
        raw: &str,
    ) -> Result<()> {
        let mut rule = Rule::new();
        rule.file = self.current_file.clone();
        rule.line = self.current_line;
        rule.raw = raw.to_string();

        if let Some(variables) = variables {
            variable::apply_variables(&mut rule, variables)?;
        }
        if let Some(operator) = operator {
            rule.set_operator(self.compile_operator(operator)?);
        }
        let actions = action::parse_actions(actions)?;

        let chain_open = self.rules.rules().last().is_some_and(Rule::is_chain_open);
        if chain_open {
            return self.link_chain(rule, actions);
        }

        let phase = action::phase_of(&actions).unwrap_or(2);
        let defaults = self.defaults_for(phase)?;
        for action in action::merge_defaults(&defaults, actions) {
            rule.add_action(action)?;
        }
        if rule.id == 0 {
            return Err(Error::MissingRuleId);
        }
        debug!(rule_id = rule.id, phase = rule.phase, "rule compiled");
        self.rules.add(rule)
    }

    /// Add a `SecMarker` rule.
    pub(crate) fn add_marker(&mut self, label: &str) -> Result<()> {
        if self.rules.rules().last().is_some_and(Rule::is_chain_open) {
            return Err(Error::parse(
                format!("SecMarker {label} cannot follow a rule with an open chain"),
                self.location().to_string(),
            ));
        }
        let mut marker = Rule::marker(label);
        marker.file = self.current_file.clone();
        marker.line = self.current_line;
        marker.raw = format!("SecMarker {label}");
        self.rules.add(marker)
    }

    fn link_chain(&mut self, mut rule: Rule, actions: Vec<Action>) -> Result<()> {
        for action in actions {
            if action.is_disruptive() {
                return Err(Error::action(
                    action.name(),
                    "disruptive actions are only allowed on the chain starter",
                ));
            }
            rule.add_action(action)?;
        }
        if rule.id != 0 {
            return Err(Error::action("id", "chained rules cannot carry an id"));
        }

        let location = self.location().to_string();
        let Some(root) = self.rules.last_mut() else {
            return Err(Error::parse("chain link without a starter rule", location));
        };
        if root.chain_len() >= MAX_CHAIN_LENGTH {
            return Err(Error::parse(
                format!("chain of rule {} exceeds {MAX_CHAIN_LENGTH} links", root.id),
                location,
            ));
        }
        rule.parent_id = root.id;
        rule.phase = 0;
        let root_id = root.id;
        match root.open_chain_link() {
            Some(link) => link.chain = Some(Box::new(rule)),
            None => return Err(Error::parse("chain link without a starter rule", location)),
        }
        debug!(rule_id = root_id, "chain link compiled");
        Ok(())
    }

    fn defaults_for(&self, phase: u8) -> Result<Vec<Action>> {
        match self.default_actions.get(&phase) {
            Some(defaults) => Ok(defaults.clone()),
            None if phase == 2 => action::parse_actions(IMPLICIT_DEFAULT_ACTIONS),
            None => Ok(Vec::new()),
        }
    }

    fn compile_operator(&self, text: &str) -> Result<RuleOperator> {
        let parsed = operator::parse_operator(text);
        let root = self.current_dir();
        let search_paths: Vec<PathBuf> = self.config.data_dir.iter().cloned().collect();
        let options = OperatorOptions {
            arguments: &parsed.argument,
            root: root.as_deref(),
            search_paths: &search_paths,
            datasets: &self.datasets,
            fs: self.fs.as_ref(),
        };
        let compiled = self.operators.compile(&parsed.name, &options)?;
        Ok(RuleOperator {
            operator: compiled,
            name: parsed.name,
            argument: parsed.argument,
            negated: parsed.negated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, DisruptiveAction};
    use crate::config::RuleEngineMode;
    use crate::variables::Variable;

    fn parse(input: &str) -> Result<(RuleGroup, WafConfig)> {
        let mut parser = Parser::new();
        parser.parse(input)?;
        parser.finish()
    }

    #[test]
    fn test_parse_simple_rule() {
        let (rules, _) = parse(r#"SecRule REQUEST_URI "@contains /admin" "id:1,deny,status:403""#).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules.rules()[0];
        assert_eq!(rule.id, 1);
        assert_eq!(rule.phase, 2);
        assert_eq!(rule.variables[0].variable, Variable::RequestUri);
        assert_eq!(rule.operator.as_ref().unwrap().name, "contains");
        assert_eq!(rule.disruptive_status, Some(403));
        assert!(rule.log);
        assert_eq!(rule.line, 1);
    }

    #[test]
    fn test_parse_secruleengine() {
        let (_, config) = parse("SecRuleEngine On").unwrap();
        assert_eq!(config.rule_engine, RuleEngineMode::On);
    }

    #[test]
    fn test_directives_are_case_insensitive() {
        let (rules, config) = parse("secruleengine DetectionOnly\nSECACTION \"id:9,pass\"").unwrap();
        assert_eq!(config.rule_engine, RuleEngineMode::DetectionOnly);
        assert_eq!(rules.rules()[0].id, 9);
    }

    #[test]
    fn test_missing_id() {
        let err = parse(r#"SecRule ARGS "@rx x" "deny""#).unwrap_err();
        assert!(err.to_string().contains("missing required 'id'"));
        assert!(err.to_string().contains("1:1"));
    }

    #[test]
    fn test_unknown_directive() {
        assert!(parse("SecBogus On").is_err());
        let mut parser = Parser::new().with_mode(ParserMode::Tolerant);
        parser.parse("SecBogus On\nSecAction \"id:1,pass\"").unwrap();
        assert_eq!(parser.rules().len(), 1);
    }

    #[test]
    fn test_dangling_quote_after_actions() {
        let input = r#"SecRule ARGS "@rx a" "id:1,phase:1,pass""
SecAction "id:2,phase:1,pass""
"#;
        let err = parse(input).unwrap_err();
        assert!(err.to_string().contains("unexpected trailing text"));

        let mut parser = Parser::new().with_mode(ParserMode::Tolerant);
        parser.parse(input).unwrap();
        let ids: Vec<i32> = parser.rules().rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let mut parser = Parser::new().with_mode(ParserMode::Tolerant);
        parser.parse(r#"SecRule ARGS "@rx a" "id:3,pass" junk"#).unwrap();
        assert!(parser.rules().is_empty());
    }

    fn chain_of(links: usize) -> String {
        let mut text = String::from("SecRule ARGS \"@rx a\" \"id:1,phase:1,pass,chain\"\n");
        for i in 1..=links {
            let actions = if i < links { "chain" } else { "t:none" };
            text.push_str(&format!("SecRule ARGS \"@rx a\" \"{actions}\"\n"));
        }
        text
    }

    #[test]
    fn test_chain_length_limit() {
        let (rules, _) = parse(&chain_of(MAX_CHAIN_LENGTH)).unwrap();
        assert_eq!(rules.rules()[0].chain_len(), MAX_CHAIN_LENGTH);

        let err = parse(&chain_of(MAX_CHAIN_LENGTH + 1)).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_ignore_compilation_errors_directive() {
        let (rules, _) = parse(
            "SecIgnoreRuleCompilationErrors On\n\
             SecRule ARGS \"@bogus x\" \"id:1\"\n\
             SecAction \"id:2,pass\"",
        )
        .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.rules()[0].id, 2);
    }

    #[test]
    fn test_duplicate_id() {
        assert!(parse("SecAction \"id:1,pass\"\nSecAction \"id:1,pass\"").is_err());
    }

    #[test]
    fn test_chain() {
        let (rules, _) = parse(
            r#"
            SecRule ARGS "@rx a" "id:10,phase:1,deny,chain"
                SecRule ARGS "@rx b" "chain"
                    SecRule ARGS "@rx c" "t:lowercase"
            SecAction "id:11,pass"
            "#,
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        let root = &rules.rules()[0];
        assert_eq!(root.chain_len(), 2);
        let link = root.chain.as_deref().unwrap();
        assert_eq!(link.parent_id, 10);
        assert_eq!(link.phase, 0);
        assert!(!root.is_chain_open());
    }

    #[test]
    fn test_chain_errors() {
        let err = parse(r#"SecRule ARGS "@rx a" "id:10,deny,chain""#).unwrap_err();
        assert!(matches!(err, Error::IncompleteChain { id: 10 }));
        assert!(parse("SecRule ARGS \"@rx a\" \"id:10,chain\"\nSecRule ARGS \"@rx b\" \"id:11\"").is_err());
        assert!(parse("SecRule ARGS \"@rx a\" \"id:10,chain\"\nSecRule ARGS \"@rx b\" \"deny\"").is_err());
        assert!(parse("SecRule ARGS \"@rx a\" \"id:10,chain\"\nSecMarker END").is_err());
    }

    #[test]
    fn test_default_actions_per_phase() {
        let (rules, _) = parse(
            r#"
            SecDefaultAction "phase:1,log,deny,status:403"
            SecRule ARGS "@rx a" "id:1,phase:1"
            SecRule ARGS "@rx a" "id:2,phase:2"
            SecRule ARGS "@rx a" "id:3,phase:3"
            "#,
        )
        .unwrap();
        let deny = |r: &Rule| matches!(r.disruptive_action(), Some(DisruptiveAction::Deny));
        let r = rules.rules();
        assert!(deny(&r[0]));
        assert_eq!(r[0].disruptive_status, Some(403));
        assert!(matches!(r[1].disruptive_action(), Some(DisruptiveAction::Pass)));
        assert!(r[1].audit_log);
        assert!(r[2].disruptive_action().is_none());
        assert!(!r[2].log);
    }

    #[test]
    fn test_include_relative_and_glob() {
        let fs = MemoryFilesystem::new()
            .with_file("/etc/waf/main.conf", "Include rules/*.conf\nInclude extra.conf")
            .with_file("/etc/waf/rules/a.conf", "SecAction \"id:1,pass\"")
            .with_file("/etc/waf/rules/b.conf", "SecAction \"id:2,pass\"")
            .with_file("/etc/waf/extra.conf", "SecRuleEngine On");
        let mut parser = Parser::new().with_filesystem(Arc::new(fs));
        parser.parse_file(Path::new("/etc/waf/main.conf")).unwrap();
        let (rules, config) = parser.finish().unwrap();
        let ids: Vec<i32> = rules.rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(config.rule_engine, RuleEngineMode::On);
        assert_eq!(rules.rules()[0].file.as_deref(), Some(Path::new("/etc/waf/rules/a.conf")));
    }

    #[test]
    fn test_include_recursion_cap() {
        let fs = MemoryFilesystem::new().with_file("/loop.conf", "Include /loop.conf");
        let mut parser = Parser::new().with_filesystem(Arc::new(fs));
        let err = parser.parse_file(Path::new("/loop.conf")).unwrap_err();
        assert!(matches!(err, Error::IncludeDepthExceeded { .. }));
    }

    #[test]
    fn test_include_missing_file() {
        let mut parser = Parser::new().with_filesystem(Arc::new(MemoryFilesystem::new()));
        let err = parser.parse("Include missing.conf").unwrap_err();
        assert!(matches!(err, Error::RuleFileLoad { .. }));
    }

    #[test]
    fn test_actions_are_initialised() {
        let (rules, _) = parse(r#"SecRule ARGS "@rx a" "id:5,phase:1,t:lowercase,t:urlDecode,capture,msg:'x'""#).unwrap();
        let rule = &rules.rules()[0];
        assert!(rule.capture);
        assert_eq!(rule.transformations.len(), 2);
        assert!(rule.actions.iter().any(|a| matches!(a, Action::Metadata(_))));
    }
}
