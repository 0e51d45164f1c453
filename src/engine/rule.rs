//! Compiled rules and variable selectors.

use crate::actions::{Action, DisruptiveAction, Severity};
use crate::error::{Error, Result};
use crate::macros::Macro;
use crate::metadata::MetadataSet;
use crate::operators::{compile_regex, Operator};
use crate::transformations::TransformationPipeline;
use crate::variables::{Collection, MatchData, TransactionVariables, Variable, VariableKind};
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::phase::Phase;

/// How a selector narrows a collection by key.
#[derive(Debug, Clone)]
pub enum KeySelector {
    /// Exact key (case-insensitive unless the variable says otherwise).
    Literal(String),
    /// Regex matched against the lowercased key.
    Regex(Regex),
}

impl KeySelector {
    /// Parse a key; `/.../` is a regex.
    pub fn parse(key: &str) -> Result<Self> {
        let key = key.trim();
        if key.len() > 1 && key.starts_with('/') && key.ends_with('/') {
            Ok(KeySelector::Regex(compile_regex(&key[1..key.len() - 1])?))
        } else {
            Ok(KeySelector::Literal(unquote(key).to_string()))
        }
    }

    /// Parse a key for `variable`; XML and JSON keys are always literal paths.
    pub fn parse_for(variable: Variable, key: &str) -> Result<Self> {
        if variable.accepts_path_keys() {
            Ok(KeySelector::Literal(unquote(key.trim()).to_string()))
        } else {
            Self::parse(key)
        }
    }

    /// Whether `key` is selected.
    pub fn matches(&self, key: &str, case_sensitive: bool) -> bool {
        match self {
            KeySelector::Literal(k) if case_sensitive => k == key,
            KeySelector::Literal(k) => k.eq_ignore_ascii_case(key),
            KeySelector::Regex(re) => re.is_match(&key.to_lowercase()),
        }
    }
}

impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::Literal(k) => f.write_str(k),
            KeySelector::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

fn unquote(key: &str) -> &str {
    key.strip_prefix('\'')
        .and_then(|k| k.strip_suffix('\''))
        .unwrap_or(key)
}

/// A variable (and optional key) excluded at runtime by `ctl`.
#[derive(Debug, Clone)]
pub struct VariableTarget {
    /// Variable.
    pub variable: Variable,
    /// Key; `None` excludes the whole variable.
    pub key: Option<KeySelector>,
}

impl VariableTarget {
    /// Parse `VAR` or `VAR:key`.
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        let (name, key) = match target.split_once(':') {
            Some((name, key)) => (name, Some(key)),
            None => (target, None),
        };
        let variable = Variable::parse(name).ok_or_else(|| Error::UnknownVariable {
            name: name.to_string(),
        })?;
        let key = key
            .filter(|k| !k.is_empty())
            .map(|k| KeySelector::parse_for(variable, k))
            .transpose()?;
        Ok(Self { variable, key })
    }

    /// Whether this target removes `key` of `variable`.
    pub fn excludes(&self, variable: Variable, key: &str) -> bool {
        self.variable == variable
            && self
                .key
                .as_ref()
                .map_or(true, |k| k.matches(key, variable.is_case_sensitive()))
    }
}

/// One `VAR[:key]` reference in a rule.
#[derive(Debug, Clone)]
pub struct VariableSelector {
    /// Variable.
    pub variable: Variable,
    /// Key filter; `None` selects every entry.
    pub key: Option<KeySelector>,
    /// `&VAR`: report the number of entries instead of the values.
    pub count: bool,
    /// Keys removed by `!VAR:key`.
    pub exceptions: Vec<KeySelector>,
}

impl VariableSelector {
    /// Create a selector.
    pub fn new(variable: Variable, key: Option<KeySelector>, count: bool) -> Self {
        Self {
            variable,
            key,
            count,
            exceptions: Vec::new(),
        }
    }

    fn is_excepted(&self, key: &str) -> bool {
        let case_sensitive = self.variable.is_case_sensitive();
        self.exceptions.iter().any(|e| e.matches(key, case_sensitive))
    }

    /// Resolve the selector against the transaction variables, dropping
    /// excepted keys and keys removed by `extra`.
    pub fn select(&self, vars: &TransactionVariables, extra: &[&VariableTarget]) -> Vec<MatchData> {
        let collection = vars.collection(self.variable);
        let mut found = match &self.key {
            None => collection.find_all(),
            Some(KeySelector::Literal(k)) => collection.find_string(k),
            Some(KeySelector::Regex(re)) => collection.find_regex(re),
        };
        if !self.exceptions.is_empty() || !extra.is_empty() {
            found.retain(|m| {
                !self.is_excepted(&m.key) && !extra.iter().any(|t| t.excludes(self.variable, &m.key))
            });
        }
        if self.count {
            let count = match self.variable.kind() {
                VariableKind::Single | VariableKind::LazySingle => {
                    found.iter().filter(|m| !m.value.is_empty()).count()
                }
                _ => found.len(),
            };
            let key = self.key.as_ref().map(ToString::to_string).unwrap_or_default();
            return vec![MatchData::new(self.variable, key, count.to_string())];
        }
        found
    }
}

impl fmt::Display for VariableSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count {
            f.write_str("&")?;
        }
        f.write_str(self.variable.name())?;
        if let Some(key) = &self.key {
            write!(f, ":{key}")?;
        }
        for e in &self.exceptions {
            write!(f, "|!{}:{e}", self.variable.name())?;
        }
        Ok(())
    }
}

/// The compiled operator of a rule.
#[derive(Debug, Clone)]
pub struct RuleOperator {
    /// Compiled predicate.
    pub operator: Arc<dyn Operator>,
    /// Name as written, without `!@`.
    pub name: String,
    /// Argument as written.
    pub argument: String,
    /// `!@op`.
    pub negated: bool,
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        write!(f, "@{} {}", self.name, self.argument)
    }
}

/// Descriptive fields of a rule.
#[derive(Debug, Clone, Default)]
pub struct RuleMetadata {
    /// `msg`.
    pub msg: Option<Macro>,
    /// `logdata`.
    pub logdata: Option<Macro>,
    /// `rev`.
    pub rev: String,
    /// `ver`.
    pub ver: String,
    /// `severity`.
    pub severity: Option<Severity>,
    /// `tag` values.
    pub tags: Vec<String>,
    /// `maturity`.
    pub maturity: u8,
    /// `accuracy`.
    pub accuracy: u8,
}

/// A compiled rule.
///
/// Rules are immutable once the WAF is built. A chain is a linked list of
/// boxed rules hanging off the chain root; links have `parent_id` set and
/// phase 0.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Rule id (0 for markers and chain links).
    pub id: i32,
    /// Id of the chain root (0 for roots).
    pub parent_id: i32,
    /// Phase 1-5; 0 runs in every phase.
    pub phase: u8,
    /// Variable selectors, in declaration order.
    pub variables: Vec<VariableSelector>,
    /// Operator; `None` for `SecAction` and `SecMarker`.
    pub operator: Option<RuleOperator>,
    /// Transformations applied before the operator.
    pub transformations: TransformationPipeline,
    /// Actions, in declaration order.
    pub actions: Vec<Action>,
    /// Next link of the chain.
    pub chain: Option<Box<Rule>>,
    /// Whether the rule declared `chain`.
    pub has_chain: bool,
    /// `capture`.
    pub capture: bool,
    /// `multiMatch`.
    pub multi_match: bool,
    /// Whether matches go to the error log.
    pub log: bool,
    /// Whether matches mark the transaction for auditing.
    pub audit_log: bool,
    /// Descriptive fields.
    pub metadata: RuleMetadata,
    /// Value classes from a `metadatafilter/` tag.
    pub metadata_filter: Option<MetadataSet>,
    /// `xmlns` declarations.
    pub xmlns: Vec<String>,
    /// Source file.
    pub file: Option<PathBuf>,
    /// Source line.
    pub line: usize,
    /// Directive text.
    pub raw: String,
    /// Label of a `SecMarker`.
    pub sec_mark: Option<String>,
    /// HTTP status set by `status`.
    pub disruptive_status: Option<u16>,
}

impl Default for Rule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule {
    /// Create an empty rule in phase 2.
    pub fn new() -> Self {
        Self {
            id: 0,
            parent_id: 0,
            phase: 2,
            variables: Vec::new(),
            operator: None,
            transformations: TransformationPipeline::new(),
            actions: Vec::new(),
            chain: None,
            has_chain: false,
            capture: false,
            multi_match: false,
            log: false,
            audit_log: false,
            metadata: RuleMetadata::default(),
            metadata_filter: None,
            xmlns: Vec::new(),
            file: None,
            line: 0,
            raw: String::new(),
            sec_mark: None,
            disruptive_status: None,
        }
    }

    /// Create a `SecMarker` rule.
    pub fn marker(label: &str) -> Self {
        Self {
            phase: 0,
            sec_mark: Some(label.to_string()),
            ..Self::new()
        }
    }

    /// Add a variable selector; `/regex/` keys are compiled.
    pub fn add_variable(&mut self, variable: Variable, key: Option<&str>, count: bool) -> Result<()> {
        let key = key
            .filter(|k| !k.is_empty())
            .map(|k| KeySelector::parse_for(variable, k))
            .transpose()?;
        self.variables.push(VariableSelector::new(variable, key, count));
        Ok(())
    }

    /// Attach `!VAR:key` to every selector of `variable`. A rule that does
    /// not select `variable` is left unchanged.
    pub fn add_variable_negation(&mut self, variable: Variable, key: &str) -> Result<()> {
        let exception = KeySelector::parse_for(variable, key)?;
        let mut attached = 0;
        for selector in self.variables.iter_mut().filter(|s| s.variable == variable) {
            selector.exceptions.push(exception.clone());
            attached += 1;
        }
        if attached == 0 {
            debug!(rule_id = self.id, variable = %variable, "negated variable not selected by rule");
        }
        Ok(())
    }

    /// Set the operator.
    pub fn set_operator(&mut self, operator: RuleOperator) {
        self.operator = Some(operator);
    }

    /// Initialise and append an action.
    pub fn add_action(&mut self, action: Action) -> Result<()> {
        action.init(self)?;
        self.actions.push(action);
        Ok(())
    }

    /// Append a transformation by name.
    pub fn add_transformation(&mut self, name: &str) -> Result<()> {
        self.transformations.push_name(name)
    }

    /// Remove every transformation.
    pub fn clear_transformations(&mut self) {
        self.transformations.clear();
    }

    /// Whether the rule is scheduled in `phase`.
    pub fn runs_in(&self, phase: Phase) -> bool {
        self.phase == 0 || self.phase == phase.number()
    }

    /// Whether this is a `SecMarker`.
    pub fn is_marker(&self) -> bool {
        self.sec_mark.is_some()
    }

    /// Whether this is a chain link.
    pub fn is_chain_child(&self) -> bool {
        self.parent_id != 0
    }

    /// Id reported in logs: the chain root's id for links.
    pub fn log_id(&self) -> i32 {
        if self.id != 0 {
            self.id
        } else {
            self.parent_id
        }
    }

    /// The rule's disruptive action, if any.
    pub fn disruptive_action(&self) -> Option<&DisruptiveAction> {
        self.actions.iter().rev().find_map(|a| match a {
            Action::Disruptive(d) => Some(d),
            _ => None,
        })
    }

    /// Whether the rule carries `tag` (case-insensitive).
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// The `msg` text as written.
    pub fn msg_text(&self) -> &str {
        self.metadata.msg.as_ref().map_or("", |m| m.as_str())
    }

    /// Number of links after this rule.
    pub fn chain_len(&self) -> usize {
        let mut len = 0;
        let mut link = self.chain.as_deref();
        while let Some(rule) = link {
            len += 1;
            link = rule.chain.as_deref();
        }
        len
    }

    /// The last link of the chain that still expects a successor.
    pub fn open_chain_link(&mut self) -> Option<&mut Rule> {
        let mut link = self;
        loop {
            if link.chain.is_some() {
                link = link.chain.as_deref_mut()?;
            } else if link.has_chain {
                return Some(link);
            } else {
                return None;
            }
        }
    }

    /// Whether a chain link is still missing.
    pub fn is_chain_open(&self) -> bool {
        let mut link = self;
        loop {
            match link.chain.as_deref() {
                Some(next) => link = next,
                None => return link.has_chain,
            }
        }
    }

    /// `file:line` of the rule.
    pub fn location(&self) -> String {
        match &self.file {
            Some(file) => format!("{}:{}", file.display(), self.line),
            None => format!("{}", self.line),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.sec_mark {
            return write!(f, "SecMarker {label}");
        }
        let vars: Vec<String> = self.variables.iter().map(ToString::to_string).collect();
        let actions: Vec<&str> = self.actions.iter().map(Action::name).collect();
        match &self.operator {
            Some(op) => write!(f, "[{}] phase:{} {} \"{}\" [{}]", self.id, self.phase, vars.join("|"), op, actions.join(","))?,
            None => write!(f, "[{}] phase:{} SecAction [{}]", self.id, self.phase, actions.join(","))?,
        }
        if let Some(next) = &self.chain {
            write!(f, " -> {next}")?;
        }
        Ok(())
    }
}
