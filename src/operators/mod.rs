//! Operator implementations for SecLang rules.
//!
//! Operators are looked up by name in a static table and compiled once when
//! the rule is parsed. Embedders can add their own through
//! [`OperatorRegistry::register`].

mod comparison;
mod network;
mod pattern;
mod traits;
mod validation;

pub use comparison::{NumericOperator, NumericTest, StringOperator, StringTest};
pub use network::IpMatchOperator;
pub use pattern::{PmOperator, RestPathOperator, RxOperator, StrMatchOperator};
pub use traits::{Operator, OperatorContext};
pub use validation::{
    IdentifierCheck, ValidateByteRangeOperator, ValidateUrlEncodingOperator,
    ValidateUtf8EncodingOperator, VerifyIdentifierOperator,
};

pub(crate) use pattern::compile_regex;
pub(crate) use traits::expand_arg;
#[cfg(test)]
pub(crate) use traits::testing;

use crate::error::{Error, Result};
use crate::parser::Filesystem;
use phf::phf_map;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything an operator may need while being compiled.
#[derive(Debug, Clone, Copy)]
pub struct OperatorOptions<'a> {
    /// The operator argument as written (after `@name `).
    pub arguments: &'a str,
    /// Directory of the rule file being parsed, if any.
    pub root: Option<&'a Path>,
    /// Extra directories searched for relative data files.
    pub search_paths: &'a [PathBuf],
    /// `SecDataset` tables.
    pub datasets: &'a HashMap<String, Vec<String>>,
    /// Filesystem used for data files.
    pub fs: &'a dyn Filesystem,
}

impl OperatorOptions<'_> {
    /// Read the data file named by the argument.
    ///
    /// Absolute paths are read directly. Relative paths are tried against
    /// the rule file's directory, then each search path, then as given.
    pub fn read_data_file(&self) -> Result<String> {
        let name = self.arguments.trim();
        if name.is_empty() {
            return Err(Error::operator("fromFile", "missing file name"));
        }
        let path = Path::new(name);
        let mut candidates = Vec::new();
        if path.is_absolute() {
            candidates.push(path.to_path_buf());
        } else {
            if let Some(root) = self.root {
                candidates.push(root.join(path));
            }
            candidates.extend(self.search_paths.iter().map(|p| p.join(path)));
            candidates.push(path.to_path_buf());
        }

        let mut last_error = None;
        for candidate in &candidates {
            match self.fs.read_to_string(candidate) {
                Ok(content) => return Ok(content),
                Err(e) => last_error = Some(e),
            }
        }
        Err(Error::RuleFileLoad {
            path: path.to_path_buf(),
            source: last_error
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, name.to_string())),
        })
    }
}

/// Constructor for a compiled operator.
pub type OperatorFactory = fn(&OperatorOptions<'_>) -> Result<Arc<dyn Operator>>;

fn rx(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(RxOperator::new(o.arguments)?))
}
fn pm(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(PmOperator::new(o.arguments)?))
}
fn pm_from_file(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(PmOperator::from_file(o)?))
}
fn pm_from_dataset(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(PmOperator::from_dataset(o)?))
}
fn strmatch(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(StrMatchOperator::new(o.arguments)?))
}
fn restpath(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(RestPathOperator::new(o.arguments)?))
}

macro_rules! string_factory {
    ($fn_name:ident, $test:expr) => {
        fn $fn_name(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
            Ok(Arc::new(StringOperator::new($test, o.arguments)?))
        }
    };
}

macro_rules! numeric_factory {
    ($fn_name:ident, $test:expr) => {
        fn $fn_name(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
            Ok(Arc::new(NumericOperator::new($test, o.arguments)?))
        }
    };
}

string_factory!(contains, StringTest::Contains);
string_factory!(contains_word, StringTest::ContainsWord);
string_factory!(streq, StringTest::Equals);
string_factory!(begins_with, StringTest::BeginsWith);
string_factory!(ends_with, StringTest::EndsWith);
string_factory!(within, StringTest::Within);
numeric_factory!(eq, NumericTest::Eq);
numeric_factory!(ne, NumericTest::Ne);
numeric_factory!(gt, NumericTest::Gt);
numeric_factory!(ge, NumericTest::Ge);
numeric_factory!(lt, NumericTest::Lt);
numeric_factory!(le, NumericTest::Le);

fn ip_match(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(IpMatchOperator::new(o.arguments)?))
}
fn ip_match_from_file(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(IpMatchOperator::from_file(o)?))
}
fn ip_match_from_dataset(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(IpMatchOperator::from_dataset(o)?))
}
fn validate_byte_range(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(ValidateByteRangeOperator::new(o.arguments)?))
}
fn validate_url_encoding(_: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(ValidateUrlEncodingOperator))
}
fn validate_utf8_encoding(_: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(ValidateUtf8EncodingOperator))
}
fn validate_nid(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(VerifyIdentifierOperator::nid(o.arguments)?))
}
fn verify_cc(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(VerifyIdentifierOperator::new(IdentifierCheck::CreditCard, o.arguments)?))
}
fn verify_cpf(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(VerifyIdentifierOperator::new(IdentifierCheck::Cpf, o.arguments)?))
}
fn verify_ssn(o: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(VerifyIdentifierOperator::new(IdentifierCheck::Ssn, o.arguments)?))
}
fn unconditional_match(_: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(UnconditionalMatchOperator))
}
fn no_match(_: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
    Ok(Arc::new(NoMatchOperator))
}

/// Built-in operators by lowercase name.
static OPERATORS: phf::Map<&'static str, OperatorFactory> = phf_map! {
    "rx" => rx as OperatorFactory,
    "pm" => pm as OperatorFactory,
    "pmfromfile" => pm_from_file as OperatorFactory,
    "pmf" => pm_from_file as OperatorFactory,
    "pmfromdataset" => pm_from_dataset as OperatorFactory,
    "strmatch" => strmatch as OperatorFactory,
    "restpath" => restpath as OperatorFactory,
    "contains" => contains as OperatorFactory,
    "containsword" => contains_word as OperatorFactory,
    "streq" => streq as OperatorFactory,
    "beginswith" => begins_with as OperatorFactory,
    "endswith" => ends_with as OperatorFactory,
    "within" => within as OperatorFactory,
    "eq" => eq as OperatorFactory,
    "ne" => ne as OperatorFactory,
    "gt" => gt as OperatorFactory,
    "ge" => ge as OperatorFactory,
    "lt" => lt as OperatorFactory,
    "le" => le as OperatorFactory,
    "ipmatch" => ip_match as OperatorFactory,
    "ipmatchfromfile" => ip_match_from_file as OperatorFactory,
    "ipmatchf" => ip_match_from_file as OperatorFactory,
    "ipmatchfromdataset" => ip_match_from_dataset as OperatorFactory,
    "validatebyterange" => validate_byte_range as OperatorFactory,
    "validateurlencoding" => validate_url_encoding as OperatorFactory,
    "validateutf8encoding" => validate_utf8_encoding as OperatorFactory,
    "validatenid" => validate_nid as OperatorFactory,
    "verifycc" => verify_cc as OperatorFactory,
    "verifycpf" => verify_cpf as OperatorFactory,
    "verifyssn" => verify_ssn as OperatorFactory,
    "unconditionalmatch" => unconditional_match as OperatorFactory,
    "nomatch" => no_match as OperatorFactory,
};

/// Operator lookup: the built-in table plus embedder registrations.
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    custom: HashMap<String, OperatorFactory>,
}

impl OperatorRegistry {
    /// A registry holding only the built-in operators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an operator under a case-insensitive name.
    pub fn register(&mut self, name: &str, factory: OperatorFactory) {
        self.custom.insert(name.to_ascii_lowercase(), factory);
    }

    /// Whether an operator with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.factory(name).is_some()
    }

    fn factory(&self, name: &str) -> Option<OperatorFactory> {
        let lower = name.to_ascii_lowercase();
        self.custom
            .get(&lower)
            .copied()
            .or_else(|| OPERATORS.get(lower.as_str()).copied())
    }

    /// Compile an operator.
    pub fn compile(&self, name: &str, options: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
        let factory = self.factory(name).ok_or_else(|| Error::UnknownOperator {
            name: name.to_string(),
        })?;
        factory(options)
    }
}

/// Always matches (@unconditionalMatch).
#[derive(Debug)]
pub struct UnconditionalMatchOperator;

impl Operator for UnconditionalMatchOperator {
    fn evaluate(&self, _tx: &mut dyn OperatorContext, _input: &str) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "unconditionalMatch"
    }
}

/// Never matches (@noMatch).
#[derive(Debug)]
pub struct NoMatchOperator;

impl Operator for NoMatchOperator {
    fn evaluate(&self, _tx: &mut dyn OperatorContext, _input: &str) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "noMatch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MemoryFilesystem;
    use testing::TestContext;

    fn options<'a>(
        arguments: &'a str,
        datasets: &'a HashMap<String, Vec<String>>,
        fs: &'a dyn Filesystem,
    ) -> OperatorOptions<'a> {
        OperatorOptions {
            arguments,
            root: Some(Path::new("/rules")),
            search_paths: &[],
            datasets,
            fs,
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = OperatorRegistry::new();
        assert!(registry.contains("rx"));
        assert!(registry.contains("beginsWith"));
        assert!(registry.contains("IPMATCH"));
        assert!(!registry.contains("detectSQLi"));
    }

    #[test]
    fn test_unknown_operator() {
        let registry = OperatorRegistry::new();
        let datasets = HashMap::new();
        let fs = MemoryFilesystem::new();
        let err = registry.compile("bogus", &options("x", &datasets, &fs)).unwrap_err();
        assert!(matches!(err, Error::UnknownOperator { .. }));
    }

    #[test]
    fn test_pm_from_file_relative_to_rule_file() {
        let registry = OperatorRegistry::new();
        let datasets = HashMap::new();
        let fs = MemoryFilesystem::new().with_file("/rules/bad-words.data", "# list\nfoo\nbar\n");
        let op = registry
            .compile("pmFromFile", &options("bad-words.data", &datasets, &fs))
            .unwrap();
        let mut ctx = TestContext::new();
        assert!(op.evaluate(&mut ctx, "xx BAR"));
        assert!(!op.evaluate(&mut ctx, "baz"));
        assert!(registry
            .compile("pmFromFile", &options("missing.data", &datasets, &fs))
            .is_err());
    }

    #[test]
    fn test_dataset_operators() {
        let registry = OperatorRegistry::new();
        let mut datasets = HashMap::new();
        datasets.insert("ips".to_string(), vec!["10.0.0.0/8".to_string()]);
        datasets.insert("words".to_string(), vec!["evil".to_string()]);
        let fs = MemoryFilesystem::new();
        let op = registry
            .compile("ipMatchFromDataset", &options("ips", &datasets, &fs))
            .unwrap();
        assert!(op.evaluate(&mut TestContext::new(), "10.1.2.3"));
        let op = registry
            .compile("pmFromDataset", &options("words", &datasets, &fs))
            .unwrap();
        assert!(op.evaluate(&mut TestContext::new(), "so EVIL"));
        assert!(registry
            .compile("pmFromDataset", &options("nope", &datasets, &fs))
            .is_err());
    }

    #[test]
    fn test_register_custom() {
        fn always(_: &OperatorOptions<'_>) -> Result<Arc<dyn Operator>> {
            Ok(Arc::new(UnconditionalMatchOperator))
        }
        let mut registry = OperatorRegistry::new();
        registry.register("myOp", always);
        let datasets = HashMap::new();
        let fs = MemoryFilesystem::new();
        let op = registry.compile("MYOP", &options("", &datasets, &fs)).unwrap();
        assert!(op.evaluate(&mut TestContext::new(), ""));
    }
}
