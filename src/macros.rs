//! `%{VAR.key}` templates.
//!
//! Templates are compiled once when a rule is parsed and expanded against
//! the transaction variables at match time. Expansion never fails: a
//! missing value leaves the reference text in place.

use crate::error::{Error, Result};
use crate::variables::{TransactionVariables, Variable};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Var {
        variable: Variable,
        key: String,
        text: String,
    },
}

/// A compiled macro template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    original: String,
    tokens: Vec<Token>,
}

impl Macro {
    /// Compile a template.
    ///
    /// Fails on an empty or unknown variable reference. An unterminated
    /// `%{` is kept as literal text.
    pub fn new(input: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut rest = input;
        let mut text = String::new();

        while let Some(start) = rest.find("%{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                break;
            };
            text.push_str(&rest[..start]);
            if !text.is_empty() {
                tokens.push(Token::Text(std::mem::take(&mut text)));
            }
            tokens.push(parse_reference(input, &after[..end])?);
            rest = &after[end + 1..];
        }
        text.push_str(rest);
        if !text.is_empty() {
            tokens.push(Token::Text(text));
        }

        Ok(Self {
            original: input.to_string(),
            tokens,
        })
    }

    /// Whether the template contains no variable references.
    pub fn is_static(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Text(_)))
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Expand against transaction variables.
    pub fn expand(&self, vars: &TransactionVariables) -> String {
        if self.is_static() {
            return self.original.clone();
        }
        let mut out = String::with_capacity(self.original.len());
        for token in &self.tokens {
            match token {
                Token::Text(s) => out.push_str(s),
                Token::Var {
                    variable,
                    key,
                    text,
                } => match vars.collection(*variable).expand_value(key) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(text),
                },
            }
        }
        out
    }
}

fn parse_reference(input: &str, reference: &str) -> Result<Token> {
    let (name, key) = match reference.find(['.', ':']) {
        Some(i) => (&reference[..i], &reference[i + 1..]),
        None => (reference, ""),
    };
    if name.trim().is_empty() {
        return Err(Error::InvalidMacro {
            input: input.to_string(),
            message: "empty variable name".to_string(),
        });
    }
    let variable = Variable::parse(name.trim()).ok_or_else(|| Error::InvalidMacro {
        input: input.to_string(),
        message: format!("unknown variable {name}"),
    })?;
    Ok(Token::Var {
        variable,
        key: key.to_lowercase(),
        text: reference.to_string(),
    })
}

impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
