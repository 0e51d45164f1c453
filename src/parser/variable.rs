//! Variable list tokenizer for `SecRule`.
//!
//! `ARGS|!ARGS:foo|&TX:score|REQUEST_HEADERS:/^x-/|ARGS:'a|b'`

use crate::engine::Rule;
use crate::error::{Error, Result};
use crate::variables::Variable;

/// One entry of a variable list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableToken {
    /// Variable name as written.
    pub name: String,
    /// Key as written, slashes and quotes included.
    pub key: Option<String>,
    /// `!` prefix.
    pub negated: bool,
    /// `&` prefix.
    pub count: bool,
}

/// Split a variable list into tokens.
pub fn tokenize_variables(input: &str) -> Result<Vec<VariableToken>> {
    let chars: Vec<char> = input.trim().chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let mut token = VariableToken {
            name: String::new(),
            key: None,
            negated: false,
            count: false,
        };
        match chars[i] {
            '!' => {
                token.negated = true;
                i += 1;
            }
            '&' => {
                token.count = true;
                i += 1;
            }
            _ => {}
        }
        while i < chars.len() && chars[i] != ':' && chars[i] != '|' {
            token.name.push(chars[i]);
            i += 1;
        }
        let name = token.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::parse(format!("empty variable name in '{input}'"), ""));
        }
        token.name = name;

        if i < chars.len() && chars[i] == ':' {
            i += 1;
            let path_keys = Variable::parse(&token.name).is_some_and(Variable::accepts_path_keys);
            let mut key = String::new();
            match chars.get(i) {
                Some('\'') => {
                    key.push('\'');
                    i += 1;
                    while i < chars.len() && chars[i] != '\'' {
                        key.push(chars[i]);
                        i += 1;
                    }
                    if i >= chars.len() {
                        return Err(Error::parse(format!("unterminated quoted key in '{input}'"), ""));
                    }
                    key.push('\'');
                    i += 1;
                }
                Some('/') if !path_keys => {
                    key.push('/');
                    i += 1;
                    let mut closed = false;
                    while i < chars.len() {
                        let c = chars[i];
                        key.push(c);
                        i += 1;
                        if c == '\\' && i < chars.len() {
                            key.push(chars[i]);
                            i += 1;
                        } else if c == '/' {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(Error::parse(format!("unterminated regex key in '{input}'"), ""));
                    }
                }
                _ => {}
            }
            while i < chars.len() && chars[i] != '|' {
                key.push(chars[i]);
                i += 1;
            }
            let key = key.trim().to_string();
            if !key.is_empty() {
                token.key = Some(key);
            }
        }

        tokens.push(token);
        // separator
        i += 1;
    }

    Ok(tokens)
}

/// Add the selectors of a variable list to `rule`.
///
/// Negations are attached after every positive selector has been added,
/// so `!ARGS:x|ARGS` and `ARGS|!ARGS:x` mean the same.
pub fn apply_variables(rule: &mut Rule, input: &str) -> Result<()> {
    let tokens = tokenize_variables(input)?;
    let (negations, selectors): (Vec<_>, Vec<_>) = tokens.into_iter().partition(|t| t.negated);

    for token in selectors {
        let variable = resolve(&token.name)?;
        rule.add_variable(variable, token.key.as_deref(), token.count)?;
    }
    for token in negations {
        let variable = resolve(&token.name)?;
        let key = token.key.ok_or_else(|| {
            Error::parse(
                format!("negated variable {} needs a key", token.name),
                rule.location(),
            )
        })?;
        rule.add_variable_negation(variable, &key)?;
    }
    Ok(())
}

fn resolve(name: &str) -> Result<Variable> {
    Variable::parse(name).ok_or_else(|| Error::UnknownVariable {
        name: name.to_string(),
    })
}
