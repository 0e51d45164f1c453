//! Action list parsing and default-action inheritance.

use crate::actions::{Action, ActionType, MetadataAction};
use crate::error::{Error, Result};

/// Split an action list into `(name, value)` pairs.
///
/// Commas separate actions and the first colon separates name from value.
/// Single quotes protect commas, colons and spaces; `\'` is a literal quote.
pub fn tokenize_actions(input: &str) -> Result<Vec<(String, Option<String>)>> {
    let mut out = Vec::new();
    let mut name = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = input.chars().peekable();

    let mut finish = |name: &mut String, value: &mut String, in_value: &mut bool, was_quoted: &mut bool| {
        let n = name.trim().to_string();
        if !n.is_empty() {
            let v = if *in_value {
                Some(if *was_quoted {
                    value.clone()
                } else {
                    value.trim().to_string()
                })
            } else {
                None
            };
            out.push((n, v));
        }
        name.clear();
        value.clear();
        *in_value = false;
        *was_quoted = false;
    };

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '\\' if chars.peek() == Some(&'\'') => {
                    value.push('\'');
                    chars.next();
                }
                '\'' => quoted = false,
                _ => value.push(c),
            }
            continue;
        }
        match c {
            '\'' if in_value => {
                if value.trim().is_empty() {
                    value.clear();
                }
                quoted = true;
                was_quoted = true;
            }
            ',' => finish(&mut name, &mut value, &mut in_value, &mut was_quoted),
            ':' if !in_value => in_value = true,
            c if in_value => {
                if !(was_quoted && c.is_whitespace()) {
                    value.push(c);
                }
            }
            c => name.push(c),
        }
    }
    if quoted {
        return Err(Error::parse(format!("unterminated quote in actions '{input}'"), ""));
    }
    finish(&mut name, &mut value, &mut in_value, &mut was_quoted);
    Ok(out)
}

/// Parse an action list.
pub fn parse_actions(input: &str) -> Result<Vec<Action>> {
    tokenize_actions(input)?
        .into_iter()
        .map(|(name, value)| Action::parse(&name, value.as_deref()))
        .collect()
}

/// The phase named by a `phase` action, if any.
pub fn phase_of(actions: &[Action]) -> Option<u8> {
    actions.iter().rev().find_map(|a| match a {
        Action::Metadata(MetadataAction::Phase(p)) => Some(*p),
        _ => None,
    })
}

/// Check a `SecDefaultAction` list and return its phase.
///
/// It must name a phase and a disruptive action, and carry no other
/// metadata and no transformations.
pub fn validate_default_actions(actions: &[Action]) -> Result<u8> {
    let phase = phase_of(actions)
        .ok_or_else(|| Error::action("SecDefaultAction", "a phase is required"))?;
    if !actions.iter().any(Action::is_disruptive) {
        return Err(Error::action("SecDefaultAction", "a disruptive action is required"));
    }
    for action in actions {
        let forbidden = match action {
            Action::Metadata(MetadataAction::Phase(_)) => false,
            a if a.action_type() == ActionType::Metadata => true,
            a => a.is_transformation(),
        };
        if forbidden {
            return Err(Error::action(
                "SecDefaultAction",
                format!("'{}' is not allowed in default actions", action.name()),
            ));
        }
    }
    Ok(phase)
}

/// Merge a rule's actions with the defaults of its phase.
///
/// Defaults come first so the rule's own actions override them. The rule
/// keeps its last disruptive action unless that is `block` (or missing),
/// in which case the default's disruptive action is used.
pub fn merge_defaults(defaults: &[Action], actions: Vec<Action>) -> Vec<Action> {
    let own = actions.iter().rev().find(|a| a.is_disruptive()).cloned();
    let inherited = defaults.iter().rev().find(|a| a.is_disruptive()).cloned();
    let disruptive = match own {
        Some(own) if !own.is_block() => Some(own),
        own => inherited.or(own),
    };

    let mut merged: Vec<Action> = defaults
        .iter()
        .filter(|a| !a.is_disruptive() && !matches!(a, Action::Metadata(MetadataAction::Phase(_))))
        .cloned()
        .collect();
    merged.extend(actions.into_iter().filter(|a| !a.is_disruptive()));
    merged.extend(disruptive);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::DisruptiveAction;

    fn names(actions: &[Action]) -> Vec<&'static str> {
        actions.iter().map(Action::name).collect()
    }

    #[test]
    fn test_tokenize_simple() {
        let tokens = tokenize_actions("id:1, phase:2 ,deny,status:403").unwrap();
        assert_eq!(
            tokens,
            vec![
                ("id".to_string(), Some("1".to_string())),
                ("phase".to_string(), Some("2".to_string())),
                ("deny".to_string(), None),
                ("status".to_string(), Some("403".to_string())),
            ]
        );
    }

    #[test]
    fn test_tokenize_quoted_values() {
        let tokens =
            tokenize_actions(r"msg:'It\'s a, b: c',ctl:ruleRemoveTargetById=1;ARGS:foo,tag:'x'").unwrap();
        assert_eq!(tokens[0].1.as_deref(), Some("It's a, b: c"));
        assert_eq!(tokens[1].1.as_deref(), Some("ruleRemoveTargetById=1;ARGS:foo"));
        assert_eq!(tokens[2].1.as_deref(), Some("x"));
        assert!(tokenize_actions("msg:'open").is_err());
    }

    #[test]
    fn test_tokenize_trailing_comma() {
        let tokens = tokenize_actions("pass,nolog,").unwrap();
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_validate_defaults() {
        assert_eq!(validate_default_actions(&parse_actions("phase:1,log,deny,status:403").unwrap()).unwrap(), 1);
        assert!(validate_default_actions(&parse_actions("log,deny").unwrap()).is_err());
        assert!(validate_default_actions(&parse_actions("phase:2,log").unwrap()).is_err());
        assert!(validate_default_actions(&parse_actions("phase:2,pass,id:5").unwrap()).is_err());
        assert!(validate_default_actions(&parse_actions("phase:2,pass,t:lowercase").unwrap()).is_err());
    }

    #[test]
    fn test_merge_inherits_disruptive() {
        let defaults = parse_actions("phase:2,log,deny,status:403").unwrap();
        let merged = merge_defaults(&defaults, parse_actions("id:1,block,nolog").unwrap());
        assert_eq!(names(&merged), vec!["log", "status", "id", "nolog", "deny"]);

        let merged = merge_defaults(&defaults, parse_actions("id:1").unwrap());
        assert!(matches!(merged.last(), Some(Action::Disruptive(DisruptiveAction::Deny))));
    }

    #[test]
    fn test_merge_keeps_own_disruptive() {
        let defaults = parse_actions("phase:2,log,deny").unwrap();
        let merged = merge_defaults(&defaults, parse_actions("id:1,deny,pass").unwrap());
        let disruptive: Vec<_> = merged.iter().filter(|a| a.is_disruptive()).collect();
        assert_eq!(disruptive.len(), 1);
        assert!(matches!(disruptive[0], Action::Disruptive(DisruptiveAction::Pass)));
    }
}
