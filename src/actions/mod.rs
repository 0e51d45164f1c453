//! Action system for SecLang rule execution.
//!
//! Every action has a type. Metadata and data actions are applied to the
//! rule once, when it is compiled ([`Action::init`]). Non-disruptive actions
//! run for each matched value; disruptive and flow actions run once on the
//! chain root after the whole chain matched ([`Action::evaluate`]).

mod ctl;
mod data;
mod disruptive;
mod flow;
mod metadata;
mod setvar;

pub use ctl::CtlAction;
pub use data::{parse_status, parse_transformation, DataAction};
pub use disruptive::{AllowType, DisruptiveAction};
pub use flow::{parse_skip, FlowAction};
pub use metadata::{parse_level, parse_phase, MetadataAction, Severity};
pub use setvar::{ExpireVar, InitCol, SetVar, SetVarOp};

use crate::engine::{Rule, Transaction};
use crate::error::{Error, Result};
use crate::macros::Macro;
use crate::variables::Variable;
use std::fmt;

/// Classification of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Describes the rule.
    Metadata,
    /// Decides the fate of the transaction.
    Disruptive,
    /// Carries data for other actions.
    Data,
    /// Side effects on every match.
    NonDisruptive,
    /// Changes which rules run next.
    Flow,
}

/// Actions with side effects on every match.
#[derive(Debug, Clone)]
pub enum NonDisruptiveAction {
    /// Log matches to the error log.
    Log,
    /// Do not log matches.
    NoLog,
    /// Mark the transaction for auditing.
    AuditLog,
    /// Do not mark the transaction for auditing.
    NoAuditLog,
    /// Run the operator after every transformation step.
    MultiMatch,
    /// Write a collection variable.
    SetVar(SetVar),
    /// Write an `ENV` entry.
    SetEnv(String, Macro),
    /// Expire a persistent variable.
    ExpireVar(ExpireVar),
    /// Bind a persistent collection (`initcol`, `setsid`, `setuid`).
    InitCol(InitCol),
    /// Change transaction configuration.
    Ctl(CtlAction),
    /// Mask an argument in the audit log.
    SanitiseArg(String),
    /// Mask the matched variable in the audit log.
    SanitiseMatched,
    /// Mask a request header in the audit log.
    SanitiseRequestHeader(String),
    /// Mask a response header in the audit log.
    SanitiseResponseHeader(String),
}

impl NonDisruptiveAction {
    /// Action name.
    pub fn name(&self) -> &'static str {
        match self {
            NonDisruptiveAction::Log => "log",
            NonDisruptiveAction::NoLog => "nolog",
            NonDisruptiveAction::AuditLog => "auditlog",
            NonDisruptiveAction::NoAuditLog => "noauditlog",
            NonDisruptiveAction::MultiMatch => "multiMatch",
            NonDisruptiveAction::SetVar(_) => "setvar",
            NonDisruptiveAction::SetEnv(..) => "setenv",
            NonDisruptiveAction::ExpireVar(_) => "expirevar",
            NonDisruptiveAction::InitCol(ic) => match ic.collection {
                Variable::Session => "setsid",
                Variable::User => "setuid",
                _ => "initcol",
            },
            NonDisruptiveAction::Ctl(_) => "ctl",
            NonDisruptiveAction::SanitiseArg(_) => "sanitiseArg",
            NonDisruptiveAction::SanitiseMatched => "sanitiseMatched",
            NonDisruptiveAction::SanitiseRequestHeader(_) => "sanitiseRequestHeader",
            NonDisruptiveAction::SanitiseResponseHeader(_) => "sanitiseResponseHeader",
        }
    }

    fn init(&self, rule: &mut Rule) {
        match self {
            NonDisruptiveAction::Log => {
                rule.log = true;
                rule.audit_log = true;
            }
            NonDisruptiveAction::NoLog => {
                rule.log = false;
                rule.audit_log = false;
            }
            NonDisruptiveAction::AuditLog => rule.audit_log = true,
            NonDisruptiveAction::NoAuditLog => rule.audit_log = false,
            NonDisruptiveAction::MultiMatch => rule.multi_match = true,
            _ => {}
        }
    }

    fn evaluate(&self, tx: &mut Transaction) {
        match self {
            NonDisruptiveAction::SetVar(sv) => sv.evaluate(tx),
            NonDisruptiveAction::SetEnv(name, value) => {
                let value = value.expand(&tx.vars);
                if let Some(env) = tx.vars.map_mut(Variable::Env) {
                    env.set(name, vec![value]);
                }
            }
            NonDisruptiveAction::ExpireVar(ev) => ev.evaluate(tx),
            NonDisruptiveAction::InitCol(ic) => ic.evaluate(tx),
            NonDisruptiveAction::Ctl(ctl) => ctl.evaluate(tx),
            NonDisruptiveAction::SanitiseArg(name) => tx.sanitise.args.push(name.to_lowercase()),
            NonDisruptiveAction::SanitiseMatched => {
                let name = tx.vars.get(Variable::MatchedVarName).to_string();
                if let Some((variable, key)) = name.split_once(':') {
                    let key = key.to_lowercase();
                    match Variable::parse(variable) {
                        Some(Variable::RequestHeaders) => tx.sanitise.request_headers.push(key),
                        Some(Variable::ResponseHeaders) => tx.sanitise.response_headers.push(key),
                        Some(v) if v.is_args() => tx.sanitise.args.push(key),
                        _ => {}
                    }
                }
            }
            NonDisruptiveAction::SanitiseRequestHeader(name) => {
                tx.sanitise.request_headers.push(name.to_lowercase())
            }
            NonDisruptiveAction::SanitiseResponseHeader(name) => {
                tx.sanitise.response_headers.push(name.to_lowercase())
            }
            NonDisruptiveAction::Log
            | NonDisruptiveAction::NoLog
            | NonDisruptiveAction::AuditLog
            | NonDisruptiveAction::NoAuditLog
            | NonDisruptiveAction::MultiMatch => {}
        }
    }
}

/// A compiled rule action.
#[derive(Debug, Clone)]
pub enum Action {
    /// Metadata action.
    Metadata(MetadataAction),
    /// Disruptive action.
    Disruptive(DisruptiveAction),
    /// Data action.
    Data(DataAction),
    /// Non-disruptive action.
    NonDisruptive(NonDisruptiveAction),
    /// Flow action.
    Flow(FlowAction),
}

fn required<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::action(name, "missing argument")),
    }
}

fn parse_key_value<'a>(name: &str, value: &'a str) -> Result<(&'a str, &'a str)> {
    value
        .split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| Error::action(name, format!("expected name=value, got {value}")))
}

impl Action {
    /// Build an action from its name and optional argument.
    pub fn parse(name: &str, value: Option<&str>) -> Result<Self> {
        use NonDisruptiveAction as Nd;

        let action = match name.trim().to_ascii_lowercase().as_str() {
            // Metadata
            "id" => {
                let v = required(name, value)?;
                match v.parse::<i32>() {
                    Ok(id) if id > 0 => Action::Metadata(MetadataAction::Id(id)),
                    _ => return Err(Error::action("id", format!("invalid rule id: {v}"))),
                }
            }
            "phase" => Action::Metadata(MetadataAction::Phase(parse_phase(required(name, value)?)?)),
            "msg" => Action::Metadata(MetadataAction::Msg(Macro::new(value.unwrap_or(""))?)),
            "logdata" => Action::Metadata(MetadataAction::LogData(Macro::new(value.unwrap_or(""))?)),
            "severity" => {
                Action::Metadata(MetadataAction::Severity(Severity::parse(required(name, value)?)?))
            }
            "tag" => Action::Metadata(MetadataAction::Tag(required(name, value)?.to_string())),
            "rev" => Action::Metadata(MetadataAction::Rev(required(name, value)?.to_string())),
            "ver" => Action::Metadata(MetadataAction::Ver(required(name, value)?.to_string())),
            "maturity" => {
                Action::Metadata(MetadataAction::Maturity(parse_level(name, required(name, value)?)?))
            }
            "accuracy" => {
                Action::Metadata(MetadataAction::Accuracy(parse_level(name, required(name, value)?)?))
            }

            // Disruptive
            "deny" => Action::Disruptive(DisruptiveAction::Deny),
            "drop" => Action::Disruptive(DisruptiveAction::Drop),
            "pass" => Action::Disruptive(DisruptiveAction::Pass),
            "block" => Action::Disruptive(DisruptiveAction::Block),
            "allow" => Action::Disruptive(DisruptiveAction::Allow(AllowType::parse(value)?)),
            "redirect" => {
                Action::Disruptive(DisruptiveAction::Redirect(Macro::new(required(name, value)?)?))
            }

            // Flow
            "chain" => Action::Flow(FlowAction::Chain),
            "skip" => Action::Flow(FlowAction::Skip(parse_skip(required(name, value)?)?)),
            "skipafter" => Action::Flow(FlowAction::SkipAfter(required(name, value)?.to_string())),

            // Data
            "status" => Action::Data(DataAction::Status(parse_status(required(name, value)?)?)),
            "capture" => Action::Data(DataAction::Capture),
            "t" => Action::Data(DataAction::Transformation(parse_transformation(required(
                name, value,
            )?)?)),
            "xmlns" => Action::Data(DataAction::Xmlns(required(name, value)?.to_string())),

            // Non-disruptive
            "log" => Action::NonDisruptive(Nd::Log),
            "nolog" => Action::NonDisruptive(Nd::NoLog),
            "auditlog" => Action::NonDisruptive(Nd::AuditLog),
            "noauditlog" => Action::NonDisruptive(Nd::NoAuditLog),
            "multimatch" => Action::NonDisruptive(Nd::MultiMatch),
            "setvar" => Action::NonDisruptive(Nd::SetVar(SetVar::parse(required(name, value)?)?)),
            "setenv" => {
                let (key, v) = parse_key_value(name, required(name, value)?)?;
                Action::NonDisruptive(Nd::SetEnv(key.to_string(), Macro::new(v)?))
            }
            "expirevar" => {
                Action::NonDisruptive(Nd::ExpireVar(ExpireVar::parse(required(name, value)?)?))
            }
            "initcol" => Action::NonDisruptive(Nd::InitCol(InitCol::parse(required(name, value)?)?)),
            "setsid" => Action::NonDisruptive(Nd::InitCol(InitCol::for_collection(
                Variable::Session,
                required(name, value)?,
            )?)),
            "setuid" => Action::NonDisruptive(Nd::InitCol(InitCol::for_collection(
                Variable::User,
                required(name, value)?,
            )?)),
            "ctl" => Action::NonDisruptive(Nd::Ctl(CtlAction::parse(required(name, value)?)?)),
            "sanitisearg" | "sanitizearg" => {
                Action::NonDisruptive(Nd::SanitiseArg(required(name, value)?.to_string()))
            }
            "sanitisematched" | "sanitizematched" => Action::NonDisruptive(Nd::SanitiseMatched),
            "sanitiserequestheader" | "sanitizerequestheader" => {
                Action::NonDisruptive(Nd::SanitiseRequestHeader(required(name, value)?.to_string()))
            }
            "sanitiseresponseheader" | "sanitizeresponseheader" => {
                Action::NonDisruptive(Nd::SanitiseResponseHeader(required(name, value)?.to_string()))
            }

            _ => {
                return Err(Error::UnknownAction {
                    name: name.to_string(),
                })
            }
        };
        Ok(action)
    }

    /// Action type.
    pub fn action_type(&self) -> ActionType {
        match self {
            Action::Metadata(_) => ActionType::Metadata,
            Action::Disruptive(_) => ActionType::Disruptive,
            Action::Data(_) => ActionType::Data,
            Action::NonDisruptive(_) => ActionType::NonDisruptive,
            Action::Flow(_) => ActionType::Flow,
        }
    }

    /// Action name as written in rules.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Metadata(a) => a.name(),
            Action::Disruptive(a) => a.name(),
            Action::Data(a) => a.name(),
            Action::NonDisruptive(a) => a.name(),
            Action::Flow(a) => a.name(),
        }
    }

    /// Whether this is a disruptive action.
    pub fn is_disruptive(&self) -> bool {
        matches!(self, Action::Disruptive(_))
    }

    /// Whether this is `block`.
    pub fn is_block(&self) -> bool {
        matches!(self, Action::Disruptive(DisruptiveAction::Block))
    }

    /// Whether this is a `t:` action.
    pub fn is_transformation(&self) -> bool {
        matches!(self, Action::Data(DataAction::Transformation(_)))
    }

    /// Apply the action to the rule being compiled.
    pub fn init(&self, rule: &mut Rule) -> Result<()> {
        match self {
            Action::Metadata(a) => a.init(rule),
            Action::Data(a) => a.init(rule)?,
            Action::NonDisruptive(a) => a.init(rule),
            Action::Flow(a) => a.init(rule),
            Action::Disruptive(_) => {}
        }
        Ok(())
    }

    /// Run the action for a match.
    pub(crate) fn evaluate(&self, rule: &Rule, tx: &mut Transaction) {
        match self {
            Action::NonDisruptive(a) => a.evaluate(tx),
            Action::Disruptive(a) => a.evaluate(rule, tx),
            Action::Flow(a) => a.evaluate(rule, tx),
            Action::Metadata(_) | Action::Data(_) => {}
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
