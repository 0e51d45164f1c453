//! `ctl`: per-transaction configuration changes.

use crate::audit::AuditLogParts;
use crate::config::{parse_on_off, parse_size, AuditEngineMode, RuleEngineMode};
use crate::engine::{IdRange, RuleFilter, Transaction, VariableTarget};
use crate::error::{Error, Result};
use tracing::debug;

/// Body processors `ctl` may select.
const BODY_PROCESSORS: &[&str] = &["URLENCODED", "MULTIPART", "JSON", "JSONSTREAM", "XML"];

/// A parsed `ctl:name=value`.
#[derive(Debug, Clone)]
pub enum CtlAction {
    /// `ruleEngine`.
    RuleEngine(RuleEngineMode),
    /// `requestBodyAccess`.
    RequestBodyAccess(bool),
    /// `requestBodyLimit`.
    RequestBodyLimit(usize),
    /// `requestBodyProcessor`.
    RequestBodyProcessor(String),
    /// `responseBodyAccess`.
    ResponseBodyAccess(bool),
    /// `responseBodyLimit`.
    ResponseBodyLimit(usize),
    /// `responseBodyProcessor`.
    ResponseBodyProcessor(String),
    /// `forceRequestBodyVariable`.
    ForceRequestBodyVariable(bool),
    /// `ruleRemoveById`, `ruleRemoveByTag`, `ruleRemoveByMsg`.
    RuleRemove(RuleFilter),
    /// `ruleRemoveTargetById`, `ruleRemoveTargetByTag`, `ruleRemoveTargetByMsg`.
    RuleRemoveTarget(RuleFilter, VariableTarget),
    /// `auditEngine`.
    AuditEngine(AuditEngineMode),
    /// `auditLogParts` (`+X`, `-X` or a full list).
    AuditLogParts(String),
    /// `debugLogLevel`.
    DebugLogLevel(u8),
}

fn body_processor(value: &str) -> Result<String> {
    let name = value.trim().to_ascii_uppercase();
    if BODY_PROCESSORS.contains(&name.as_str()) {
        Ok(name)
    } else {
        Err(Error::action("ctl", format!("unknown body processor: {value}")))
    }
}

fn target_filter(kind: &str, value: &str) -> Result<(RuleFilter, VariableTarget)> {
    let (scope, target) = value
        .split_once(';')
        .ok_or_else(|| Error::action("ctl", format!("{kind}: expected scope;TARGET")))?;
    let filter = match kind {
        "id" => RuleFilter::Ids(vec![IdRange::parse(scope)?]),
        "tag" => RuleFilter::Tag(scope.trim().to_string()),
        _ => RuleFilter::Msg(scope.trim().to_string()),
    };
    Ok((filter, VariableTarget::parse(target)?))
}

impl CtlAction {
    /// Parse the `ctl:` argument.
    pub fn parse(value: &str) -> Result<Self> {
        let (name, arg) = value
            .split_once('=')
            .ok_or_else(|| Error::action("ctl", format!("expected name=value, got {value}")))?;
        let arg = arg.trim();
        let ctl = match name.trim().to_ascii_lowercase().as_str() {
            "ruleengine" => CtlAction::RuleEngine(RuleEngineMode::parse(arg)?),
            "requestbodyaccess" => CtlAction::RequestBodyAccess(parse_on_off("ctl", arg)?),
            "requestbodylimit" => CtlAction::RequestBodyLimit(parse_size("ctl", arg)?),
            "requestbodyprocessor" => CtlAction::RequestBodyProcessor(body_processor(arg)?),
            "responsebodyaccess" => CtlAction::ResponseBodyAccess(parse_on_off("ctl", arg)?),
            "responsebodylimit" => CtlAction::ResponseBodyLimit(parse_size("ctl", arg)?),
            "responsebodyprocessor" => CtlAction::ResponseBodyProcessor(body_processor(arg)?),
            "forcerequestbodyvariable" => {
                CtlAction::ForceRequestBodyVariable(parse_on_off("ctl", arg)?)
            }
            "ruleremovebyid" => CtlAction::RuleRemove(RuleFilter::Ids(IdRange::parse_list(arg)?)),
            "ruleremovebytag" => CtlAction::RuleRemove(RuleFilter::Tag(arg.to_string())),
            "ruleremovebymsg" => CtlAction::RuleRemove(RuleFilter::Msg(arg.to_string())),
            "ruleremovetargetbyid" => {
                let (filter, target) = target_filter("id", arg)?;
                CtlAction::RuleRemoveTarget(filter, target)
            }
            "ruleremovetargetbytag" => {
                let (filter, target) = target_filter("tag", arg)?;
                CtlAction::RuleRemoveTarget(filter, target)
            }
            "ruleremovetargetbymsg" => {
                let (filter, target) = target_filter("msg", arg)?;
                CtlAction::RuleRemoveTarget(filter, target)
            }
            "auditengine" => CtlAction::AuditEngine(AuditEngineMode::parse(arg)?),
            "auditlogparts" => {
                AuditLogParts::default().apply(arg)?;
                CtlAction::AuditLogParts(arg.to_string())
            }
            "debugloglevel" => match arg.parse::<u8>() {
                Ok(n) if n <= 9 => CtlAction::DebugLogLevel(n),
                _ => return Err(Error::action("ctl", format!("invalid debug log level: {arg}"))),
            },
            other => return Err(Error::action("ctl", format!("unknown ctl option: {other}"))),
        };
        Ok(ctl)
    }

    pub(crate) fn evaluate(&self, tx: &mut Transaction) {
        debug!(ctl = ?self, "ctl");
        let config = &mut tx.config;
        match self {
            CtlAction::RuleEngine(mode) => config.rule_engine = *mode,
            CtlAction::RequestBodyAccess(on) => config.request_body_access = *on,
            CtlAction::RequestBodyLimit(n) => config.request_body_limit = *n,
            CtlAction::RequestBodyProcessor(name) => {
                config.request_body_processor = Some(name.clone());
                tx.vars.set(crate::variables::Variable::ReqbodyProcessor, name.clone());
            }
            CtlAction::ResponseBodyAccess(on) => config.response_body_access = *on,
            CtlAction::ResponseBodyLimit(n) => config.response_body_limit = *n,
            CtlAction::ResponseBodyProcessor(name) => {
                config.response_body_processor = Some(name.clone());
                tx.vars.set(crate::variables::Variable::ResbodyProcessor, name.clone());
            }
            CtlAction::ForceRequestBodyVariable(on) => config.force_request_body_variable = *on,
            CtlAction::RuleRemove(filter) => tx.removed_rules.push(filter.clone()),
            CtlAction::RuleRemoveTarget(filter, target) => {
                tx.target_exceptions.push((filter.clone(), target.clone()))
            }
            CtlAction::AuditEngine(mode) => config.audit_engine = *mode,
            CtlAction::AuditLogParts(modification) => {
                if let Err(e) = config.audit_log_parts.apply(modification) {
                    debug!(error = %e, "ctl:auditLogParts rejected");
                }
            }
            CtlAction::DebugLogLevel(n) => config.debug_log_level = *n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::Variable;

    #[test]
    fn test_parse_settings() {
        assert!(matches!(
            CtlAction::parse("ruleEngine=Off").unwrap(),
            CtlAction::RuleEngine(RuleEngineMode::Off)
        ));
        assert!(matches!(
            CtlAction::parse("requestBodyProcessor=json").unwrap(),
            CtlAction::RequestBodyProcessor(ref p) if p == "JSON"
        ));
        assert!(matches!(
            CtlAction::parse("forceRequestBodyVariable=On").unwrap(),
            CtlAction::ForceRequestBodyVariable(true)
        ));
        assert!(matches!(
            CtlAction::parse("auditLogParts=+E").unwrap(),
            CtlAction::AuditLogParts(ref p) if p == "+E"
        ));
    }

    #[test]
    fn test_parse_removals() {
        match CtlAction::parse("ruleRemoveById=100-200").unwrap() {
            CtlAction::RuleRemove(RuleFilter::Ids(ids)) => {
                assert!(ids[0].contains(150));
                assert!(!ids[0].contains(201));
            }
            other => panic!("unexpected {other:?}"),
        }
        match CtlAction::parse("ruleRemoveTargetById=942100;ARGS:password").unwrap() {
            CtlAction::RuleRemoveTarget(RuleFilter::Ids(ids), target) => {
                assert!(ids[0].contains(942100));
                assert_eq!(target.variable, Variable::Args);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            CtlAction::parse("ruleRemoveTargetByTag=attack-sqli;REQUEST_COOKIES:/^sess/").unwrap(),
            CtlAction::RuleRemoveTarget(RuleFilter::Tag(_), _)
        ));
    }

    #[test]
    fn test_unknown_ctl_is_error() {
        assert!(CtlAction::parse("frobnicate=On").is_err());
        assert!(CtlAction::parse("ruleEngine").is_err());
        assert!(CtlAction::parse("requestBodyProcessor=YAML").is_err());
        assert!(CtlAction::parse("auditLogParts=+Q").is_err());
    }
}
