//! Disruptive actions (deny, drop, allow, etc.).

use crate::config::RuleEngineMode;
use crate::engine::{Interruption, InterruptionAction, Rule, Transaction};
use crate::error::{Error, Result};
use crate::macros::Macro;
use tracing::debug;

/// Scope of an `allow` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowType {
    /// Skip every remaining rule except phase 5.
    All,
    /// Skip the rest of the current phase.
    Phase,
    /// Skip the rest of the request phases.
    Request,
}

impl AllowType {
    /// Parse the optional `allow:` argument.
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") => Ok(AllowType::All),
            Some("phase") => Ok(AllowType::Phase),
            Some("request") => Ok(AllowType::Request),
            Some(other) => Err(Error::action("allow", format!("invalid scope: {other}"))),
        }
    }
}

/// Actions that decide the fate of the transaction.
#[derive(Debug, Clone)]
pub enum DisruptiveAction {
    /// Deny the request.
    Deny,
    /// Drop the connection.
    Drop,
    /// Continue processing.
    Pass,
    /// Use the default disruptive action.
    Block,
    /// Stop evaluating rules for the given scope.
    Allow(AllowType),
    /// Redirect to a URL.
    Redirect(Macro),
}

impl DisruptiveAction {
    /// Action name.
    pub fn name(&self) -> &'static str {
        match self {
            DisruptiveAction::Deny => "deny",
            DisruptiveAction::Drop => "drop",
            DisruptiveAction::Pass => "pass",
            DisruptiveAction::Block => "block",
            DisruptiveAction::Allow(_) => "allow",
            DisruptiveAction::Redirect(_) => "redirect",
        }
    }

    /// Apply the decision to the transaction.
    pub(crate) fn evaluate(&self, rule: &Rule, tx: &mut Transaction) {
        let rule_id = rule.log_id();
        match self {
            DisruptiveAction::Deny => tx.interrupt(Interruption {
                rule_id,
                action: InterruptionAction::Deny,
                status: rule.disruptive_status.unwrap_or(403),
                data: String::new(),
            }),
            DisruptiveAction::Drop => tx.interrupt(Interruption {
                rule_id,
                action: InterruptionAction::Drop,
                status: rule.disruptive_status.unwrap_or(0),
                data: String::new(),
            }),
            DisruptiveAction::Redirect(url) => {
                let status = match rule.disruptive_status {
                    Some(s @ (301 | 302 | 303 | 307)) => s,
                    _ => 302,
                };
                let data = url.expand(&tx.vars);
                tx.interrupt(Interruption {
                    rule_id,
                    action: InterruptionAction::Redirect,
                    status,
                    data,
                });
            }
            DisruptiveAction::Allow(scope) => {
                if tx.config.rule_engine == RuleEngineMode::On {
                    debug!(rule_id, ?scope, "allow");
                    tx.allow = Some(*scope);
                }
            }
            DisruptiveAction::Pass | DisruptiveAction::Block => {}
        }
    }
}
