//! Interruptions produced by disruptive actions.

use std::fmt;

/// The disruptive decision behind an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionAction {
    /// Reject with a status code.
    Deny,
    /// Close the connection.
    Drop,
    /// Send the client elsewhere.
    Redirect,
    /// Stop inspecting.
    Allow,
    /// Continue.
    Pass,
}

impl InterruptionAction {
    /// Action name.
    pub fn as_str(self) -> &'static str {
        match self {
            InterruptionAction::Deny => "deny",
            InterruptionAction::Drop => "drop",
            InterruptionAction::Redirect => "redirect",
            InterruptionAction::Allow => "allow",
            InterruptionAction::Pass => "pass",
        }
    }
}

impl fmt::Display for InterruptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the embedder must do with the request.
///
/// A transaction holds at most one; the first disruptive rule wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    /// Id of the rule that interrupted (0 for body limits).
    pub rule_id: i32,
    /// Disruptive action.
    pub action: InterruptionAction,
    /// HTTP status (0 for drop).
    pub status: u16,
    /// Redirect URL or other action data.
    pub data: String,
}

impl Interruption {
    /// A deny without a rule, used by body limits.
    pub fn deny(status: u16) -> Self {
        Self {
            rule_id: 0,
            action: InterruptionAction::Deny,
            status,
            data: String::new(),
        }
    }
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[status {}] [action {}] [id {}]", self.status, self.action, self.rule_id)?;
        if !self.data.is_empty() {
            write!(f, " [data {}]", self.data)?;
        }
        Ok(())
    }
}
