//! Records of matched rules and the error-log line built from them.

use crate::actions::Severity;
use crate::audit::{AuditMessage, AuditMessageData};
use crate::variables::MatchData;
use std::fmt::Write as _;

use super::rule::Rule;

/// A rule that matched during a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    /// Rule id.
    pub rule_id: i32,
    /// Source file.
    pub file: String,
    /// Source line.
    pub line: usize,
    /// `rev`.
    pub rev: String,
    /// `ver`.
    pub ver: String,
    /// `severity`.
    pub severity: Option<Severity>,
    /// `maturity`.
    pub maturity: u8,
    /// `accuracy`.
    pub accuracy: u8,
    /// `tag` values.
    pub tags: Vec<String>,
    /// Phase the rule matched in.
    pub phase: u8,
    /// Expanded `msg`.
    pub message: String,
    /// Expanded `logdata`.
    pub data: String,
    /// Every matched value, chain links included.
    pub matched_data: Vec<MatchData>,
    /// Whether the rule carries a disruptive action other than `pass`.
    pub disruptive: bool,
    /// Name of the disruptive action.
    pub disruptive_action: Option<String>,
    /// Whether the rule logs to the error log.
    pub log: bool,
    /// Whether the rule marks the transaction for auditing.
    pub audit_log: bool,
    /// Status of the interruption this rule caused.
    pub status: Option<u16>,
    /// Transaction id.
    pub transaction_id: String,
    /// Client address.
    pub client_ip: String,
    /// Server name.
    pub server_name: String,
    /// Request URI.
    pub uri: String,
}

impl MatchedRule {
    /// Build a record for `rule` with the transaction context filled in
    /// by the caller.
    pub(crate) fn new(
        rule: &Rule,
        phase: u8,
        message: String,
        data: String,
        matched_data: Vec<MatchData>,
    ) -> Self {
        let disruptive_action = rule.disruptive_action().map(|d| d.name().to_string());
        Self {
            rule_id: rule.id,
            file: rule
                .file
                .as_ref()
                .map(|f| f.display().to_string())
                .unwrap_or_default(),
            line: rule.line,
            rev: rule.metadata.rev.clone(),
            ver: rule.metadata.ver.clone(),
            severity: rule.metadata.severity,
            maturity: rule.metadata.maturity,
            accuracy: rule.metadata.accuracy,
            tags: rule.metadata.tags.clone(),
            phase,
            message,
            data,
            matched_data,
            disruptive: matches!(disruptive_action.as_deref(), Some(a) if a != "pass"),
            disruptive_action,
            log: rule.log,
            audit_log: rule.audit_log,
            status: None,
            transaction_id: String::new(),
            client_ip: String::new(),
            server_name: String::new(),
            uri: String::new(),
        }
    }

    /// The ModSecurity-style error-log line.
    pub fn error_log(&self) -> String {
        let mut log = String::with_capacity(256);
        let _ = write!(log, "[client {}] ", self.client_ip);
        match self.status {
            Some(code) => {
                let _ = write!(
                    log,
                    "ModSecurity: Access denied with code {code} (phase {}). ",
                    self.phase
                );
            }
            _ => log.push_str("ModSecurity: Warning. "),
        }
        if let Some(m) = self.matched_data.first() {
            let _ = write!(log, "Matched Data: {} found within {}. ", m.value, m.full_name());
        }
        log.push_str(&self.message);
        let _ = write!(log, " [file \"{}\"] [line \"{}\"] [id \"{}\"]", self.file, self.line, self.rule_id);
        let _ = write!(log, " [rev \"{}\"] [msg \"{}\"] [data \"{}\"]", self.rev, self.message, self.data);
        let severity = self.severity.map(|s| s.name()).unwrap_or("");
        let _ = write!(log, " [severity \"{severity}\"] [ver \"{}\"]", self.ver);
        let _ = write!(log, " [maturity \"{}\"] [accuracy \"{}\"]", self.maturity, self.accuracy);
        for tag in &self.tags {
            let _ = write!(log, " [tag \"{tag}\"]");
        }
        let _ = write!(
            log,
            " [hostname \"{}\"] [uri \"{}\"] [unique_id \"{}\"]",
            self.server_name, self.uri, self.transaction_id
        );
        log
    }

    /// Audit log message for this match.
    pub fn audit_message(&self) -> AuditMessage {
        AuditMessage {
            actionset: self.disruptive_action.clone().unwrap_or_default(),
            message: self.error_log(),
            data: AuditMessageData {
                file: self.file.clone(),
                line: self.line,
                id: self.rule_id,
                rev: self.rev.clone(),
                msg: self.message.clone(),
                data: self.data.clone(),
                severity: self.severity.map_or(0, Severity::level),
                ver: self.ver.clone(),
                maturity: self.maturity,
                accuracy: self.accuracy,
                tags: self.tags.clone(),
            },
        }
    }
}
