//! Metadata actions (id, msg, severity, tag, etc.).

use crate::engine::Rule;
use crate::error::{Error, Result};
use crate::macros::Macro;
use crate::metadata::MetadataSet;
use std::fmt;

/// Severity levels as defined in ModSecurity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    /// Parse a severity given as a number or a name.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Ok(n) = value.parse::<u8>() {
            return Self::from_level(n)
                .ok_or_else(|| Error::action("severity", format!("level out of range: {n}")));
        }
        match value.to_ascii_uppercase().as_str() {
            "EMERGENCY" => Ok(Severity::Emergency),
            "ALERT" => Ok(Severity::Alert),
            "CRITICAL" => Ok(Severity::Critical),
            "ERROR" => Ok(Severity::Error),
            "WARNING" => Ok(Severity::Warning),
            "NOTICE" => Ok(Severity::Notice),
            "INFO" => Ok(Severity::Info),
            "DEBUG" => Ok(Severity::Debug),
            _ => Err(Error::action("severity", format!("unknown severity: {value}"))),
        }
    }

    /// Severity for a numeric level.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Severity::Emergency),
            1 => Some(Severity::Alert),
            2 => Some(Severity::Critical),
            3 => Some(Severity::Error),
            4 => Some(Severity::Warning),
            5 => Some(Severity::Notice),
            6 => Some(Severity::Info),
            7 => Some(Severity::Debug),
            _ => None,
        }
    }

    /// Numeric level.
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Get severity name.
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Emergency => "EMERGENCY",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Actions that only describe the rule.
#[derive(Debug, Clone)]
pub enum MetadataAction {
    /// Rule ID.
    Id(i32),
    /// Processing phase.
    Phase(u8),
    /// Rule message.
    Msg(Macro),
    /// Extra data logged on match.
    LogData(Macro),
    /// Severity level.
    Severity(Severity),
    /// Tag for categorization.
    Tag(String),
    /// Rule revision.
    Rev(String),
    /// Rule set version.
    Ver(String),
    /// Maturity level (1-9).
    Maturity(u8),
    /// Accuracy level (1-9).
    Accuracy(u8),
}

impl MetadataAction {
    /// Action name.
    pub fn name(&self) -> &'static str {
        match self {
            MetadataAction::Id(_) => "id",
            MetadataAction::Phase(_) => "phase",
            MetadataAction::Msg(_) => "msg",
            MetadataAction::LogData(_) => "logdata",
            MetadataAction::Severity(_) => "severity",
            MetadataAction::Tag(_) => "tag",
            MetadataAction::Rev(_) => "rev",
            MetadataAction::Ver(_) => "ver",
            MetadataAction::Maturity(_) => "maturity",
            MetadataAction::Accuracy(_) => "accuracy",
        }
    }

    /// Copy the value onto the rule.
    pub(crate) fn init(&self, rule: &mut Rule) {
        let meta = &mut rule.metadata;
        match self {
            MetadataAction::Id(id) => rule.id = *id,
            MetadataAction::Phase(phase) => rule.phase = *phase,
            MetadataAction::Msg(m) => meta.msg = Some(m.clone()),
            MetadataAction::LogData(m) => meta.logdata = Some(m.clone()),
            MetadataAction::Severity(s) => meta.severity = Some(*s),
            MetadataAction::Tag(tag) => {
                if let Some(list) = tag.strip_prefix("metadatafilter/") {
                    if let Some(filter) = MetadataSet::parse_filter(list) {
                        rule.metadata_filter = Some(filter);
                    }
                }
                meta.tags.push(tag.clone());
            }
            MetadataAction::Rev(rev) => meta.rev = rev.clone(),
            MetadataAction::Ver(ver) => meta.ver = ver.clone(),
            MetadataAction::Maturity(n) => meta.maturity = *n,
            MetadataAction::Accuracy(n) => meta.accuracy = *n,
        }
    }
}

/// Parse `phase:N`; `request`, `response` and `logging` name phases 2, 4 and 5.
pub fn parse_phase(value: &str) -> Result<u8> {
    let value = value.trim();
    let phase = match value.to_ascii_lowercase().as_str() {
        "request" => 2,
        "response" => 4,
        "logging" => 5,
        other => other
            .parse::<u8>()
            .map_err(|_| Error::action("phase", format!("invalid phase: {value}")))?,
    };
    if !(1..=5).contains(&phase) {
        return Err(Error::action("phase", format!("phase out of range: {phase}")));
    }
    Ok(phase)
}

/// Parse a 1-9 level used by `maturity` and `accuracy`.
pub fn parse_level(action: &str, value: &str) -> Result<u8> {
    match value.trim().parse::<u8>() {
        Ok(n) if (1..=9).contains(&n) => Ok(n),
        _ => Err(Error::action(action, format!("expected 1-9, got {value}"))),
    }
}
