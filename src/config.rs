//! Engine configuration written by directives.
//!
//! [`WafConfig`] is filled while rules are parsed and frozen with the WAF.
//! Every transaction takes a [`TransactionConfig`] copy of the settings that
//! `ctl` may change, so runtime overrides never leak across requests.

use crate::audit::AuditLogParts;
use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::path::PathBuf;

/// `SecRuleEngine` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleEngineMode {
    /// Rules run and disruptive actions interrupt.
    On,
    /// Rules do not run.
    Off,
    /// Rules run but never interrupt.
    #[default]
    DetectionOnly,
}

impl RuleEngineMode {
    /// Parse `On`, `Off` or `DetectionOnly` (case-insensitive).
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(RuleEngineMode::On),
            "off" => Ok(RuleEngineMode::Off),
            "detectiononly" => Ok(RuleEngineMode::DetectionOnly),
            other => Err(Error::config(format!("invalid rule engine mode: {other}"))),
        }
    }

    /// Directive spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            RuleEngineMode::On => "On",
            RuleEngineMode::Off => "Off",
            RuleEngineMode::DetectionOnly => "DetectionOnly",
        }
    }
}

impl fmt::Display for RuleEngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens when a body exceeds its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyLimitAction {
    /// Interrupt the transaction.
    #[default]
    Reject,
    /// Keep the bytes up to the limit and drop the rest.
    ProcessPartial,
}

impl BodyLimitAction {
    /// Parse `Reject` or `ProcessPartial`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(BodyLimitAction::Reject),
            "processpartial" => Ok(BodyLimitAction::ProcessPartial),
            other => Err(Error::config(format!("invalid body limit action: {other}"))),
        }
    }
}

/// `SecAuditEngine` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditEngineMode {
    /// Log every transaction.
    On,
    /// Log nothing.
    #[default]
    Off,
    /// Log transactions that matched a rule or a relevant status.
    RelevantOnly,
}

impl AuditEngineMode {
    /// Parse `On`, `Off` or `RelevantOnly`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(AuditEngineMode::On),
            "off" => Ok(AuditEngineMode::Off),
            "relevantonly" => Ok(AuditEngineMode::RelevantOnly),
            other => Err(Error::config(format!("invalid audit engine mode: {other}"))),
        }
    }
}

/// `SecAuditLogType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditLogType {
    /// One file, one record after another.
    #[default]
    Serial,
    /// One file per transaction under the audit directory.
    Concurrent,
    /// Records are posted to a remote collector by the embedder.
    Https,
}

impl AuditLogType {
    /// Parse the directive value.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(AuditLogType::Serial),
            "concurrent" => Ok(AuditLogType::Concurrent),
            "https" => Ok(AuditLogType::Https),
            other => Err(Error::config(format!("unsupported audit log type: {other}"))),
        }
    }
}

/// `SecAuditLogFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditLogFormat {
    /// Classic `--id-X--` sections.
    #[default]
    Native,
    /// One JSON document per transaction.
    Json,
}

impl AuditLogFormat {
    /// Parse the directive value.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(AuditLogFormat::Native),
            "json" => Ok(AuditLogFormat::Json),
            other => Err(Error::config(format!("unsupported audit log format: {other}"))),
        }
    }
}

/// `SecRemoteRulesFailAction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteRulesFailAction {
    /// Stop loading.
    #[default]
    Abort,
    /// Log and keep going.
    Warn,
}

impl RemoteRulesFailAction {
    /// Parse `Abort` or `Warn`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(RemoteRulesFailAction::Abort),
            "warn" => Ok(RemoteRulesFailAction::Warn),
            other => Err(Error::config(format!("invalid remote rules fail action: {other}"))),
        }
    }
}

/// Parse an `On`/`Off` switch.
pub fn parse_on_off(directive: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(Error::config(format!("{directive}: expected On or Off, got {other}"))),
    }
}

/// Parse an octal file mode such as `0600`.
pub fn parse_octal(directive: &str, value: &str) -> Result<u32> {
    u32::from_str_radix(value.trim(), 8)
        .map_err(|_| Error::config(format!("{directive}: invalid octal mode {value}")))
}

/// Parse a non-negative size or count.
pub fn parse_size(directive: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::config(format!("{directive}: invalid number {value}")))
}

/// Audit log settings.
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    /// `SecAuditEngine`.
    pub engine: AuditEngineMode,
    /// `SecAuditLog`.
    pub path: Option<PathBuf>,
    /// `SecAuditLogType`.
    pub log_type: AuditLogType,
    /// `SecAuditLogFormat`.
    pub format: AuditLogFormat,
    /// `SecAuditLogDir` (concurrent logs).
    pub dir: Option<PathBuf>,
    /// `SecAuditLogDirMode`.
    pub dir_mode: u32,
    /// `SecAuditLogFileMode`.
    pub file_mode: u32,
    /// `SecAuditLogRelevantStatus`.
    pub relevant_status: Option<Regex>,
    /// `SecAuditLogParts`.
    pub parts: AuditLogParts,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            engine: AuditEngineMode::Off,
            path: None,
            log_type: AuditLogType::Serial,
            format: AuditLogFormat::Native,
            dir: None,
            dir_mode: 0o750,
            file_mode: 0o640,
            relevant_status: None,
            parts: AuditLogParts::default(),
        }
    }
}

/// Engine settings shared by every transaction of a WAF.
#[derive(Debug, Clone)]
pub struct WafConfig {
    /// `SecRuleEngine`.
    pub rule_engine: RuleEngineMode,
    /// `SecRequestBodyAccess`.
    pub request_body_access: bool,
    /// `SecRequestBodyLimit`.
    pub request_body_limit: usize,
    /// `SecRequestBodyInMemoryLimit`.
    pub request_body_in_memory_limit: usize,
    /// `SecRequestBodyNoFilesLimit`.
    pub request_body_no_files_limit: usize,
    /// `SecRequestBodyLimitAction`.
    pub request_body_limit_action: BodyLimitAction,
    /// `SecRequestBodyJsonDepthLimit`.
    pub request_body_json_depth_limit: usize,
    /// `SecResponseBodyAccess`.
    pub response_body_access: bool,
    /// `SecResponseBodyLimit`.
    pub response_body_limit: usize,
    /// `SecResponseBodyLimitAction`.
    pub response_body_limit_action: BodyLimitAction,
    /// `SecResponseBodyMimeType`.
    pub response_body_mime_types: Vec<String>,
    /// `SecArgumentsLimit`.
    pub arguments_limit: usize,
    /// `SecTmpDir`; the system temp dir when unset.
    pub tmp_dir: Option<PathBuf>,
    /// `SecDataDir`.
    pub data_dir: Option<PathBuf>,
    /// `SecUploadDir`; falls back to the temp dir.
    pub upload_dir: Option<PathBuf>,
    /// `SecUploadKeepFiles`.
    pub upload_keep_files: bool,
    /// `SecUploadFileMode`.
    pub upload_file_mode: u32,
    /// `SecUploadFileLimit`.
    pub upload_file_limit: usize,
    /// `SecCollectionTimeout` in seconds.
    pub collection_timeout: u64,
    /// Audit log settings.
    pub audit_log: AuditLogConfig,
    /// `SecComponentSignature` values.
    pub component_signatures: Vec<String>,
    /// `SecServerSignature`.
    pub server_signature: Option<String>,
    /// `SecWebAppId`.
    pub web_app_id: String,
    /// `SecSensorId`.
    pub sensor_id: String,
    /// `SecDebugLog`.
    pub debug_log_path: Option<PathBuf>,
    /// `SecDebugLogLevel` (0 to 9).
    pub debug_log_level: u8,
    /// `SecRemoteRulesFailAction`.
    pub remote_rules_fail_action: RemoteRulesFailAction,
    /// `SecIgnoreRuleCompilationErrors`.
    pub ignore_rule_compilation_errors: bool,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            rule_engine: RuleEngineMode::DetectionOnly,
            request_body_access: false,
            request_body_limit: 134_217_728,
            request_body_in_memory_limit: 131_072,
            request_body_no_files_limit: 1_048_576,
            request_body_limit_action: BodyLimitAction::Reject,
            request_body_json_depth_limit: 1024,
            response_body_access: false,
            response_body_limit: 524_288,
            response_body_limit_action: BodyLimitAction::ProcessPartial,
            response_body_mime_types: vec!["text/html".to_string(), "text/plain".to_string()],
            arguments_limit: 1000,
            tmp_dir: None,
            data_dir: None,
            upload_dir: None,
            upload_keep_files: false,
            upload_file_mode: 0o600,
            upload_file_limit: 100,
            collection_timeout: 3600,
            audit_log: AuditLogConfig::default(),
            component_signatures: Vec::new(),
            server_signature: None,
            web_app_id: String::new(),
            sensor_id: String::new(),
            debug_log_path: None,
            debug_log_level: 0,
            remote_rules_fail_action: RemoteRulesFailAction::Abort,
            ignore_rule_compilation_errors: false,
        }
    }
}

impl WafConfig {
    /// Directory used for body spill files.
    pub fn tmp_dir(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Directory used for kept uploads.
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir.clone().unwrap_or_else(|| self.tmp_dir())
    }
}

/// Per-transaction copy of the settings `ctl` may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Rule engine mode.
    pub rule_engine: RuleEngineMode,
    /// Whether the request body is buffered and processed.
    pub request_body_access: bool,
    /// Request body limit in bytes.
    pub request_body_limit: usize,
    /// Request body limit action.
    pub request_body_limit_action: BodyLimitAction,
    /// Forced request body processor (upper-case name).
    pub request_body_processor: Option<String>,
    /// Parse unknown content types as url-encoded.
    pub force_request_body_variable: bool,
    /// Whether the response body is buffered and processed.
    pub response_body_access: bool,
    /// Response body limit in bytes.
    pub response_body_limit: usize,
    /// Response body limit action.
    pub response_body_limit_action: BodyLimitAction,
    /// Forced response body processor (upper-case name).
    pub response_body_processor: Option<String>,
    /// Audit engine mode.
    pub audit_engine: AuditEngineMode,
    /// Audit log parts.
    pub audit_log_parts: AuditLogParts,
    /// Debug log level.
    pub debug_log_level: u8,
}

impl From<&WafConfig> for TransactionConfig {
    fn from(config: &WafConfig) -> Self {
        Self {
            rule_engine: config.rule_engine,
            request_body_access: config.request_body_access,
            request_body_limit: config.request_body_limit,
            request_body_limit_action: config.request_body_limit_action,
            request_body_processor: None,
            force_request_body_variable: false,
            response_body_access: config.response_body_access,
            response_body_limit: config.response_body_limit,
            response_body_limit_action: config.response_body_limit_action,
            response_body_processor: None,
            audit_engine: config.audit_log.engine,
            audit_log_parts: config.audit_log.parts.clone(),
            debug_log_level: config.debug_log_level,
        }
    }
}
