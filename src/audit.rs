//! Audit log records and writers.
//!
//! The transaction assembles an [`AuditLog`] during phase 5, keeping only
//! the parts enabled by `SecAuditLogParts`, and hands it to the configured
//! [`AuditLogWriter`].

use crate::config::{AuditLogConfig, AuditLogFormat, AuditLogType};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One section of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuditLogPart {
    /// Record header.
    Header,
    /// Request headers.
    RequestHeaders,
    /// Request body.
    RequestBody,
    /// Reserved.
    IntermediaryResponseHeaders,
    /// Response body.
    ResponseBody,
    /// Response headers.
    ResponseHeaders,
    /// Reserved.
    IntermediaryResponseBody,
    /// Trailer with messages and producer.
    Trailer,
    /// Request body without file content.
    ReducedRequestBody,
    /// Uploaded files.
    UploadedFiles,
    /// Matched rules.
    RulesMatched,
    /// Record terminator.
    EndMarker,
}

impl AuditLogPart {
    const ALL: [AuditLogPart; 12] = [
        AuditLogPart::Header,
        AuditLogPart::RequestHeaders,
        AuditLogPart::RequestBody,
        AuditLogPart::IntermediaryResponseHeaders,
        AuditLogPart::ResponseBody,
        AuditLogPart::ResponseHeaders,
        AuditLogPart::IntermediaryResponseBody,
        AuditLogPart::Trailer,
        AuditLogPart::ReducedRequestBody,
        AuditLogPart::UploadedFiles,
        AuditLogPart::RulesMatched,
        AuditLogPart::EndMarker,
    ];

    /// Section letter.
    pub fn letter(self) -> char {
        match self {
            AuditLogPart::Header => 'A',
            AuditLogPart::RequestHeaders => 'B',
            AuditLogPart::RequestBody => 'C',
            AuditLogPart::IntermediaryResponseHeaders => 'D',
            AuditLogPart::ResponseBody => 'E',
            AuditLogPart::ResponseHeaders => 'F',
            AuditLogPart::IntermediaryResponseBody => 'G',
            AuditLogPart::Trailer => 'H',
            AuditLogPart::ReducedRequestBody => 'I',
            AuditLogPart::UploadedFiles => 'J',
            AuditLogPart::RulesMatched => 'K',
            AuditLogPart::EndMarker => 'Z',
        }
    }

    /// Part for a section letter.
    pub fn from_letter(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.letter() == c.to_ascii_uppercase())
    }
}

/// Set of enabled audit log parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogParts(Vec<AuditLogPart>);

impl Default for AuditLogParts {
    fn default() -> Self {
        // ABCFHZ
        Self(vec![
            AuditLogPart::Header,
            AuditLogPart::RequestHeaders,
            AuditLogPart::RequestBody,
            AuditLogPart::ResponseHeaders,
            AuditLogPart::Trailer,
            AuditLogPart::EndMarker,
        ])
    }
}

impl AuditLogParts {
    /// Parse a letter list such as `ABCFHZ`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = Vec::new();
        for c in value.trim().chars() {
            let part = AuditLogPart::from_letter(c)
                .ok_or_else(|| Error::config(format!("invalid audit log part: {c}")))?;
            if !parts.contains(&part) {
                parts.push(part);
            }
        }
        parts.sort();
        Ok(Self(parts))
    }

    /// Apply `+XY` (add), `-XY` (remove) or a full replacement.
    pub fn apply(&mut self, modification: &str) -> Result<()> {
        let modification = modification.trim();
        if let Some(added) = modification.strip_prefix('+') {
            for part in Self::parse(added)?.0 {
                if !self.0.contains(&part) {
                    self.0.push(part);
                }
            }
            self.0.sort();
        } else if let Some(removed) = modification.strip_prefix('-') {
            let removed = Self::parse(removed)?;
            self.0.retain(|p| !removed.0.contains(p));
        } else {
            *self = Self::parse(modification)?;
        }
        Ok(())
    }

    /// Whether a part is enabled.
    pub fn contains(&self, part: AuditLogPart) -> bool {
        self.0.contains(&part)
    }

    /// Enabled parts in letter order.
    pub fn iter(&self) -> impl Iterator<Item = AuditLogPart> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for AuditLogParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.0 {
            f.write_char(part.letter())?;
        }
        Ok(())
    }
}

/// A complete audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    /// Letters of the populated parts.
    pub parts: String,
    /// Transaction data.
    pub transaction: AuditTransaction,
    /// Messages of matched rules (parts H and K).
    pub messages: Vec<AuditMessage>,
}

/// Transaction section of an audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTransaction {
    /// Transaction start, RFC 3339.
    pub timestamp: String,
    /// Transaction start, nanoseconds since the epoch.
    pub unix_timestamp: i64,
    /// Unique transaction id.
    pub id: String,
    /// Client address.
    pub client_ip: String,
    /// Client port.
    pub client_port: u16,
    /// Server address.
    pub host_ip: String,
    /// Server port.
    pub host_port: u16,
    /// `SecSensorId`.
    pub server_id: String,
    /// Request data (parts B, C, I, J).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AuditRequest>,
    /// Response data (parts E, F).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AuditResponse>,
    /// Producer data (part H).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<AuditProducer>,
}

/// Request section of an audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditRequest {
    /// Request line.
    pub line: String,
    /// HTTP method.
    pub method: String,
    /// Request URI.
    pub uri: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub http_version: String,
    /// Request headers.
    pub headers: BTreeMap<String, Vec<String>>,
    /// Request body.
    pub body: String,
    /// Uploaded files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<AuditFile>,
}

/// Uploaded file entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFile {
    /// File name as sent by the client.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Response section of an audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditResponse {
    /// Protocol version.
    pub protocol: String,
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, Vec<String>>,
    /// Response body.
    pub body: String,
}

/// Producer section of an audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditProducer {
    /// Embedding connector.
    pub connector: String,
    /// Engine version.
    pub version: String,
    /// Server signature.
    pub server: String,
    /// Rule engine mode.
    pub rule_engine: String,
    /// Per-phase timings.
    pub stopwatch: String,
    /// `SecComponentSignature` values.
    pub rulesets: Vec<String>,
}

/// One matched rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditMessage {
    /// Disruptive action name.
    pub actionset: String,
    /// Error log line.
    pub message: String,
    /// Rule metadata.
    pub data: AuditMessageData,
}

/// Rule metadata inside a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditMessageData {
    /// Rule file.
    pub file: String,
    /// Rule line.
    pub line: usize,
    /// Rule id.
    pub id: i32,
    /// `rev`.
    pub rev: String,
    /// Expanded message.
    pub msg: String,
    /// Expanded logdata.
    pub data: String,
    /// Severity level.
    pub severity: u8,
    /// `ver`.
    pub ver: String,
    /// `maturity`.
    pub maturity: u8,
    /// `accuracy`.
    pub accuracy: u8,
    /// `tag` values.
    pub tags: Vec<String>,
}

impl AuditLog {
    /// Render the classic `--id-X--` layout.
    pub fn to_native(&self) -> String {
        let tx = &self.transaction;
        let boundary = &tx.id;
        let mut out = String::new();
        for c in self.parts.chars() {
            let _ = writeln!(out, "--{boundary}-{c}--");
            match AuditLogPart::from_letter(c) {
                Some(AuditLogPart::Header) => {
                    let _ = writeln!(
                        out,
                        "[{}] {} {} {} {} {}",
                        tx.timestamp, tx.id, tx.client_ip, tx.client_port, tx.host_ip, tx.host_port
                    );
                }
                Some(AuditLogPart::RequestHeaders) => {
                    if let Some(req) = &tx.request {
                        let _ = writeln!(out, "{}", req.line);
                        write_headers(&mut out, &req.headers);
                    }
                }
                Some(AuditLogPart::RequestBody | AuditLogPart::ReducedRequestBody) => {
                    if let Some(req) = &tx.request {
                        let _ = writeln!(out, "{}", req.body);
                    }
                }
                Some(AuditLogPart::UploadedFiles) => {
                    if let Some(req) = &tx.request {
                        for file in &req.files {
                            let _ = writeln!(out, "{} {}", file.name, file.size);
                        }
                    }
                }
                Some(AuditLogPart::ResponseHeaders) => {
                    if let Some(resp) = &tx.response {
                        let _ = writeln!(out, "{} {}", resp.protocol, resp.status);
                        write_headers(&mut out, &resp.headers);
                    }
                }
                Some(AuditLogPart::ResponseBody) => {
                    if let Some(resp) = &tx.response {
                        let _ = writeln!(out, "{}", resp.body);
                    }
                }
                Some(AuditLogPart::Trailer) => {
                    for msg in &self.messages {
                        let _ = writeln!(out, "Message: {}", msg.message);
                    }
                    if let Some(producer) = &tx.producer {
                        let _ = writeln!(out, "Stopwatch: {}", producer.stopwatch);
                        let _ = writeln!(out, "Producer: {}", producer.version);
                        let _ = writeln!(out, "Engine-Mode: \"{}\"", producer.rule_engine);
                    }
                }
                Some(AuditLogPart::RulesMatched) => {
                    for msg in &self.messages {
                        let _ = writeln!(out, "{} {}", msg.data.id, msg.data.msg);
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Render as a single JSON line.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::AuditLog {
            message: e.to_string(),
        })
    }

    /// Render in the requested format.
    pub fn format(&self, format: AuditLogFormat) -> Result<String> {
        match format {
            AuditLogFormat::Json => self.to_json().map(|mut s| {
                s.push('\n');
                s
            }),
            AuditLogFormat::Native => Ok(self.to_native()),
        }
    }
}

fn write_headers(out: &mut String, headers: &BTreeMap<String, Vec<String>>) {
    for (name, values) in headers {
        for value in values {
            let _ = writeln!(out, "{name}: {value}");
        }
    }
}

/// Destination for audit records.
pub trait AuditLogWriter: Send + Sync + fmt::Debug {
    /// Write one record.
    fn write(&self, log: &AuditLog) -> Result<()>;

    /// Flush and release resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn open_append(path: &Path, mode: u32) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path).map_err(|e| Error::AuditLog {
        message: format!("{}: {e}", path.display()),
    })
}

/// Appends every record to one file.
#[derive(Debug)]
pub struct SerialWriter {
    file: Mutex<File>,
    format: AuditLogFormat,
}

impl SerialWriter {
    /// Open (or create) the log file.
    pub fn open(path: &Path, format: AuditLogFormat, file_mode: u32) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(open_append(path, file_mode)?),
            format,
        })
    }
}

impl AuditLogWriter for SerialWriter {
    fn write(&self, log: &AuditLog) -> Result<()> {
        let record = log.format(self.format)?;
        let mut file = self.file.lock();
        file.write_all(record.as_bytes())?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.file.lock().flush()?;
        Ok(())
    }
}

/// Writes one file per transaction under `dir/YYYYMMDD/YYYYMMDD-HHMM/`.
///
/// When an index path is configured, one line per record pointing at the
/// file is appended to it.
#[derive(Debug)]
pub struct ConcurrentWriter {
    dir: PathBuf,
    format: AuditLogFormat,
    file_mode: u32,
    dir_mode: u32,
    index: Option<Mutex<File>>,
}

impl ConcurrentWriter {
    /// Create the writer; `index` is the `SecAuditLog` path.
    pub fn new(config: &AuditLogConfig, dir: &Path) -> Result<Self> {
        let index = match &config.path {
            Some(path) => Some(Mutex::new(open_append(path, config.file_mode)?)),
            None => None,
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            format: config.format,
            file_mode: config.file_mode,
            dir_mode: config.dir_mode,
            index,
        })
    }

    fn record_path(&self, log: &AuditLog) -> PathBuf {
        let now = chrono::Local::now();
        self.dir
            .join(now.format("%Y%m%d").to_string())
            .join(now.format("%Y%m%d-%H%M").to_string())
            .join(format!("{}-{}", now.format("%Y%m%d-%H%M%S"), log.transaction.id))
    }

    fn create_dirs(&self, dir: &Path) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.dir_mode);
        }
        builder.create(dir).map_err(|e| Error::AuditLog {
            message: format!("{}: {e}", dir.display()),
        })
    }
}

impl AuditLogWriter for ConcurrentWriter {
    fn write(&self, log: &AuditLog) -> Result<()> {
        let path = self.record_path(log);
        if let Some(parent) = path.parent() {
            self.create_dirs(parent)?;
        }
        let record = log.format(self.format)?;
        let mut file = open_append(&path, self.file_mode)?;
        file.write_all(record.as_bytes())?;

        if let Some(index) = &self.index {
            let tx = &log.transaction;
            let line = format!(
                "{} {} {} {}\n",
                tx.client_ip,
                tx.timestamp,
                tx.id,
                path.display()
            );
            index.lock().write_all(line.as_bytes())?;
        }
        Ok(())
    }
}

/// Keeps records in memory; useful for embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    logs: Mutex<Vec<AuditLog>>,
}

impl MemoryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written so far.
    pub fn logs(&self) -> Vec<AuditLog> {
        self.logs.lock().clone()
    }
}

impl AuditLogWriter for MemoryWriter {
    fn write(&self, log: &AuditLog) -> Result<()> {
        self.logs.lock().push(log.clone());
        Ok(())
    }
}

/// Build the writer described by the audit configuration.
///
/// Returns `None` when auditing is off or no destination is configured.
/// `https` delivery is left to the embedder, which supplies its own writer.
pub fn writer_from_config(config: &AuditLogConfig) -> Result<Option<Arc<dyn AuditLogWriter>>> {
    if config.engine == crate::config::AuditEngineMode::Off {
        return Ok(None);
    }
    match config.log_type {
        AuditLogType::Serial => match &config.path {
            Some(path) => Ok(Some(Arc::new(SerialWriter::open(
                path,
                config.format,
                config.file_mode,
            )?))),
            None => Ok(None),
        },
        AuditLogType::Concurrent => match &config.dir {
            Some(dir) => Ok(Some(Arc::new(ConcurrentWriter::new(config, dir)?))),
            None => Ok(None),
        },
        AuditLogType::Https => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditEngineMode;

    fn sample() -> AuditLog {
        AuditLog {
            parts: "ABHZ".to_string(),
            transaction: AuditTransaction {
                id: "abc123".to_string(),
                client_ip: "10.0.0.1".to_string(),
                client_port: 5555,
                request: Some(AuditRequest {
                    line: "GET /index.php HTTP/1.1".to_string(),
                    method: "GET".to_string(),
                    uri: "/index.php".to_string(),
                    http_version: "HTTP/1.1".to_string(),
                    headers: BTreeMap::from([("host".to_string(), vec!["example.com".to_string()])]),
                    ..Default::default()
                }),
                ..Default::default()
            },
            messages: vec![AuditMessage {
                actionset: "deny".to_string(),
                message: "ModSecurity: Access denied".to_string(),
                data: AuditMessageData {
                    id: 1,
                    msg: "bad".to_string(),
                    ..Default::default()
                },
            }],
        }
    }

    #[test]
    fn test_parts_parse_and_display() {
        let parts = AuditLogParts::parse("ZBA").unwrap();
        assert_eq!(parts.to_string(), "ABZ");
        assert!(parts.contains(AuditLogPart::RequestHeaders));
        assert!(AuditLogParts::parse("ABX").is_err());
    }

    #[test]
    fn test_parts_modifications() {
        let mut parts = AuditLogParts::default();
        parts.apply("+E").unwrap();
        assert_eq!(parts.to_string(), "ABCEFHZ");
        parts.apply("-BC").unwrap();
        assert_eq!(parts.to_string(), "AEFHZ");
        parts.apply("AZ").unwrap();
        assert_eq!(parts.to_string(), "AZ");
    }

    #[test]
    fn test_native_format() {
        let text = sample().to_native();
        assert!(text.contains("--abc123-A--"));
        assert!(text.contains("GET /index.php HTTP/1.1"));
        assert!(text.contains("host: example.com"));
        assert!(text.contains("Message: ModSecurity: Access denied"));
        assert!(text.ends_with("--abc123-Z--\n"));
    }

    #[test]
    fn test_json_round_trip() {
        let log = sample();
        let json = log.to_json().unwrap();
        let back: AuditLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
        assert!(!json.contains("\"response\""));
    }

    #[test]
    fn test_serial_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let writer = SerialWriter::open(&path, AuditLogFormat::Json, 0o600).unwrap();
        writer.write(&sample()).unwrap();
        writer.write(&sample()).unwrap();
        writer.close().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_concurrent_writer() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditLogConfig {
            engine: AuditEngineMode::On,
            log_type: AuditLogType::Concurrent,
            dir: Some(dir.path().to_path_buf()),
            path: Some(dir.path().join("index.log")),
            ..Default::default()
        };
        let writer = writer_from_config(&config).unwrap().unwrap();
        writer.write(&sample()).unwrap();
        let index = std::fs::read_to_string(dir.path().join("index.log")).unwrap();
        let record_path = index.split_whitespace().last().unwrap().to_string();
        let record = std::fs::read_to_string(record_path).unwrap();
        assert!(record.contains("--abc123-A--"));
    }

    #[test]
    fn test_writer_disabled() {
        let config = AuditLogConfig::default();
        assert!(writer_from_config(&config).unwrap().is_none());
    }
}
