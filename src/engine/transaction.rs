//! Per-request evaluation state.
//!
//! A [`Transaction`] is stepped through the five phases by its `process_*`
//! methods. It owns every transaction variable, both body buffers and the
//! interruption slot; the rules it evaluates are shared with the WAF.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local, Timelike};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, error, warn};

use super::interruption::Interruption;
use super::matched::MatchedRule;
use super::phase::Phase;
use super::rule::VariableTarget;
use super::ruleset::RuleFilter;
use super::WafInner;
use crate::actions::AllowType;
use crate::audit::{
    AuditFile, AuditLog, AuditLogPart, AuditProducer, AuditRequest, AuditResponse,
    AuditTransaction,
};
use crate::body::{
    parse_query, processor_for_content_type, BodyBuffer, BodyProcessor, BodyProcessorOptions,
    BodyTarget,
};
use crate::config::{AuditEngineMode, BodyLimitAction, RuleEngineMode, TransactionConfig};
use crate::error::Result;
use crate::macros::Macro;
use crate::operators::OperatorContext;
use crate::variables::{TransactionVariables, Variable};

const UNIQUE_ID_LEN: usize = 20;

/// Names masked in the audit record (lower-case).
#[derive(Debug, Default, Clone)]
pub(crate) struct Sanitise {
    pub(crate) args: Vec<String>,
    pub(crate) request_headers: Vec<String>,
    pub(crate) response_headers: Vec<String>,
}

/// One request/response exchange evaluated against a WAF.
///
/// Not thread-safe; each request handler owns its transaction.
pub struct Transaction {
    pub(crate) waf: Arc<WafInner>,
    pub(crate) id: String,
    pub(crate) config: TransactionConfig,
    pub(crate) vars: TransactionVariables,
    pub(crate) interruption: Option<Interruption>,
    pub(crate) allow: Option<AllowType>,
    pub(crate) skip: u32,
    pub(crate) skip_after: Option<String>,
    pub(crate) removed_rules: Vec<RuleFilter>,
    pub(crate) target_exceptions: Vec<(RuleFilter, VariableTarget)>,
    pub(crate) capturing: bool,
    pub(crate) matched_rules: Vec<MatchedRule>,
    pub(crate) highest_severity: u8,
    pub(crate) audit: bool,
    pub(crate) stopwatch: Vec<(Phase, Duration)>,
    pub(crate) sanitise: Sanitise,
    request_body: BodyBuffer,
    response_body: BodyBuffer,
    request_body_truncated: bool,
    response_body_truncated: bool,
    streamed_records: usize,
    client_port: u16,
    server_port: u16,
    started: Instant,
    timestamp: DateTime<Local>,
    last_phase: Option<Phase>,
    closed: bool,
}

fn unique_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(UNIQUE_ID_LEN)
        .map(char::from)
        .collect()
}

/// Replace the values of `names` in a `k=v&...` string with asterisks.
fn mask_query(query: &str, names: &[String]) -> String {
    if names.is_empty() {
        return query.to_string();
    }
    query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => {
                let (key, _) = crate::transformations::url_decode(k);
                if names.iter().any(|n| n.eq_ignore_ascii_case(&key)) {
                    format!("{k}={}", "*".repeat(v.len()))
                } else {
                    pair.to_string()
                }
            }
            None => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

impl Transaction {
    pub(crate) fn new(waf: Arc<WafInner>, id: Option<String>) -> Self {
        let started = Instant::now();
        let timestamp = Local::now();
        let id = id.filter(|id| !id.is_empty()).unwrap_or_else(unique_id);
        let mut vars = TransactionVariables::new(
            started,
            waf.store.clone(),
            waf.config.collection_timeout,
        );

        vars.set(Variable::UniqueId, id.clone());
        vars.set(Variable::HighestSeverity, "255");
        vars.set(Variable::Time, timestamp.format("%H:%M:%S").to_string());
        vars.set(Variable::TimeDay, timestamp.day().to_string());
        vars.set(Variable::TimeEpoch, timestamp.timestamp().to_string());
        vars.set(Variable::TimeHour, timestamp.hour().to_string());
        vars.set(Variable::TimeMin, timestamp.minute().to_string());
        vars.set(Variable::TimeMon, timestamp.month0().to_string());
        vars.set(Variable::TimeSec, timestamp.second().to_string());
        vars.set(
            Variable::TimeWday,
            timestamp.weekday().num_days_from_sunday().to_string(),
        );
        vars.set(Variable::TimeYear, timestamp.year().to_string());
        if !waf.config.web_app_id.is_empty() {
            vars.set(Variable::WebAppId, waf.config.web_app_id.clone());
        }

        let memory_limit = waf.config.request_body_in_memory_limit;
        let tmp_dir = waf.config.tmp_dir();
        debug!(tx_id = %id, "transaction started");
        Self {
            config: TransactionConfig::from(&waf.config),
            request_body: BodyBuffer::new(memory_limit, tmp_dir.clone()),
            response_body: BodyBuffer::new(memory_limit, tmp_dir),
            waf,
            id,
            vars,
            interruption: None,
            allow: None,
            skip: 0,
            skip_after: None,
            removed_rules: Vec::new(),
            target_exceptions: Vec::new(),
            capturing: false,
            matched_rules: Vec::new(),
            highest_severity: u8::MAX,
            audit: false,
            stopwatch: Vec::new(),
            sanitise: Sanitise::default(),
            request_body_truncated: false,
            response_body_truncated: false,
            streamed_records: 0,
            client_port: 0,
            server_port: 0,
            started,
            timestamp,
            last_phase: None,
            closed: false,
        }
    }

    /// Set the interruption unless one is already set or the engine only
    /// detects.
    pub(crate) fn interrupt(&mut self, interruption: Interruption) {
        if self.config.rule_engine != RuleEngineMode::On {
            debug!(tx_id = %self.id, rule_id = interruption.rule_id, "interruption suppressed by engine mode");
            return;
        }
        if self.interruption.is_none() {
            debug!(tx_id = %self.id, %interruption, "transaction interrupted");
            self.interruption = Some(interruption);
        }
    }

    /// Wall-clock seconds, used by persistent collections.
    pub(crate) fn now_epoch(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn enter_phase(&mut self, phase: Phase) -> bool {
        if self.closed {
            warn!(tx_id = %self.id, phase = phase.number(), "transaction already closed");
            return false;
        }
        if self.last_phase.is_some_and(|last| last >= phase) {
            warn!(tx_id = %self.id, phase = phase.number(), "phase already processed");
            return false;
        }
        self.last_phase = Some(phase);
        true
    }

    /// Record the connection endpoints.
    pub fn process_connection(
        &mut self,
        client_ip: &str,
        client_port: u16,
        server_ip: &str,
        server_port: u16,
    ) {
        self.client_port = client_port;
        self.server_port = server_port;
        self.vars.set(Variable::RemoteAddr, client_ip);
        self.vars.set(Variable::RemoteHost, client_ip);
        self.vars.set(Variable::RemotePort, client_port.to_string());
        self.vars.set(Variable::ServerAddr, server_ip);
        self.vars.set(Variable::ServerPort, server_port.to_string());
        self.vars.set(Variable::UniqueId, self.id.clone());
    }

    /// Record the request line and parse query arguments.
    pub fn process_uri(&mut self, uri: &str, method: &str, protocol: &str) {
        self.vars.set(Variable::RequestMethod, method);
        self.vars.set(Variable::RequestProtocol, protocol);
        self.vars.set(Variable::RequestUriRaw, uri);
        self.vars.set(Variable::RequestUri, uri);
        self.vars
            .set(Variable::RequestLine, format!("{method} {uri} {protocol}"));

        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };
        let path = match path.find("://") {
            Some(scheme_end) => {
                let rest = &path[scheme_end + 3..];
                rest.find('/').map_or("/", |i| &rest[i..])
            }
            None => path,
        };
        self.vars.set(Variable::RequestFilename, path);
        let basename = path.rsplit(['/', '\\']).next().unwrap_or(path);
        self.vars.set(Variable::RequestBasename, basename);

        if let Some(query) = query {
            self.vars.set(Variable::QueryString, query);
            let (pairs, invalid) = parse_query(query, '&');
            if invalid {
                self.vars.set(Variable::UrlencodedError, "1");
            }
            for (key, value) in pairs.into_iter().take(self.waf.config.arguments_limit) {
                self.vars.add(Variable::ArgsGet, &key, value);
            }
        }
    }

    /// Add a request header.
    pub fn add_request_header(&mut self, name: &str, value: &str) {
        if name.is_empty() {
            return;
        }
        self.vars.add(Variable::RequestHeaders, name, value);
        match name.to_ascii_lowercase().as_str() {
            "content-type" => {
                if let Some(processor) = processor_for_content_type(value) {
                    self.vars.set(Variable::ReqbodyProcessor, processor);
                }
            }
            "host" => {
                let host = if value.starts_with('[') {
                    value.split_inclusive(']').next().unwrap_or(value)
                } else {
                    value.split(':').next().unwrap_or(value)
                };
                self.vars.set(Variable::ServerName, host.trim());
            }
            "cookie" => {
                for pair in value.split(';') {
                    let pair = pair.trim();
                    if pair.is_empty() {
                        continue;
                    }
                    let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                    self.vars.add(Variable::RequestCookies, k.trim(), v.trim());
                }
            }
            _ => {}
        }
    }

    /// Run phase 1.
    pub fn process_request_headers(&mut self) -> Option<Interruption> {
        if self.enter_phase(Phase::RequestHeaders) {
            self.eval_phase(Phase::RequestHeaders);
        }
        self.interruption.clone()
    }

    /// Buffer request body bytes.
    ///
    /// Returns the interruption caused by the body limit, if any, and how
    /// many bytes were accepted.
    pub fn write_request_body(&mut self, data: &[u8]) -> Result<(Option<Interruption>, usize)> {
        if !self.config.request_body_access || data.is_empty() {
            return Ok((None, 0));
        }
        if self.interruption.is_some() {
            return Ok((self.interruption.clone(), 0));
        }
        if self.request_body_truncated {
            return Ok((None, 0));
        }
        let limit = self.config.request_body_limit;
        let current = self.request_body.len();
        if current + data.len() > limit {
            self.vars.set(Variable::InboundDataError, "1");
            match self.config.request_body_limit_action {
                BodyLimitAction::Reject => {
                    debug!(tx_id = %self.id, limit, "request body limit exceeded");
                    self.interruption = Some(Interruption::deny(403));
                    return Ok((self.interruption.clone(), 0));
                }
                BodyLimitAction::ProcessPartial => {
                    self.request_body_truncated = true;
                    let written = self.request_body.write(&data[..limit - current])?;
                    return Ok((None, written));
                }
            }
        }
        let written = self.request_body.write(data)?;
        Ok((None, written))
    }

    fn processor_options(&self, content_type: String) -> BodyProcessorOptions {
        let config = &self.waf.config;
        BodyProcessorOptions {
            content_type,
            tmp_dir: config.tmp_dir(),
            upload_dir: config.upload_dir(),
            keep_files: config.upload_keep_files,
            upload_file_mode: config.upload_file_mode,
            upload_file_limit: config.upload_file_limit,
            json_depth_limit: config.request_body_json_depth_limit,
            arguments_limit: config.arguments_limit,
        }
    }

    fn body_text(body: &mut BodyBuffer) -> Result<String> {
        Ok(String::from_utf8_lossy(&body.to_vec()?).into_owned())
    }

    fn full_request(&self, body: &str) -> String {
        let mut out = self.vars.get(Variable::RequestLine).to_string();
        out.push_str("\r\n");
        if let Some(headers) = self.vars.map(Variable::RequestHeaders) {
            for entry in headers.entries() {
                out.push_str(&entry.key);
                out.push_str(": ");
                out.push_str(&entry.value);
                out.push_str("\r\n");
            }
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    /// Parse the buffered request body and run phase 2.
    ///
    /// Processor failures do not fail the call; they set `REQBODY_ERROR`
    /// so rules can act on them.
    pub fn process_request_body(&mut self) -> Result<Option<Interruption>> {
        if !self.enter_phase(Phase::RequestBody) {
            return Ok(self.interruption.clone());
        }
        if self.interruption.is_some() {
            return Ok(self.interruption.clone());
        }

        let mut body = std::mem::take(&mut self.request_body);
        let text = Self::body_text(&mut body)?;
        self.vars
            .set(Variable::RequestBodyLength, body.len().to_string());
        let full_request = self.full_request(&text);
        self.vars
            .set(Variable::FullRequestLength, full_request.len().to_string());
        self.vars.set(Variable::FullRequest, full_request);

        let mut streaming = false;
        if self.config.request_body_access {
            self.vars.set(Variable::RequestBody, text);
            let name = self
                .config
                .request_body_processor
                .clone()
                .or_else(|| {
                    Some(self.vars.get(Variable::ReqbodyProcessor).to_string())
                        .filter(|p| !p.is_empty())
                })
                .or_else(|| {
                    self.config
                        .force_request_body_variable
                        .then(|| "URLENCODED".to_string())
                });
            if let Some(processor) = name.and_then(|n| self.waf.body_processors.get(&n)) {
                streaming = processor.is_streaming();
                self.streamed_records = 0;
                self.run_request_processor(processor.as_ref(), &mut body)?;
            }
        }
        self.request_body = body;

        if !streaming || self.streamed_records == 0 {
            self.eval_phase(Phase::RequestBody);
        }
        Ok(self.interruption.clone())
    }

    fn run_request_processor(&mut self, processor: &dyn BodyProcessor, body: &mut BodyBuffer) -> Result<()> {
        let content_type = self
            .vars
            .first(Variable::RequestHeaders, "content-type")
            .unwrap_or("")
            .to_string();
        let options = self.processor_options(content_type);
        self.vars.set(Variable::ReqbodyProcessor, processor.name());
        debug!(tx_id = %self.id, processor = processor.name(), "processing request body");
        let mut reader = body.reader()?;
        if let Err(e) = processor.process_request(&mut reader, self, &options) {
            warn!(tx_id = %self.id, error = %e, "request body processor failed");
            let message = e.to_string();
            self.vars.set(Variable::ReqbodyError, "1");
            self.vars.set(Variable::ReqbodyErrorMsg, message.clone());
            self.vars.set(Variable::ReqbodyProcessorError, "1");
            self.vars.set(Variable::ReqbodyProcessorErrorMsg, message);
        }
        Ok(())
    }

    /// Add a response header.
    pub fn add_response_header(&mut self, name: &str, value: &str) {
        if name.is_empty() {
            return;
        }
        self.vars.add(Variable::ResponseHeaders, name, value);
        match name.to_ascii_lowercase().as_str() {
            "content-type" => self.vars.set(Variable::ResponseContentType, mime_type(value)),
            "content-length" => self.vars.set(Variable::ResponseContentLength, value.trim()),
            _ => {}
        }
    }

    /// Record the response status and run phase 3.
    pub fn process_response_headers(&mut self, status: u16, protocol: &str) -> Option<Interruption> {
        self.vars.set(Variable::ResponseStatus, status.to_string());
        self.vars.set(Variable::ResponseProtocol, protocol);
        self.vars
            .set(Variable::StatusLine, format!("{protocol} {status}"));
        if self.enter_phase(Phase::ResponseHeaders) {
            self.eval_phase(Phase::ResponseHeaders);
        }
        self.interruption.clone()
    }

    /// Whether the response body will be inspected.
    pub fn is_response_body_processable(&self) -> bool {
        if !self.config.response_body_access {
            return false;
        }
        let content_type = self.vars.get(Variable::ResponseContentType);
        self.waf
            .config
            .response_body_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(content_type))
    }

    /// Buffer response body bytes.
    pub fn write_response_body(&mut self, data: &[u8]) -> Result<(Option<Interruption>, usize)> {
        if !self.config.response_body_access || data.is_empty() {
            return Ok((None, 0));
        }
        if self.interruption.is_some() {
            return Ok((self.interruption.clone(), 0));
        }
        if self.response_body_truncated {
            return Ok((None, 0));
        }
        let limit = self.config.response_body_limit;
        let current = self.response_body.len();
        if current + data.len() > limit {
            self.vars.set(Variable::OutboundDataError, "1");
            match self.config.response_body_limit_action {
                BodyLimitAction::Reject => {
                    debug!(tx_id = %self.id, limit, "response body limit exceeded");
                    self.interruption = Some(Interruption::deny(403));
                    return Ok((self.interruption.clone(), 0));
                }
                BodyLimitAction::ProcessPartial => {
                    self.response_body_truncated = true;
                    let written = self.response_body.write(&data[..limit - current])?;
                    return Ok((None, written));
                }
            }
        }
        let written = self.response_body.write(data)?;
        Ok((None, written))
    }

    /// Parse the buffered response body and run phase 4.
    pub fn process_response_body(&mut self) -> Result<Option<Interruption>> {
        if !self.enter_phase(Phase::ResponseBody) {
            return Ok(self.interruption.clone());
        }
        if self.interruption.is_some() {
            return Ok(self.interruption.clone());
        }

        let mut streaming = false;
        if self.is_response_body_processable() {
            let mut body = std::mem::take(&mut self.response_body);
            let text = Self::body_text(&mut body)?;
            if self.vars.get(Variable::ResponseContentLength).is_empty() {
                self.vars
                    .set(Variable::ResponseContentLength, body.len().to_string());
            }
            self.vars.set(Variable::ResponseBody, text);

            let processor = self
                .config
                .response_body_processor
                .clone()
                .and_then(|n| self.waf.body_processors.get(&n));
            if let Some(processor) = processor {
                streaming = processor.is_streaming();
                self.streamed_records = 0;
                let content_type = self.vars.get(Variable::ResponseContentType).to_string();
                let options = self.processor_options(content_type);
                let mut reader = body.reader()?;
                if let Err(e) = processor.process_response(&mut reader, self, &options) {
                    warn!(tx_id = %self.id, error = %e, "response body processor failed");
                    let message = e.to_string();
                    self.vars.set(Variable::ResbodyError, "1");
                    self.vars.set(Variable::ResbodyErrorMsg, message.clone());
                    self.vars.set(Variable::ResbodyProcessorError, "1");
                    self.vars.set(Variable::ResbodyProcessorErrorMsg, message);
                }
                drop(reader);
            }
            self.response_body = body;
        }

        if !streaming || self.streamed_records == 0 {
            self.eval_phase(Phase::ResponseBody);
        }
        Ok(self.interruption.clone())
    }

    /// Run phase 5 and write the audit record.
    ///
    /// Phase 5 runs even after an interruption.
    pub fn process_logging(&mut self) {
        if !self.enter_phase(Phase::Logging) {
            return;
        }
        self.eval_phase(Phase::Logging);

        let Some(writer) = self.waf.audit_writer.clone() else {
            return;
        };
        match self.config.audit_engine {
            AuditEngineMode::Off => return,
            AuditEngineMode::RelevantOnly => {
                let status = self.vars.get(Variable::ResponseStatus);
                let relevant_status = self
                    .waf
                    .config
                    .audit_log
                    .relevant_status
                    .as_ref()
                    .is_some_and(|re| re.is_match(status));
                if !self.audit && !relevant_status {
                    debug!(tx_id = %self.id, "transaction not relevant for audit");
                    return;
                }
            }
            AuditEngineMode::On => {}
        }
        let log = self.audit_log();
        if let Err(e) = writer.write(&log) {
            error!(tx_id = %self.id, error = %e, "cannot write audit log");
        }
    }

    fn masked_headers(&self, variable: Variable, masked: &[String]) -> std::collections::BTreeMap<String, Vec<String>> {
        let mut headers = std::collections::BTreeMap::new();
        if let Some(map) = self.vars.map(variable) {
            for entry in map.entries() {
                let value = if masked.iter().any(|m| m.eq_ignore_ascii_case(&entry.key)) {
                    "*".repeat(entry.value.len())
                } else {
                    entry.value.clone()
                };
                headers
                    .entry(entry.key.clone())
                    .or_insert_with(Vec::new)
                    .push(value);
            }
        }
        headers
    }

    /// Assemble the audit record for the configured parts.
    ///
    /// Sanitised arguments and headers are masked.
    pub fn audit_log(&self) -> AuditLog {
        let parts = &self.config.audit_log_parts;
        let has = |p| parts.contains(p);
        let vars = &self.vars;

        let uri = vars.get(Variable::RequestUri);
        let uri = match uri.split_once('?') {
            Some((path, query)) => format!("{path}?{}", mask_query(query, &self.sanitise.args)),
            None => uri.to_string(),
        };
        let method = vars.get(Variable::RequestMethod).to_string();
        let protocol = vars.get(Variable::RequestProtocol).to_string();

        let request = (has(AuditLogPart::RequestHeaders)
            || has(AuditLogPart::RequestBody)
            || has(AuditLogPart::ReducedRequestBody)
            || has(AuditLogPart::UploadedFiles))
        .then(|| {
            let body = if has(AuditLogPart::RequestBody) || has(AuditLogPart::ReducedRequestBody) {
                let body = vars.get(Variable::RequestBody);
                if vars.get(Variable::ReqbodyProcessor) == "URLENCODED" {
                    mask_query(body, &self.sanitise.args)
                } else {
                    body.to_string()
                }
            } else {
                String::new()
            };
            let files = if has(AuditLogPart::UploadedFiles) {
                vars.map(Variable::Files)
                    .into_iter()
                    .flat_map(|m| m.entries())
                    .map(|entry| AuditFile {
                        name: entry.value.clone(),
                        size: vars
                            .first(Variable::FilesSizes, &entry.key)
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0),
                    })
                    .collect()
            } else {
                Vec::new()
            };
            AuditRequest {
                line: format!("{method} {uri} {protocol}"),
                method: method.clone(),
                uri: uri.clone(),
                http_version: protocol.clone(),
                headers: if has(AuditLogPart::RequestHeaders) {
                    self.masked_headers(Variable::RequestHeaders, &self.sanitise.request_headers)
                } else {
                    Default::default()
                },
                body,
                files,
            }
        });

        let response = (has(AuditLogPart::ResponseHeaders) || has(AuditLogPart::ResponseBody)).then(|| {
            AuditResponse {
                protocol: vars.get(Variable::ResponseProtocol).to_string(),
                status: vars.get(Variable::ResponseStatus).parse().unwrap_or(0),
                headers: if has(AuditLogPart::ResponseHeaders) {
                    self.masked_headers(Variable::ResponseHeaders, &self.sanitise.response_headers)
                } else {
                    Default::default()
                },
                body: if has(AuditLogPart::ResponseBody) {
                    vars.get(Variable::ResponseBody).to_string()
                } else {
                    String::new()
                },
            }
        });

        let producer = has(AuditLogPart::Trailer).then(|| AuditProducer {
            connector: String::new(),
            version: concat!("zentinel-seclang/", env!("CARGO_PKG_VERSION")).to_string(),
            server: self.waf.config.server_signature.clone().unwrap_or_default(),
            rule_engine: self.config.rule_engine.to_string(),
            stopwatch: self.stopwatch_line(),
            rulesets: self.waf.config.component_signatures.clone(),
        });

        let messages = if has(AuditLogPart::Trailer) || has(AuditLogPart::RulesMatched) {
            self.matched_rules
                .iter()
                .filter(|m| m.audit_log)
                .map(MatchedRule::audit_message)
                .collect()
        } else {
            Vec::new()
        };

        AuditLog {
            parts: parts.to_string(),
            transaction: AuditTransaction {
                timestamp: self.timestamp.to_rfc3339(),
                unix_timestamp: self.timestamp.timestamp_nanos_opt().unwrap_or(0),
                id: self.id.clone(),
                client_ip: vars.get(Variable::RemoteAddr).to_string(),
                client_port: self.client_port,
                host_ip: vars.get(Variable::ServerAddr).to_string(),
                host_port: self.server_port,
                server_id: self.waf.config.sensor_id.clone(),
                request,
                response,
                producer,
            },
            messages,
        }
    }

    fn stopwatch_line(&self) -> String {
        let total = self.started.elapsed().as_micros();
        let mut line = format!("{} {total};", self.timestamp.timestamp_micros());
        for (phase, elapsed) in &self.stopwatch {
            line.push_str(&format!(" p{}={}", phase.number(), elapsed.as_micros()));
        }
        line
    }

    /// Current interruption, if any.
    pub fn interruption(&self) -> Option<&Interruption> {
        self.interruption.as_ref()
    }

    /// Whether a disruptive action interrupted the transaction.
    pub fn is_interrupted(&self) -> bool {
        self.interruption.is_some()
    }

    /// Rules that matched so far, in evaluation order.
    pub fn matched_rules(&self) -> &[MatchedRule] {
        &self.matched_rules
    }

    /// Transaction variables.
    pub fn variables(&self) -> &TransactionVariables {
        &self.vars
    }

    /// Transaction variables, for embedders that fill their own.
    pub fn variables_mut(&mut self) -> &mut TransactionVariables {
        &mut self.vars
    }

    /// Unique transaction id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Per-transaction configuration, including `ctl` changes.
    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Time spent in each evaluated phase.
    pub fn stopwatch(&self) -> &[(Phase, Duration)] {
        &self.stopwatch
    }

    /// Release the body buffers and their temporary files.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.request_body.reset();
        self.response_body.reset();
        self.closed = true;
        debug!(
            tx_id = %self.id,
            matched = self.matched_rules.len(),
            interrupted = self.interruption.is_some(),
            "transaction closed"
        );
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("last_phase", &self.last_phase)
            .field("interruption", &self.interruption)
            .field("matched_rules", &self.matched_rules.len())
            .finish()
    }
}

impl OperatorContext for Transaction {
    fn capturing(&self) -> bool {
        self.capturing
    }

    fn capture_field(&mut self, index: usize, value: &str) {
        if self.capturing && index < 10 {
            self.vars
                .set_index(Variable::Tx, &index.to_string(), 0, value);
        }
    }

    fn expand(&self, template: &Macro) -> String {
        template.expand(&self.vars)
    }

    fn add_path_argument(&mut self, key: &str, value: &str) {
        self.vars.set_index(Variable::ArgsPath, key, 0, value);
    }
}

impl BodyTarget for Transaction {
    fn vars(&mut self) -> &mut TransactionVariables {
        &mut self.vars
    }

    fn record_done(&mut self) -> bool {
        self.streamed_records += 1;
        let phase = self.last_phase.unwrap_or(Phase::RequestBody);
        self.eval_phase(phase);
        self.interruption.is_none()
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::MemoryWriter;
    use crate::engine::{InterruptionAction, Waf};
    use crate::variables::Variable;
    use std::sync::Arc;

    #[test]
    fn test_uri_variables() {
        let waf = Waf::from_string("SecRuleEngine On").unwrap();
        let mut tx = waf.new_transaction();
        tx.process_uri("/a/b/login.php?user=x&pass=%27y", "POST", "HTTP/1.1");
        let vars = tx.variables();
        assert_eq!(vars.get(Variable::RequestFilename), "/a/b/login.php");
        assert_eq!(vars.get(Variable::RequestBasename), "login.php");
        assert_eq!(vars.get(Variable::QueryString), "user=x&pass=%27y");
        assert_eq!(vars.get(Variable::RequestLine), "POST /a/b/login.php?user=x&pass=%27y HTTP/1.1");
        assert_eq!(vars.first(Variable::ArgsGet, "pass"), Some("'y"));
    }

    #[test]
    fn test_request_headers_side_effects() {
        let waf = Waf::from_string("").unwrap();
        let mut tx = waf.new_transaction();
        tx.add_request_header("Host", "example.com:8080");
        tx.add_request_header("Cookie", "sid=abc; theme=dark");
        tx.add_request_header("Content-Type", "application/x-www-form-urlencoded");
        let vars = tx.variables();
        assert_eq!(vars.get(Variable::ServerName), "example.com");
        assert_eq!(vars.first(Variable::RequestCookies, "theme"), Some("dark"));
        assert_eq!(vars.get(Variable::ReqbodyProcessor), "URLENCODED");
        assert_eq!(vars.first(Variable::RequestHeaders, "HOST"), Some("example.com:8080"));
    }

    #[test]
    fn test_unique_id_and_time() {
        let waf = Waf::from_string("").unwrap();
        let tx = waf.new_transaction();
        assert_eq!(tx.id().len(), 20);
        assert_eq!(tx.variables().get(Variable::UniqueId), tx.id());
        assert_eq!(tx.variables().get(Variable::HighestSeverity), "255");
        assert!(!tx.variables().get(Variable::TimeEpoch).is_empty());
        let tx = waf.new_transaction_with_id("fixed-id");
        assert_eq!(tx.id(), "fixed-id");
    }

    #[test]
    fn test_body_limit_reject() {
        let waf = Waf::from_string(
            "SecRequestBodyAccess On\nSecRequestBodyLimit 11\nSecRequestBodyLimitAction Reject",
        )
        .unwrap();
        let mut tx = waf.new_transaction();
        let (it, written) = tx.write_request_body(b"123456789012").unwrap();
        let it = it.unwrap();
        assert_eq!(it.status, 403);
        assert_eq!(it.action, InterruptionAction::Deny);
        assert_eq!(written, 0);
        assert_eq!(tx.variables().get(Variable::InboundDataError), "1");
    }

    #[test]
    fn test_body_limit_partial() {
        let waf = Waf::from_string(
            "SecRequestBodyAccess On\nSecRequestBodyLimit 5\nSecRequestBodyLimitAction ProcessPartial",
        )
        .unwrap();
        let mut tx = waf.new_transaction();
        assert_eq!(tx.write_request_body(b"abc").unwrap(), (None, 3));
        assert_eq!(tx.write_request_body(b"defg").unwrap(), (None, 2));
        assert_eq!(tx.write_request_body(b"h").unwrap(), (None, 0));
        tx.process_request_body().unwrap();
        assert_eq!(tx.variables().get(Variable::RequestBody), "abcde");
        assert_eq!(tx.variables().get(Variable::InboundDataError), "1");
    }

    #[test]
    fn test_body_ignored_without_access() {
        let waf = Waf::from_string("SecRequestBodyAccess Off").unwrap();
        let mut tx = waf.new_transaction();
        assert_eq!(tx.write_request_body(b"a=1").unwrap(), (None, 0));
    }

    #[test]
    fn test_urlencoded_body() {
        let waf = Waf::from_string(
            r#"
            SecRuleEngine On
            SecRequestBodyAccess On
            SecRule ARGS_POST:pass "@streq secret" "id:10,phase:2,deny,status:401"
        "#,
        )
        .unwrap();
        let mut tx = waf.new_transaction();
        tx.process_uri("/login", "POST", "HTTP/1.1");
        tx.add_request_header("Content-Type", "application/x-www-form-urlencoded");
        tx.process_request_headers();
        tx.write_request_body(b"user=a&pass=secret").unwrap();
        let it = tx.process_request_body().unwrap().unwrap();
        assert_eq!(it.status, 401);
        assert_eq!(tx.variables().get(Variable::RequestBodyLength), "18");
        assert!(tx.variables().get(Variable::FullRequest).ends_with("user=a&pass=secret"));
    }

    #[test]
    fn test_processor_error_sets_reqbody_error() {
        let waf = Waf::from_string(
            r#"
            SecRuleEngine On
            SecRequestBodyAccess On
            SecRule REQUEST_HEADERS:Content-Type "application/json" "id:1,phase:1,pass,nolog,ctl:requestBodyProcessor=JSON"
            SecRule REQBODY_ERROR "!@eq 0" "id:2,phase:2,deny,status:400"
        "#,
        )
        .unwrap();
        let mut tx = waf.new_transaction();
        tx.add_request_header("Content-Type", "application/json");
        tx.process_request_headers();
        tx.write_request_body(b"{broken").unwrap();
        let it = tx.process_request_body().unwrap().unwrap();
        assert_eq!(it.rule_id, 2);
        assert!(!tx.variables().get(Variable::ReqbodyErrorMsg).is_empty());
    }

    #[test]
    fn test_response_body_processable() {
        let waf = Waf::from_string("SecResponseBodyAccess On\nSecResponseBodyMimeType text/html").unwrap();
        let mut tx = waf.new_transaction();
        tx.add_response_header("Content-Type", "text/html; charset=utf-8");
        assert!(tx.is_response_body_processable());
        let mut tx = waf.new_transaction();
        tx.add_response_header("Content-Type", "application/octet-stream");
        assert!(!tx.is_response_body_processable());
    }

    #[test]
    fn test_response_body_rule() {
        let waf = Waf::from_string(
            r#"
            SecRuleEngine On
            SecResponseBodyAccess On
            SecRule RESPONSE_BODY "@contains stack trace" "id:50,phase:4,deny,status:500"
        "#,
        )
        .unwrap();
        let mut tx = waf.new_transaction();
        tx.process_request_headers();
        tx.process_request_body().unwrap();
        tx.add_response_header("Content-Type", "text/html");
        tx.process_response_headers(200, "HTTP/1.1");
        tx.write_response_body(b"<html>stack trace</html>").unwrap();
        let it = tx.process_response_body().unwrap().unwrap();
        assert_eq!(it.rule_id, 50);
        assert_eq!(tx.variables().get(Variable::ResponseContentLength), "24");
    }

    #[test]
    fn test_audit_log_masks_sanitised_values() {
        let writer = Arc::new(MemoryWriter::new());
        let waf = Waf::builder()
            .directives(
                r#"
                SecRuleEngine On
                SecAuditEngine RelevantOnly
                SecAuditLogParts ABFHZ
                SecRule ARGS:password "@rx ." "id:7,phase:1,pass,log,sanitiseArg:password,sanitiseRequestHeader:Authorization"
            "#,
            )
            .audit_writer(writer.clone())
            .build()
            .unwrap();
        let mut tx = waf.new_transaction();
        tx.process_connection("10.0.0.1", 4000, "10.0.0.2", 80);
        tx.process_uri("/login?user=bob&password=hunter2", "GET", "HTTP/1.1");
        tx.add_request_header("Authorization", "Basic abc");
        tx.process_request_headers();
        tx.process_request_body().unwrap();
        tx.process_response_headers(200, "HTTP/1.1");
        tx.process_logging();

        let logs = writer.logs();
        assert_eq!(logs.len(), 1);
        let request = logs[0].transaction.request.as_ref().unwrap();
        assert_eq!(request.uri, "/login?user=bob&password=*******");
        assert_eq!(request.headers["Authorization"], vec!["*********".to_string()]);
        assert_eq!(logs[0].messages.len(), 1);
        assert_eq!(logs[0].transaction.client_port, 4000);
    }

    #[test]
    fn test_relevant_only_skips_clean_transactions() {
        let writer = Arc::new(MemoryWriter::new());
        let waf = Waf::builder()
            .directives("SecRuleEngine On\nSecAuditEngine RelevantOnly\nSecAuditLogRelevantStatus \"^5\"")
            .audit_writer(writer.clone())
            .build()
            .unwrap();
        let mut tx = waf.new_transaction();
        tx.process_response_headers(200, "HTTP/1.1");
        tx.process_logging();
        assert!(writer.logs().is_empty());

        let mut tx = waf.new_transaction();
        tx.process_response_headers(503, "HTTP/1.1");
        tx.process_logging();
        assert_eq!(writer.logs().len(), 1);
    }

    #[test]
    fn test_stream_record_count_is_per_direction() {
        let waf = Waf::from_string(
            r#"
            SecRuleEngine On
            SecRequestBodyAccess On
            SecResponseBodyAccess On
            SecResponseBodyMimeType application/x-ndjson
            SecAction "id:1,phase:1,pass,nolog,ctl:requestBodyProcessor=JSONSTREAM"
            SecAction "id:2,phase:2,pass,log"
            SecAction "id:3,phase:3,pass,nolog,ctl:responseBodyProcessor=JSONSTREAM"
            SecAction "id:4,phase:4,pass,log"
            "#,
        )
        .unwrap();
        let mut tx = waf.new_transaction();
        tx.process_uri("/ingest", "POST", "HTTP/1.1");
        tx.process_request_headers();
        tx.write_request_body(b"{\"a\":1}\n").unwrap();
        tx.process_request_body().unwrap();
        tx.add_response_header("Content-Type", "application/x-ndjson");
        tx.process_response_headers(200, "HTTP/1.1");
        tx.process_response_body().unwrap();
        let ids: Vec<i32> = tx.matched_rules().iter().map(|m| m.rule_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_phase_runs_once() {
        let waf = Waf::from_string(r#"SecAction "id:1,phase:1,pass,setvar:tx.n=+1""#).unwrap();
        let mut tx = waf.new_transaction();
        tx.process_request_headers();
        tx.process_request_headers();
        assert_eq!(tx.variables().first(Variable::Tx, "n"), Some("1"));
    }
}
