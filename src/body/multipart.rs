//! `multipart/form-data` bodies.
//!
//! The body is read line by line so file parts never need to be held in
//! memory. Anomalies do not abort parsing; each one raises its
//! `MULTIPART_*` flag and `MULTIPART_STRICT_ERROR`.

use super::{BodyProcessor, BodyProcessorOptions, BodyTarget};
use crate::error::{Error, Result};
use crate::variables::{TransactionVariables, Variable};
use std::io::{BufRead, BufReader, Read, Write};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    parse_boundary(content_type).map(|b| b.value)
}

struct Boundary {
    value: String,
    quoted: bool,
    whitespace: bool,
}

fn parse_boundary(content_type: &str) -> Option<Boundary> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }
        let whitespace = value.starts_with(char::is_whitespace) || value.ends_with(char::is_whitespace);
        let value = value.trim();
        let (value, quoted) = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
            Some(inner) => (inner, true),
            None => (value, false),
        };
        if value.is_empty() {
            return None;
        }
        return Some(Boundary {
            value: value.to_string(),
            quoted,
            whitespace: whitespace || value.contains(char::is_whitespace),
        });
    }
    None
}

#[derive(Debug, Default)]
struct Flags {
    boundary_quoted: bool,
    boundary_whitespace: bool,
    crlf_lines: bool,
    lf_lines: bool,
    data_after: bool,
    data_before: bool,
    file_limit_exceeded: bool,
    header_folding: bool,
    invalid_header_folding: bool,
    invalid_part: bool,
    invalid_quoting: bool,
    missing_semicolon: bool,
    unmatched_boundary: bool,
}

impl Flags {
    fn store(&self, vars: &mut TransactionVariables) {
        let flags = [
            (Variable::MultipartBoundaryQuoted, self.boundary_quoted),
            (Variable::MultipartBoundaryWhitespace, self.boundary_whitespace),
            (Variable::MultipartCrlfLfLines, self.crlf_lines && self.lf_lines),
            (Variable::MultipartLfLine, self.lf_lines),
            (Variable::MultipartDataAfter, self.data_after),
            (Variable::MultipartDataBefore, self.data_before),
            (Variable::MultipartFileLimitExceeded, self.file_limit_exceeded),
            (Variable::MultipartHeaderFolding, self.header_folding),
            (Variable::MultipartInvalidHeaderFolding, self.invalid_header_folding),
            (Variable::MultipartInvalidPart, self.invalid_part),
            (Variable::MultipartInvalidQuoting, self.invalid_quoting),
            (Variable::MultipartMissingSemicolon, self.missing_semicolon),
            (Variable::MultipartUnmatchedBoundary, self.unmatched_boundary),
        ];
        let mut strict = false;
        for (variable, raised) in flags {
            strict |= raised;
            vars.set(variable, if raised { "1" } else { "0" });
        }
        vars.set(Variable::MultipartStrictError, if strict { "1" } else { "0" });
    }
}

#[derive(Debug, Default)]
struct Disposition {
    name: Option<String>,
    filename: Option<String>,
}

/// Parse a `Content-Disposition` value, raising quoting flags.
fn parse_disposition(value: &str, flags: &mut Flags) -> Disposition {
    let mut disposition = Disposition::default();
    let value = value.trim();
    let Some(rest) = value
        .get(..9)
        .filter(|head| head.eq_ignore_ascii_case("form-data"))
        .map(|_| &value[9..])
    else {
        flags.invalid_part = true;
        return disposition;
    };
    let rest = rest.trim_start();
    if rest.is_empty() {
        flags.invalid_part = true;
        return disposition;
    }
    let Some(mut rest) = rest.strip_prefix(';') else {
        flags.missing_semicolon = true;
        return disposition;
    };

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let Some((key, after)) = rest.split_once('=') else {
            flags.invalid_part = true;
            break;
        };
        let key = key.trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (param, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            match read_quoted(quoted) {
                Some((param, remainder)) => (param, remainder),
                None => {
                    flags.invalid_quoting = true;
                    break;
                }
            }
        } else {
            if after.starts_with('\'') {
                flags.invalid_quoting = true;
            }
            let end = after.find(';').unwrap_or(after.len());
            (after[..end].trim_end().to_string(), &after[end..])
        };
        match key.as_str() {
            "name" => disposition.name = Some(param),
            "filename" => disposition.filename = Some(param),
            _ => {}
        }
        let remainder = remainder.trim_start();
        if remainder.is_empty() {
            break;
        }
        match remainder.strip_prefix(';') {
            Some(next) => rest = next,
            None => {
                flags.missing_semicolon = true;
                break;
            }
        }
    }
    disposition
}

/// Read a quoted string body; returns the unescaped value and what follows
/// the closing quote.
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                out.push(escaped);
            }
            '"' => return Some((out, &input[i + 1..])),
            c => out.push(c),
        }
    }
    None
}

enum PartBody {
    Text(Vec<u8>),
    Discard,
    File {
        file: Option<NamedTempFile>,
        size: usize,
    },
}

struct Part {
    name: String,
    filename: Option<String>,
    headers: Vec<String>,
    body: PartBody,
}

#[derive(PartialEq)]
enum State {
    Preamble,
    Headers,
    Content,
    Epilogue,
}

struct Parser<'a> {
    options: &'a BodyProcessorOptions,
    delimiter: Vec<u8>,
    flags: Flags,
    state: State,
    headers: Vec<String>,
    part: Option<Part>,
    pending_eol: &'static [u8],
    files: usize,
    combined_size: usize,
    arguments: usize,
}

impl<'a> Parser<'a> {
    fn new(boundary: &Boundary, options: &'a BodyProcessorOptions) -> Self {
        let mut delimiter = b"--".to_vec();
        delimiter.extend_from_slice(boundary.value.as_bytes());
        Self {
            options,
            delimiter,
            flags: Flags {
                boundary_quoted: boundary.quoted,
                boundary_whitespace: boundary.whitespace,
                ..Flags::default()
            },
            state: State::Preamble,
            headers: Vec::new(),
            part: None,
            pending_eol: b"",
            files: 0,
            combined_size: 0,
            arguments: 0,
        }
    }

    fn line(&mut self, raw: &[u8], vars: &mut TransactionVariables) -> Result<()> {
        let (content, eol): (&[u8], &'static [u8]) = if let Some(c) = raw.strip_suffix(b"\r\n") {
            self.flags.crlf_lines = true;
            (c, b"\r\n")
        } else if let Some(c) = raw.strip_suffix(b"\n") {
            self.flags.lf_lines = true;
            (c, b"\n")
        } else {
            (raw, b"")
        };

        if let Some(after) = content.strip_prefix(self.delimiter.as_slice()) {
            let after = trim_trailing_whitespace(after);
            if after.is_empty() {
                self.finish_part(vars)?;
                self.state = State::Headers;
                self.headers.clear();
                return Ok(());
            }
            if after == b"--" {
                self.finish_part(vars)?;
                self.state = State::Epilogue;
                return Ok(());
            }
        }

        match self.state {
            State::Preamble => {
                if !content.is_empty() {
                    self.flags.data_before = true;
                }
            }
            State::Epilogue => {
                if !content.is_empty() {
                    self.flags.data_after = true;
                }
            }
            State::Headers => self.header_line(content)?,
            State::Content => {
                let pending = std::mem::replace(&mut self.pending_eol, eol);
                self.write_content(pending)?;
                self.write_content(content)?;
            }
        }
        Ok(())
    }

    fn header_line(&mut self, content: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(content);
        if text.is_empty() {
            return self.start_part();
        }
        if text.starts_with([' ', '\t']) {
            self.flags.header_folding = true;
            match self.headers.last_mut() {
                Some(last) => {
                    last.push(' ');
                    last.push_str(text.trim());
                }
                None => self.flags.invalid_header_folding = true,
            }
            return Ok(());
        }
        if !text.contains(':') {
            self.flags.invalid_part = true;
        }
        self.headers.push(text.into_owned());
        Ok(())
    }

    fn start_part(&mut self) -> Result<()> {
        self.state = State::Content;
        self.pending_eol = b"";
        let disposition = self
            .headers
            .iter()
            .filter_map(|h| h.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-disposition"))
            .map(|(_, value)| value.to_string());
        let Some(disposition) = disposition else {
            self.flags.invalid_part = true;
            self.part = None;
            return Ok(());
        };
        let disposition = parse_disposition(&disposition, &mut self.flags);
        let Some(name) = disposition.name else {
            self.flags.invalid_part = true;
            self.part = None;
            return Ok(());
        };

        let body = match &disposition.filename {
            Some(_) => {
                if self.files >= self.options.upload_file_limit {
                    self.flags.file_limit_exceeded = true;
                    PartBody::Discard
                } else {
                    self.files += 1;
                    let file = if self.options.keep_files {
                        Some(
                            tempfile::Builder::new()
                                .prefix("upload-")
                                .tempfile_in(&self.options.upload_dir)
                                .map_err(|e| Error::body("MULTIPART", e.to_string()))?,
                        )
                    } else {
                        None
                    };
                    PartBody::File { file, size: 0 }
                }
            }
            None => PartBody::Text(Vec::new()),
        };
        self.part = Some(Part {
            name,
            filename: disposition.filename,
            headers: std::mem::take(&mut self.headers),
            body,
        });
        Ok(())
    }

    fn write_content(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        match self.part.as_mut().map(|p| &mut p.body) {
            Some(PartBody::Text(buf)) => buf.extend_from_slice(bytes),
            Some(PartBody::File { file, size }) => {
                *size += bytes.len();
                if let Some(file) = file {
                    file.write_all(bytes)
                        .map_err(|e| Error::body("MULTIPART", e.to_string()))?;
                }
            }
            Some(PartBody::Discard) | None => {}
        }
        Ok(())
    }

    fn finish_part(&mut self, vars: &mut TransactionVariables) -> Result<()> {
        if self.state == State::Headers {
            self.flags.invalid_part = true;
        }
        let Some(part) = self.part.take() else {
            return Ok(());
        };
        vars.add(Variable::MultipartName, &part.name, part.name.clone());
        for header in &part.headers {
            vars.add(Variable::MultipartPartHeaders, &part.name, header.clone());
        }
        match part.body {
            PartBody::Text(buf) => {
                if self.arguments < self.options.arguments_limit {
                    self.arguments += 1;
                    vars.add(Variable::ArgsPost, &part.name, String::from_utf8_lossy(&buf));
                }
            }
            PartBody::Discard => {
                debug!(name = %part.name, "upload file limit reached, part dropped");
            }
            PartBody::File { file, size } => {
                let filename = part.filename.unwrap_or_default();
                vars.add(Variable::MultipartFilename, &part.name, filename.clone());
                vars.add(Variable::FilesNames, &part.name, part.name.clone());
                vars.add(Variable::Files, &part.name, filename);
                vars.add(Variable::FilesSizes, &part.name, size.to_string());
                self.combined_size += size;
                if let Some(file) = file {
                    let (_, path) = file
                        .keep()
                        .map_err(|e| Error::body("MULTIPART", e.to_string()))?;
                    set_upload_mode(&path, self.options.upload_file_mode);
                    debug!(path = %path.display(), size, "kept uploaded file");
                    vars.add(Variable::FilesTmpNames, &part.name, path.display().to_string());
                }
            }
        }
        Ok(())
    }

    fn finish(self, vars: &mut TransactionVariables) {
        let mut flags = self.flags;
        if self.state != State::Epilogue {
            flags.unmatched_boundary = true;
        }
        vars.set(Variable::FilesCombinedSize, self.combined_size.to_string());
        flags.store(vars);
    }
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t'))
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(unix)]
fn set_upload_mode(path: &std::path::Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), error = %e, "cannot set upload file mode");
    }
}

#[cfg(not(unix))]
fn set_upload_mode(_path: &std::path::Path, _mode: u32) {}

/// Fills `ARGS_POST`, `FILES*` and `MULTIPART_*` from a form upload.
#[derive(Debug, Default)]
pub struct MultipartProcessor;

impl BodyProcessor for MultipartProcessor {
    fn name(&self) -> &'static str {
        "MULTIPART"
    }

    fn process_request(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()> {
        let boundary = parse_boundary(&options.content_type).ok_or_else(|| {
            Error::body("MULTIPART", format!("no boundary in {:?}", options.content_type))
        })?;
        let vars = target.vars();
        let mut parser = Parser::new(&boundary, options);
        let mut reader = BufReader::new(body);
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| Error::body("MULTIPART", e.to_string()))?;
            if n == 0 {
                break;
            }
            parser.line(&line, vars)?;
        }
        parser.finish(vars);
        Ok(())
    }

    fn process_response(
        &self,
        _body: &mut dyn Read,
        _target: &mut dyn BodyTarget,
        _options: &BodyProcessorOptions,
    ) -> Result<()> {
        Err(Error::body("MULTIPART", "not supported for response bodies"))
    }
}
