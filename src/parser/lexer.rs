//! Line lexer for SecLang configuration text.
//!
//! Produces one logical line per directive: comments and blank lines are
//! dropped, `\` continuations are joined and backtick blocks are kept
//! together with their lines separated by `\n`.

use crate::error::{Error, Result, SourceLocation};
use std::iter::Enumerate;
use std::path::PathBuf;
use std::str::Lines;

/// A logical configuration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 1-indexed number of the first physical line.
    pub number: usize,
    /// Joined, trimmed text.
    pub text: String,
}

/// Iterator over the logical lines of a configuration text.
pub struct Lexer<'a> {
    lines: Enumerate<Lines<'a>>,
    file: Option<PathBuf>,
}

impl<'a> Lexer<'a> {
    /// Create a lexer; `file` is only used for error locations.
    pub fn new(input: &'a str, file: Option<PathBuf>) -> Self {
        Self {
            lines: input.lines().enumerate(),
            file,
        }
    }

    fn error(&self, message: &str, line: usize) -> Error {
        Error::parse(message, SourceLocation::new(self.file.clone(), line).to_string())
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buffer = String::new();
        let mut start = 0;
        let mut in_backticks = false;

        while let Some((index, raw)) = self.lines.next() {
            let text = raw.trim();
            if in_backticks {
                if text == "`" {
                    buffer.push('`');
                    return Some(Ok(Line {
                        number: start,
                        text: buffer,
                    }));
                }
                if !text.is_empty() && !text.starts_with('#') {
                    buffer.push_str(text);
                    buffer.push('\n');
                }
                continue;
            }

            if text.starts_with('#') {
                continue;
            }
            if text.is_empty() {
                if buffer.is_empty() {
                    continue;
                }
                break;
            }
            if buffer.is_empty() {
                start = index + 1;
            }
            if let Some(joined) = text.strip_suffix('\\') {
                buffer.push_str(joined);
                continue;
            }
            buffer.push_str(text);
            if text.ends_with('`') && text.len() > 1 {
                in_backticks = true;
                buffer.push('\n');
                continue;
            }
            return Some(Ok(Line {
                number: start,
                text: buffer,
            }));
        }

        if in_backticks {
            return Some(Err(self.error("unterminated backtick block", start)));
        }
        if buffer.is_empty() {
            None
        } else {
            Some(Ok(Line {
                number: start,
                text: buffer,
            }))
        }
    }
}

/// Split a logical line into the directive name and its options.
pub fn split_directive(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim()),
        None => (text, ""),
    }
}

/// Take the next field from `input`.
///
/// A double-quoted field is unquoted with `\"` unescaped; other escapes are
/// kept as written. An unquoted field runs to the first whitespace that is
/// not inside single quotes. Returns `Ok(None)` at end of input.
pub fn next_field(input: &mut &str) -> std::result::Result<Option<String>, String> {
    let rest = input.trim_start();
    if rest.is_empty() {
        *input = rest;
        return Ok(None);
    }

    let mut out = String::new();
    let mut chars = rest.char_indices().peekable();
    if rest.starts_with('"') {
        chars.next();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' if matches!(chars.peek(), Some((_, '"'))) => {
                    out.push('"');
                    chars.next();
                }
                '"' => {
                    *input = &rest[i + 1..];
                    return Ok(Some(out));
                }
                _ => out.push(c),
            }
        }
        return Err("unterminated quoted string".to_string());
    }

    let mut quoted = false;
    for (i, c) in chars {
        if c == '\'' {
            quoted = !quoted;
        } else if c.is_whitespace() && !quoted {
            *input = &rest[i..];
            return Ok(Some(out));
        }
        out.push(c);
    }
    *input = "";
    Ok(Some(out))
}

/// Unquote a whole option string when it is a single double-quoted field.
pub fn unquote(opts: &str) -> String {
    if opts.starts_with('"') {
        let mut rest = opts;
        if let Ok(Some(field)) = next_field(&mut rest) {
            if rest.trim().is_empty() {
                return field;
            }
        }
    }
    opts.to_string()
}
