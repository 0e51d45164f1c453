//! Decoding transformations.
//!
//! Decoders work on bytes and convert back with `from_utf8_lossy`, so a
//! decoded byte sequence that is not valid UTF-8 shows up as U+FFFD.

use super::{TransformResult, Transformation, TransformationError};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use std::borrow::Cow;

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    Some(hex_value(hi)? << 4 | hex_value(lo)?)
}

fn bytes_to_string(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Percent-decode a form-encoded string.
///
/// `+` becomes a space and `%XX` the byte it names; a `%` not followed by
/// two hex digits is kept as-is. Returns the decoded text and whether any
/// invalid escape was seen.
pub fn url_decode(input: &str) -> (Cow<'_, str>, bool) {
    if !input.bytes().any(|b| b == b'%' || b == b'+') {
        return (Cow::Borrowed(input), false);
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut invalid = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes
                    .get(i + 1)
                    .zip(bytes.get(i + 2))
                    .and_then(|(&hi, &lo)| hex_pair(hi, lo));
                match decoded {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        invalid = true;
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    (Cow::Owned(bytes_to_string(out)), invalid)
}

/// URL decode transformation.
#[derive(Debug)]
pub struct UrlDecode;

impl Transformation for UrlDecode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        Ok(url_decode(input).0)
    }

    fn name(&self) -> &'static str {
        "urlDecode"
    }
}

/// URL decode with `%uHHHH` support.
///
/// Full-width ASCII (U+FF01..U+FF5E) maps down to its ASCII counterpart.
#[derive(Debug)]
pub struct UrlDecodeUni;

impl Transformation for UrlDecodeUni {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.bytes().any(|b| b == b'%' || b == b'+') {
            return Ok(Cow::Borrowed(input));
        }
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'%' && matches!(bytes.get(i + 1), Some(b'u' | b'U')) {
                let code = bytes.get(i + 2..i + 6).and_then(|h| {
                    std::str::from_utf8(h)
                        .ok()
                        .and_then(|s| u32::from_str_radix(s, 16).ok())
                });
                if let Some(code) = code {
                    let c = if (0xFF01..=0xFF5E).contains(&code) {
                        char::from_u32(code - 0xFF00 + 0x20)
                    } else {
                        char::from_u32(code)
                    };
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(c.unwrap_or(char::REPLACEMENT_CHARACTER).encode_utf8(&mut buf).as_bytes());
                    i += 6;
                    continue;
                }
                out.push(b);
                i += 1;
            } else if b == b'%' {
                match bytes
                    .get(i + 1)
                    .zip(bytes.get(i + 2))
                    .and_then(|(&hi, &lo)| hex_pair(hi, lo))
                {
                    Some(decoded) => {
                        out.push(decoded);
                        i += 3;
                    }
                    None => {
                        out.push(b);
                        i += 1;
                    }
                }
            } else if b == b'+' {
                out.push(b' ');
                i += 1;
            } else {
                out.push(b);
                i += 1;
            }
        }
        Ok(Cow::Owned(bytes_to_string(out)))
    }

    fn name(&self) -> &'static str {
        "urlDecodeUni"
    }
}

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

fn decode_base64_chars(chars: &[u8]) -> String {
    // a single dangling sextet carries no complete byte
    let usable = if chars.len() % 4 == 1 {
        &chars[..chars.len() - 1]
    } else {
        chars
    };
    match LENIENT_BASE64.decode(usable) {
        Ok(bytes) => bytes_to_string(bytes),
        Err(_) => String::new(),
    }
}

fn is_base64_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

/// Base64 decode transformation.
///
/// Decodes up to the first character outside the alphabet (padding ends
/// the input).
#[derive(Debug)]
pub struct Base64Decode;

impl Transformation for Base64Decode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let end = input
            .bytes()
            .position(|b| !is_base64_char(b))
            .unwrap_or(input.len());
        Ok(Cow::Owned(decode_base64_chars(&input.as_bytes()[..end])))
    }

    fn name(&self) -> &'static str {
        "base64Decode"
    }
}

/// Forgiving base64 decode: characters outside the alphabet are skipped,
/// and the URL-safe alphabet is accepted.
#[derive(Debug)]
pub struct Base64DecodeExt;

impl Transformation for Base64DecodeExt {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let chars: Vec<u8> = input
            .bytes()
            .map(|b| match b {
                b'-' => b'+',
                b'_' => b'/',
                other => other,
            })
            .filter(|&b| is_base64_char(b))
            .collect();
        Ok(Cow::Owned(decode_base64_chars(&chars)))
    }

    fn name(&self) -> &'static str {
        "base64DecodeExt"
    }
}

/// Hex decode transformation.
#[derive(Debug)]
pub struct HexDecode;

impl Transformation for HexDecode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len() / 2);
        for (i, pair) in bytes.chunks(2).enumerate() {
            let decoded = match pair {
                [hi, lo] => hex_pair(*hi, *lo),
                _ => None,
            };
            match decoded {
                Some(b) => out.push(b),
                None => {
                    return Err(TransformationError::InvalidInput {
                        transformation: "hexDecode",
                        offset: i * 2,
                    })
                }
            }
        }
        Ok(Cow::Owned(bytes_to_string(out)))
    }

    fn name(&self) -> &'static str {
        "hexDecode"
    }
}

/// Decode `0xHEX` literals as used in SQL.
#[derive(Debug)]
pub struct SqlHexDecode;

impl Transformation for SqlHexDecode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut changed = false;
        let mut i = 0;
        while i < bytes.len() {
            let is_prefix = bytes[i] == b'0'
                && matches!(bytes.get(i + 1), Some(b'x' | b'X'))
                && bytes.get(i + 2).copied().and_then(hex_value).is_some()
                && bytes.get(i + 3).copied().and_then(hex_value).is_some();
            if !is_prefix {
                out.push(bytes[i]);
                i += 1;
                continue;
            }
            i += 2;
            while let Some(b) = bytes
                .get(i)
                .zip(bytes.get(i + 1))
                .and_then(|(&hi, &lo)| hex_pair(hi, lo))
            {
                out.push(b);
                i += 2;
            }
            changed = true;
        }
        if changed {
            Ok(Cow::Owned(bytes_to_string(out)))
        } else {
            Ok(Cow::Borrowed(input))
        }
    }

    fn name(&self) -> &'static str {
        "sqlHexDecode"
    }
}

/// HTML entity decode transformation.
#[derive(Debug)]
pub struct HtmlEntityDecode;

impl Transformation for HtmlEntityDecode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.contains('&') {
            return Ok(Cow::Borrowed(input));
        }
        let decoded = html_escape::decode_html_entities(input);
        if decoded == input {
            Ok(Cow::Borrowed(input))
        } else {
            Ok(Cow::Owned(decoded.into_owned()))
        }
    }

    fn name(&self) -> &'static str {
        "htmlEntityDecode"
    }
}

fn take_hex(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, max: usize) -> String {
    let mut hex = String::new();
    while hex.len() < max {
        match chars.peek() {
            Some(h) if h.is_ascii_hexdigit() => {
                hex.push(*h);
                chars.next();
            }
            _ => break,
        }
    }
    hex
}

/// JavaScript decode transformation (`\n`, `\xHH`, `\uHHHH`, `\OOO`).
#[derive(Debug)]
pub struct JsDecode;

impl Transformation for JsDecode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.contains('\\') {
            return Ok(Cow::Borrowed(input));
        }
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '\\' {
                result.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('a') => result.push('\u{7}'),
                Some('b') => result.push('\u{8}'),
                Some('f') => result.push('\u{c}'),
                Some('v') => result.push('\u{b}'),
                Some('x') => {
                    let hex = take_hex(&mut chars, 2);
                    match (hex.len(), u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)) {
                        (2, Some(ch)) => result.push(ch),
                        _ => {
                            result.push('x');
                            result.push_str(&hex);
                        }
                    }
                }
                Some('u') => {
                    let hex = take_hex(&mut chars, 4);
                    let code = u32::from_str_radix(&hex, 16).ok();
                    match (hex.len(), code) {
                        (4, Some(code)) => {
                            let code = if (0xFF01..=0xFF5E).contains(&code) {
                                code - 0xFF00 + 0x20
                            } else {
                                code
                            };
                            result.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                        }
                        _ => {
                            result.push('u');
                            result.push_str(&hex);
                        }
                    }
                }
                Some(d @ '0'..='7') => {
                    let mut value = d.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match chars.peek().and_then(|c| c.to_digit(8)) {
                            Some(v) if value * 8 + v <= 0xFF => {
                                value = value * 8 + v;
                                chars.next();
                            }
                            _ => break,
                        }
                    }
                    result.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                Some(other) => result.push(other),
                None => result.push('\\'),
            }
        }

        Ok(Cow::Owned(result))
    }

    fn name(&self) -> &'static str {
        "jsDecode"
    }
}

/// CSS decode transformation (`\HH` to `\HHHHHH`, optional trailing space).
#[derive(Debug)]
pub struct CssDecode;

impl Transformation for CssDecode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.contains('\\') {
            return Ok(Cow::Borrowed(input));
        }
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '\\' {
                result.push(c);
                continue;
            }
            let hex = take_hex(&mut chars, 6);
            if hex.is_empty() {
                match chars.next() {
                    // escaped newline is a line continuation
                    Some('\n') | None => {}
                    Some(other) => result.push(other),
                }
                continue;
            }
            if matches!(chars.peek(), Some(' ' | '\t' | '\n')) {
                chars.next();
            }
            let code = u32::from_str_radix(&hex, 16).unwrap_or(0xFFFD);
            let code = if (0xFF01..=0xFF5E).contains(&code) {
                code - 0xFF00 + 0x20
            } else {
                code
            };
            result.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
        }

        Ok(Cow::Owned(result))
    }

    fn name(&self) -> &'static str {
        "cssDecode"
    }
}

/// ANSI C escape sequence decode (`\n`, `\xHH`, `\OOO`, ...).
#[derive(Debug)]
pub struct EscapeSeqDecode;

impl Transformation for EscapeSeqDecode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.contains('\\') {
            return Ok(Cow::Borrowed(input));
        }
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '\\' {
                result.push(c);
                continue;
            }
            match chars.peek().copied() {
                Some(e @ ('a' | 'b' | 'f' | 'n' | 'r' | 't' | 'v' | '\\' | '?' | '\'' | '"')) => {
                    chars.next();
                    result.push(match e {
                        'a' => '\u{7}',
                        'b' => '\u{8}',
                        'f' => '\u{c}',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        'v' => '\u{b}',
                        other => other,
                    });
                }
                Some('x') => {
                    chars.next();
                    let hex = take_hex(&mut chars, 2);
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(ch) if hex.len() == 2 => result.push(ch),
                        _ => {
                            result.push_str("\\x");
                            result.push_str(&hex);
                        }
                    }
                }
                Some(d @ '0'..='7') => {
                    chars.next();
                    let mut value = d.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match chars.peek().and_then(|c| c.to_digit(8)) {
                            Some(v) => {
                                value = value * 8 + v;
                                chars.next();
                            }
                            None => break,
                        }
                    }
                    result.push(char::from_u32(value & 0xFF).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                _ => result.push('\\'),
            }
        }

        Ok(Cow::Owned(result))
    }

    fn name(&self) -> &'static str {
        "escapeSeqDecode"
    }
}

/// Replace every non-ASCII character with its `%uHHHH` form.
#[derive(Debug)]
pub struct Utf8ToUnicode;

impl Transformation for Utf8ToUnicode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if input.is_ascii() {
            return Ok(Cow::Borrowed(input));
        }
        let mut result = String::with_capacity(input.len() * 2);
        for c in input.chars() {
            if c.is_ascii() {
                result.push(c);
            } else {
                let code = c as u32;
                if code > 0xFFFF {
                    // outside the BMP: emit the surrogate pair
                    let v = code - 0x10000;
                    result.push_str(&format!("%u{:04x}%u{:04x}", 0xD800 + (v >> 10), 0xDC00 + (v & 0x3FF)));
                } else {
                    result.push_str(&format!("%u{code:04x}"));
                }
            }
        }
        Ok(Cow::Owned(result))
    }

    fn name(&self) -> &'static str {
        "utf8toUnicode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(tr: &dyn Transformation, input: &str) -> String {
        tr.transform(input).unwrap().into_owned()
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(t(&UrlDecode, "hello%20world"), "hello world");
        assert_eq!(t(&UrlDecode, "test%2Fpath"), "test/path");
        assert_eq!(t(&UrlDecode, "a+b"), "a b");
        assert_eq!(t(&UrlDecode, "bad%zzescape%"), "bad%zzescape%");
    }

    #[test]
    fn test_url_decode_reports_invalid() {
        assert!(!url_decode("a%41").1);
        assert!(url_decode("a%4").1);
        assert!(matches!(url_decode("plain").0, Cow::Borrowed(_)));
    }

    #[test]
    fn test_url_decode_uni() {
        assert_eq!(t(&UrlDecodeUni, "%u003cscript%u003e"), "<script>");
        assert_eq!(t(&UrlDecodeUni, "%uff1cx"), "<x");
        assert_eq!(t(&UrlDecodeUni, "%41%u"), "A%u");
    }

    #[test]
    fn test_base64_decode() {
        assert_eq!(t(&Base64Decode, "aGVsbG8="), "hello");
        assert_eq!(t(&Base64Decode, "aGVsbG8"), "hello");
        assert_eq!(t(&Base64Decode, "aGVs.bG8="), "hel");
        assert_eq!(t(&Base64DecodeExt, "aGVs.bG8="), "hello");
        assert_eq!(t(&Base64DecodeExt, "aGVsbG8_"), "hello?");
    }

    #[test]
    fn test_hex_decode() {
        assert_eq!(t(&HexDecode, "414243"), "ABC");
        assert!(HexDecode.transform("41z").is_err());
        assert!(HexDecode.transform("414").is_err());
    }

    #[test]
    fn test_sql_hex_decode() {
        assert_eq!(t(&SqlHexDecode, "SELECT 0x414243"), "SELECT ABC");
        assert_eq!(t(&SqlHexDecode, "0x"), "0x");
    }

    #[test]
    fn test_html_entity_decode() {
        assert_eq!(t(&HtmlEntityDecode, "&lt;script&gt;"), "<script>");
        assert_eq!(t(&HtmlEntityDecode, "&#60;"), "<");
        assert_eq!(t(&HtmlEntityDecode, "no entities"), "no entities");
    }

    #[test]
    fn test_js_decode() {
        assert_eq!(t(&JsDecode, r"\x3cscript\x3e"), "<script>");
        assert_eq!(t(&JsDecode, r"\u003c"), "<");
        assert_eq!(t(&JsDecode, r"\74"), "<");
        assert_eq!(t(&JsDecode, r"a\'b"), "a'b");
    }

    #[test]
    fn test_css_decode() {
        assert_eq!(t(&CssDecode, r"\3c script"), "<script");
        assert_eq!(t(&CssDecode, r"j\avascript"), "j\nvascript");
        assert_eq!(t(&CssDecode, r"\s"), "s");
    }

    #[test]
    fn test_escape_seq_decode() {
        assert_eq!(t(&EscapeSeqDecode, r"a\nb"), "a\nb");
        assert_eq!(t(&EscapeSeqDecode, r"\x41\102"), "AB");
        assert_eq!(t(&EscapeSeqDecode, r"\q"), r"\q");
    }

    #[test]
    fn test_utf8_to_unicode() {
        assert_eq!(t(&Utf8ToUnicode, "aé"), "a%u00e9");
        assert_eq!(t(&Utf8ToUnicode, "ascii"), "ascii");
    }
}
