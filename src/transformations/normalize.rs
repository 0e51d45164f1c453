//! Normalization transformations.

use super::{TransformResult, Transformation};
use std::borrow::Cow;

/// Lowercase transformation.
#[derive(Debug)]
pub struct Lowercase;

impl Transformation for Lowercase {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.chars().any(char::is_uppercase) {
            return Ok(Cow::Borrowed(input));
        }
        Ok(Cow::Owned(input.to_lowercase()))
    }

    fn name(&self) -> &'static str {
        "lowercase"
    }
}

/// Uppercase transformation.
#[derive(Debug)]
pub struct Uppercase;

impl Transformation for Uppercase {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.chars().any(char::is_lowercase) {
            return Ok(Cow::Borrowed(input));
        }
        Ok(Cow::Owned(input.to_uppercase()))
    }

    fn name(&self) -> &'static str {
        "uppercase"
    }
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\u{b}' | '\u{c}' | '\u{a0}')
}

/// Collapse runs of whitespace into a single space.
#[derive(Debug)]
pub struct CompressWhitespace;

impl Transformation for CompressWhitespace {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let mut result = String::with_capacity(input.len());
        let mut in_space = false;
        for c in input.chars() {
            if is_space(c) {
                if !in_space {
                    result.push(' ');
                }
                in_space = true;
            } else {
                result.push(c);
                in_space = false;
            }
        }
        if result == input {
            Ok(Cow::Borrowed(input))
        } else {
            Ok(Cow::Owned(result))
        }
    }

    fn name(&self) -> &'static str {
        "compressWhitespace"
    }
}

/// Remove all whitespace.
#[derive(Debug)]
pub struct RemoveWhitespace;

impl Transformation for RemoveWhitespace {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.chars().any(is_space) {
            return Ok(Cow::Borrowed(input));
        }
        Ok(Cow::Owned(input.chars().filter(|&c| !is_space(c)).collect()))
    }

    fn name(&self) -> &'static str {
        "removeWhitespace"
    }
}

/// Remove NUL characters.
#[derive(Debug)]
pub struct RemoveNulls;

impl Transformation for RemoveNulls {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.contains('\0') {
            return Ok(Cow::Borrowed(input));
        }
        Ok(Cow::Owned(input.replace('\0', "")))
    }

    fn name(&self) -> &'static str {
        "removeNulls"
    }
}

/// Replace NUL characters with spaces.
#[derive(Debug)]
pub struct ReplaceNulls;

impl Transformation for ReplaceNulls {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.contains('\0') {
            return Ok(Cow::Borrowed(input));
        }
        Ok(Cow::Owned(input.replace('\0', " ")))
    }

    fn name(&self) -> &'static str {
        "replaceNulls"
    }
}

fn trimmed<'a>(input: &'a str, out: &'a str) -> TransformResult<'a> {
    if out.len() == input.len() {
        Ok(Cow::Borrowed(input))
    } else {
        Ok(Cow::Borrowed(out))
    }
}

/// Trim whitespace on both sides.
#[derive(Debug)]
pub struct Trim;

impl Transformation for Trim {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        trimmed(input, input.trim_matches(is_space))
    }

    fn name(&self) -> &'static str {
        "trim"
    }
}

/// Trim leading whitespace.
#[derive(Debug)]
pub struct TrimLeft;

impl Transformation for TrimLeft {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        trimmed(input, input.trim_start_matches(is_space))
    }

    fn name(&self) -> &'static str {
        "trimLeft"
    }
}

/// Trim trailing whitespace.
#[derive(Debug)]
pub struct TrimRight;

impl Transformation for TrimRight {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        trimmed(input, input.trim_end_matches(is_space))
    }

    fn name(&self) -> &'static str {
        "trimRight"
    }
}

/// Collapse `//`, resolve `.` and `..` segments; a trailing slash is kept.
fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let trailing = path.len() > 1 && (path.ends_with('/') || path.ends_with("/.") || path.ends_with("/.."));
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|s| *s != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }
    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&stack.join("/"));
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Normalize a Unix-style path.
#[derive(Debug)]
pub struct NormalizePath;

impl Transformation for NormalizePath {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if input.is_empty() {
            return Ok(Cow::Borrowed(input));
        }
        let out = normalize_path(input);
        if out == input {
            Ok(Cow::Borrowed(input))
        } else {
            Ok(Cow::Owned(out))
        }
    }

    fn name(&self) -> &'static str {
        "normalizePath"
    }
}

/// Normalize a Windows-style path: backslashes become `/` first.
#[derive(Debug)]
pub struct NormalizePathWin;

impl Transformation for NormalizePathWin {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if input.is_empty() {
            return Ok(Cow::Borrowed(input));
        }
        let out = normalize_path(&input.replace('\\', "/"));
        if out == input {
            Ok(Cow::Borrowed(input))
        } else {
            Ok(Cow::Owned(out))
        }
    }

    fn name(&self) -> &'static str {
        "normalizePathWin"
    }
}

/// How comment bodies are handled.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CommentMode {
    Remove,
    Replace,
}

fn strip_comments(input: &str, mode: CommentMode) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                if mode == CommentMode::Replace {
                    result.push(' ');
                }
            }
            '<' if mode == CommentMode::Remove && input_starts(&chars, "!--") => {
                for _ in 0..3 {
                    chars.next();
                }
                let mut tail = String::new();
                for c in chars.by_ref() {
                    tail.push(c);
                    if tail.ends_with("-->") {
                        break;
                    }
                }
            }
            '-' if mode == CommentMode::Remove && chars.peek() == Some(&'-') => {
                // line comment to end of input
                break;
            }
            '#' if mode == CommentMode::Remove => break,
            other => result.push(other),
        }
    }
    result
}

fn input_starts(chars: &std::iter::Peekable<std::str::Chars<'_>>, prefix: &str) -> bool {
    chars.clone().take(prefix.len()).eq(prefix.chars())
}

/// Remove `/* */`, `<!-- -->`, `--` and `#` comments.
#[derive(Debug)]
pub struct RemoveComments;

impl Transformation for RemoveComments {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let out = strip_comments(input, CommentMode::Remove);
        if out == input {
            Ok(Cow::Borrowed(input))
        } else {
            Ok(Cow::Owned(out))
        }
    }

    fn name(&self) -> &'static str {
        "removeComments"
    }
}

/// Replace each `/* */` comment with a single space.
#[derive(Debug)]
pub struct ReplaceComments;

impl Transformation for ReplaceComments {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        if !input.contains("/*") {
            return Ok(Cow::Borrowed(input));
        }
        Ok(Cow::Owned(strip_comments(input, CommentMode::Replace)))
    }

    fn name(&self) -> &'static str {
        "replaceComments"
    }
}

/// Remove comment delimiters (`/*`, `*/`, `--`, `#`) but keep their content.
#[derive(Debug)]
pub struct RemoveCommentsChar;

impl Transformation for RemoveCommentsChar {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, chars.peek().copied()) {
                ('/', Some('*')) | ('*', Some('/')) | ('-', Some('-')) => {
                    chars.next();
                }
                ('<', _) if input_starts(&chars, "!--") => {
                    for _ in 0..3 {
                        chars.next();
                    }
                }
                ('#', _) => {}
                _ => result.push(c),
            }
        }
        let result = result.replace("-->", "");
        if result == input {
            Ok(Cow::Borrowed(input))
        } else {
            Ok(Cow::Owned(result))
        }
    }

    fn name(&self) -> &'static str {
        "removeCommentsChar"
    }
}

/// Command line normalization.
///
/// Deletes `\ " ' ^`, deletes spaces before `/` and `(`, turns `,` and `;`
/// into spaces, collapses whitespace and lowercases.
#[derive(Debug)]
pub struct CmdLine;

impl Transformation for CmdLine {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let mut result = String::with_capacity(input.len());
        let mut pending_space = false;
        for c in input.chars() {
            match c {
                '\\' | '"' | '\'' | '^' => {}
                ' ' | '\t' | '\n' | '\r' | ',' | ';' => pending_space = true,
                '/' | '(' => {
                    pending_space = false;
                    result.push(c);
                }
                other => {
                    if pending_space && !result.is_empty() {
                        result.push(' ');
                    }
                    pending_space = false;
                    result.extend(other.to_lowercase());
                }
            }
        }
        if result == input {
            Ok(Cow::Borrowed(input))
        } else {
            Ok(Cow::Owned(result))
        }
    }

    fn name(&self) -> &'static str {
        "cmdLine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(tr: &dyn Transformation, input: &str) -> String {
        tr.transform(input).unwrap().into_owned()
    }

    #[test]
    fn test_case() {
        assert_eq!(t(&Lowercase, "Hello World"), "hello world");
        assert!(matches!(Lowercase.transform("already lower").unwrap(), Cow::Borrowed(_)));
        assert_eq!(t(&Uppercase, "Hello"), "HELLO");
    }

    #[test]
    fn test_whitespace() {
        assert_eq!(t(&CompressWhitespace, "hello   world"), "hello world");
        assert_eq!(t(&CompressWhitespace, "a\t\nb"), "a b");
        assert_eq!(t(&RemoveWhitespace, "hello world\t!"), "helloworld!");
        assert_eq!(t(&Trim, "  x  "), "x");
        assert_eq!(t(&TrimLeft, "  x  "), "x  ");
        assert_eq!(t(&TrimRight, "  x  "), "  x");
    }

    #[test]
    fn test_nulls() {
        assert_eq!(t(&RemoveNulls, "a\0b"), "ab");
        assert_eq!(t(&ReplaceNulls, "a\0b"), "a b");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(t(&NormalizePath, "/a/b/../c"), "/a/c");
        assert_eq!(t(&NormalizePath, "/a//b/./c"), "/a/b/c");
        assert_eq!(t(&NormalizePath, "/a/b/"), "/a/b/");
        assert_eq!(t(&NormalizePath, "/../../etc/passwd"), "/etc/passwd");
        assert_eq!(t(&NormalizePath, "a/../../b"), "../b");
        assert_eq!(t(&NormalizePathWin, "C:\\a\\..\\b"), "C:/b");
    }

    #[test]
    fn test_comments() {
        assert_eq!(t(&RemoveComments, "SELECT/* x */1"), "SELECT1");
        assert_eq!(t(&RemoveComments, "1 OR 1=1-- rest"), "1 OR 1=1");
        assert_eq!(t(&RemoveComments, "a<!-- c -->b"), "ab");
        assert_eq!(t(&ReplaceComments, "SELECT/* x */1"), "SELECT 1");
        assert_eq!(t(&ReplaceComments, "a/* open"), "a ");
        assert_eq!(t(&RemoveCommentsChar, "/*x*/y--z#"), "xyz");
    }

    #[test]
    fn test_cmdline() {
        assert_eq!(t(&CmdLine, "CMD;/C"), "cmd/c");
        assert_eq!(t(&CmdLine, "echo^hello"), "echohello");
        assert_eq!(t(&CmdLine, "c\"a\"t  /etc/pas'swd"), "cat/etc/passwd");
        assert_eq!(t(&CmdLine, "net,user"), "net user");
        assert_eq!(t(&CmdLine, "ls   ( x )"), "ls( x )");
    }
}
