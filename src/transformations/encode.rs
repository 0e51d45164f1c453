//! Encoding and hashing transformations.

use super::{TransformResult, Transformation};
use base64::Engine;
use std::borrow::Cow;
use std::fmt::Write as _;

/// Base64 encode transformation.
#[derive(Debug)]
pub struct Base64Encode;

impl Transformation for Base64Encode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        Ok(Cow::Owned(base64::engine::general_purpose::STANDARD.encode(input)))
    }

    fn name(&self) -> &'static str {
        "base64Encode"
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Hex encode transformation.
#[derive(Debug)]
pub struct HexEncode;

impl Transformation for HexEncode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        Ok(Cow::Owned(to_hex(input.as_bytes())))
    }

    fn name(&self) -> &'static str {
        "hexEncode"
    }
}

/// URL encode transformation (space becomes `+`).
#[derive(Debug)]
pub struct UrlEncode;

const URL_ENCODE_SET: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'*')
    .remove(b' ');

impl Transformation for UrlEncode {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        let encoded = percent_encoding::utf8_percent_encode(input, URL_ENCODE_SET).to_string();
        let encoded = if encoded.contains(' ') {
            encoded.replace(' ', "+")
        } else {
            encoded
        };
        if encoded == input {
            Ok(Cow::Borrowed(input))
        } else {
            Ok(Cow::Owned(encoded))
        }
    }

    fn name(&self) -> &'static str {
        "urlEncode"
    }
}

/// MD5 digest, rendered as lowercase hex.
#[derive(Debug)]
pub struct Md5;

impl Transformation for Md5 {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        use md5::{Digest, Md5 as Md5Hasher};
        Ok(Cow::Owned(to_hex(&Md5Hasher::digest(input.as_bytes()))))
    }

    fn name(&self) -> &'static str {
        "md5"
    }
}

/// SHA1 digest, rendered as lowercase hex.
#[derive(Debug)]
pub struct Sha1;

impl Transformation for Sha1 {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        use sha1::{Digest, Sha1 as Sha1Hasher};
        Ok(Cow::Owned(to_hex(&Sha1Hasher::digest(input.as_bytes()))))
    }

    fn name(&self) -> &'static str {
        "sha1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_encode() {
        assert_eq!(Base64Encode.transform("hello").unwrap(), "aGVsbG8=");
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(HexEncode.transform("AB").unwrap(), "4142");
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(UrlEncode.transform("a b&c").unwrap(), "a+b%26c");
        assert_eq!(UrlEncode.transform("safe-_.").unwrap(), "safe-_.");
    }

    #[test]
    fn test_md5() {
        assert_eq!(
            Md5.transform("hello").unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_sha1() {
        assert_eq!(
            Sha1.transform("hello").unwrap(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }
}
