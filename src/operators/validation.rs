//! Validation operators.
//!
//! These match when the input is *invalid* (an out-of-range byte, a broken
//! escape) or, for the `verify*` family, when a well-formed identifier is
//! found.

use super::pattern::compile_regex;
use super::traits::{Operator, OperatorContext};
use crate::error::{Error, Result};
use regex::Regex;

const MAX_CANDIDATES: usize = 10;

/// Byte range validation operator (@validateByteRange 9,10,13,32-126).
#[derive(Debug)]
pub struct ValidateByteRangeOperator {
    allowed: [bool; 256],
}

impl ValidateByteRangeOperator {
    /// Parse a comma-separated list of bytes and inclusive ranges.
    pub fn new(ranges: &str) -> Result<Self> {
        let mut allowed = [false; 256];
        let parse_byte = |s: &str| -> Result<u8> {
            s.trim()
                .parse::<u8>()
                .map_err(|_| Error::operator("validateByteRange", format!("invalid byte '{s}'")))
        };
        for part in ranges.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (lo, hi) = match part.split_once('-') {
                Some((lo, hi)) => (parse_byte(lo)?, parse_byte(hi)?),
                None => {
                    let b = parse_byte(part)?;
                    (b, b)
                }
            };
            if lo > hi {
                return Err(Error::operator(
                    "validateByteRange",
                    format!("range {lo}-{hi} is reversed"),
                ));
            }
            for b in lo..=hi {
                allowed[b as usize] = true;
            }
        }
        Ok(Self { allowed })
    }
}

impl Operator for ValidateByteRangeOperator {
    fn evaluate(&self, _tx: &mut dyn OperatorContext, input: &str) -> bool {
        input.bytes().any(|b| !self.allowed[b as usize])
    }

    fn name(&self) -> &'static str {
        "validateByteRange"
    }
}

/// URL encoding validation operator (@validateUrlEncoding).
#[derive(Debug)]
pub struct ValidateUrlEncodingOperator;

impl Operator for ValidateUrlEncodingOperator {
    fn evaluate(&self, _tx: &mut dyn OperatorContext, input: &str) -> bool {
        !is_valid_url_encoding(input)
    }

    fn name(&self) -> &'static str {
        "validateUrlEncoding"
    }
}

/// Whether every `%` starts a two-hex-digit escape.
fn is_valid_url_encoding(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return false;
            }
            if !bytes[i + 1].is_ascii_hexdigit() || !bytes[i + 2].is_ascii_hexdigit() {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

/// UTF-8 validation operator (@validateUtf8Encoding).
///
/// Values reach operators as Rust strings; bytes that were not valid UTF-8
/// (after decoding transformations) show up as U+FFFD replacement
/// characters, which this operator treats as invalid input.
#[derive(Debug)]
pub struct ValidateUtf8EncodingOperator;

impl Operator for ValidateUtf8EncodingOperator {
    fn evaluate(&self, _tx: &mut dyn OperatorContext, input: &str) -> bool {
        input.contains(char::REPLACEMENT_CHARACTER)
    }

    fn name(&self) -> &'static str {
        "validateUtf8Encoding"
    }
}

/// Identifier checksum used by the `verify*`/`validateNid` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierCheck {
    /// Luhn checksum (credit card numbers).
    CreditCard,
    /// Brazilian CPF check digits.
    Cpf,
    /// US social security number structure.
    Ssn,
    /// Chilean RUT check digit.
    ChileNid,
}

impl IdentifierCheck {
    fn operator_name(self) -> &'static str {
        match self {
            Self::CreditCard => "verifyCC",
            Self::Cpf => "verifyCPF",
            Self::Ssn => "verifySSN",
            Self::ChileNid => "validateNid",
        }
    }

    fn verify(self, candidate: &str) -> bool {
        match self {
            Self::CreditCard => luhn(&digits(candidate)),
            Self::Cpf => cpf(&digits(candidate)),
            Self::Ssn => ssn(&digits(candidate)),
            Self::ChileNid => chile_rut(candidate),
        }
    }
}

/// Regex candidate search followed by a checksum (@verifyCC, @verifyCPF,
/// @verifySSN, @validateNid).
#[derive(Debug)]
pub struct VerifyIdentifierOperator {
    check: IdentifierCheck,
    regex: Regex,
}

impl VerifyIdentifierOperator {
    /// Compile with the candidate regex.
    pub fn new(check: IdentifierCheck, pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(Error::operator(check.operator_name(), "missing pattern"));
        }
        Ok(Self {
            check,
            regex: compile_regex(pattern.trim())?,
        })
    }

    /// Parse the `@validateNid <country> <regex>` argument.
    pub fn nid(argument: &str) -> Result<Self> {
        let (country, pattern) = argument
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| Error::operator("validateNid", "expected '<country> <regex>'"))?;
        let check = match country.to_ascii_lowercase().as_str() {
            "cl" => IdentifierCheck::ChileNid,
            "us" => IdentifierCheck::Ssn,
            other => {
                return Err(Error::operator(
                    "validateNid",
                    format!("unsupported country '{other}'"),
                ))
            }
        };
        Self::new(check, pattern)
    }
}

impl Operator for VerifyIdentifierOperator {
    fn evaluate(&self, tx: &mut dyn OperatorContext, input: &str) -> bool {
        for m in self.regex.find_iter(input).take(MAX_CANDIDATES) {
            if self.check.verify(m.as_str()) {
                tx.capture_field(0, m.as_str());
                return true;
            }
        }
        false
    }

    fn name(&self) -> &'static str {
        self.check.operator_name()
    }
}

fn digits(s: &str) -> Vec<u8> {
    s.bytes()
        .filter(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .collect()
}

fn luhn(digits: &[u8]) -> bool {
    if digits.len() < 12 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            let d = u32::from(d);
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn cpf(d: &[u8]) -> bool {
    if d.len() != 11 || d.iter().all(|&x| x == d[0]) {
        return false;
    }
    let check = |len: usize| -> u8 {
        let sum: u32 = d[..len]
            .iter()
            .enumerate()
            .map(|(i, &x)| u32::from(x) * (len as u32 + 1 - i as u32))
            .sum();
        let rem = (sum * 10) % 11;
        if rem == 10 {
            0
        } else {
            rem as u8
        }
    };
    check(9) == d[9] && check(10) == d[10]
}

fn ssn(d: &[u8]) -> bool {
    if d.len() != 9 || d.iter().all(|&x| x == d[0]) {
        return false;
    }
    let area = u32::from(d[0]) * 100 + u32::from(d[1]) * 10 + u32::from(d[2]);
    let group = u32::from(d[3]) * 10 + u32::from(d[4]);
    let serial = d[5..].iter().fold(0u32, |acc, &x| acc * 10 + u32::from(x));
    if area == 0 || area == 666 || area >= 900 || group == 0 || serial == 0 {
        return false;
    }
    // sequential runs such as 123-45-6789 are never issued
    !d.windows(2).all(|w| w[1] == (w[0] + 1) % 10)
}

fn chile_rut(candidate: &str) -> bool {
    let cleaned: Vec<char> = candidate
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, 'k' | 'K'))
        .collect();
    let Some((&verifier, body)) = cleaned.split_last() else {
        return false;
    };
    if body.is_empty() || !body.iter().all(char::is_ascii_digit) {
        return false;
    }
    let mut factor = 2;
    let mut sum = 0u32;
    for c in body.iter().rev() {
        sum += c.to_digit(10).unwrap_or(0) * factor;
        factor = if factor == 7 { 2 } else { factor + 1 };
    }
    let expected = match 11 - (sum % 11) {
        11 => '0',
        10 => 'k',
        n => char::from_digit(n, 10).unwrap_or('0'),
    };
    verifier.to_ascii_lowercase() == expected
}
