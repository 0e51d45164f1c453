//! Transformation functions applied to values before operator evaluation.

mod decode;
mod encode;
mod normalize;
mod pipeline;

pub use decode::*;
pub use encode::*;
pub use normalize::*;
pub use pipeline::TransformationPipeline;

use crate::error::{Error, Result};
use phf::phf_map;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error as ThisError;

/// A transformation that could not produce a value.
///
/// Never escapes evaluation: the pipeline logs it and keeps the value it
/// had before the failing step.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum TransformationError {
    /// The input was not valid for the decoder.
    #[error("{transformation}: invalid input at offset {offset}")]
    InvalidInput {
        /// Transformation name.
        transformation: &'static str,
        /// Byte offset of the first bad input.
        offset: usize,
    },
}

/// Result of a single transformation step.
pub type TransformResult<'a> = std::result::Result<Cow<'a, str>, TransformationError>;

/// Trait for transformations.
pub trait Transformation: Send + Sync + fmt::Debug {
    /// Apply the transformation.
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a>;

    /// Get the transformation name.
    fn name(&self) -> &'static str;
}

/// Built-in transformations by lowercase name.
static TRANSFORMATIONS: phf::Map<&'static str, &'static dyn Transformation> = phf_map! {
    // decoding
    "urldecode" => &UrlDecode as &'static dyn Transformation,
    "urldecodeuni" => &UrlDecodeUni as &'static dyn Transformation,
    "base64decode" => &Base64Decode as &'static dyn Transformation,
    "base64decodeext" => &Base64DecodeExt as &'static dyn Transformation,
    "hexdecode" => &HexDecode as &'static dyn Transformation,
    "sqlhexdecode" => &SqlHexDecode as &'static dyn Transformation,
    "htmlentitydecode" => &HtmlEntityDecode as &'static dyn Transformation,
    "jsdecode" => &JsDecode as &'static dyn Transformation,
    "cssdecode" => &CssDecode as &'static dyn Transformation,
    "escapeseqdecode" => &EscapeSeqDecode as &'static dyn Transformation,
    "utf8tounicode" => &Utf8ToUnicode as &'static dyn Transformation,

    // encoding and hashing
    "base64encode" => &Base64Encode as &'static dyn Transformation,
    "hexencode" => &HexEncode as &'static dyn Transformation,
    "urlencode" => &UrlEncode as &'static dyn Transformation,
    "md5" => &Md5 as &'static dyn Transformation,
    "sha1" => &Sha1 as &'static dyn Transformation,

    // normalization
    "lowercase" => &Lowercase as &'static dyn Transformation,
    "uppercase" => &Uppercase as &'static dyn Transformation,
    "compresswhitespace" => &CompressWhitespace as &'static dyn Transformation,
    "removewhitespace" => &RemoveWhitespace as &'static dyn Transformation,
    "removenulls" => &RemoveNulls as &'static dyn Transformation,
    "replacenulls" => &ReplaceNulls as &'static dyn Transformation,
    "trim" => &Trim as &'static dyn Transformation,
    "trimleft" => &TrimLeft as &'static dyn Transformation,
    "trimright" => &TrimRight as &'static dyn Transformation,
    "normalizepath" => &NormalizePath as &'static dyn Transformation,
    "normalisepath" => &NormalizePath as &'static dyn Transformation,
    "normalizepathwin" => &NormalizePathWin as &'static dyn Transformation,
    "normalisepathwin" => &NormalizePathWin as &'static dyn Transformation,
    "removecomments" => &RemoveComments as &'static dyn Transformation,
    "removecommentschar" => &RemoveCommentsChar as &'static dyn Transformation,
    "replacecomments" => &ReplaceComments as &'static dyn Transformation,
    "cmdline" => &CmdLine as &'static dyn Transformation,

    // special
    "length" => &Length as &'static dyn Transformation,
};

/// Look up a transformation by name (case-insensitive).
///
/// `none` is not a transformation; the parser handles it by clearing the
/// rule's pipeline.
pub fn get_transformation(name: &str) -> Result<&'static dyn Transformation> {
    TRANSFORMATIONS
        .get(name.to_ascii_lowercase().as_str())
        .copied()
        .ok_or_else(|| Error::UnknownTransformation {
            name: name.to_string(),
        })
}

/// Whether `name` is the pipeline-clearing `none`.
pub fn is_none(name: &str) -> bool {
    name.eq_ignore_ascii_case("none")
}

/// Length transformation (returns the byte length of the input).
#[derive(Debug)]
pub struct Length;

impl Transformation for Length {
    fn transform<'a>(&self, input: &'a str) -> TransformResult<'a> {
        Ok(Cow::Owned(input.len().to_string()))
    }

    fn name(&self) -> &'static str {
        "length"
    }
}
