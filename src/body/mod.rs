//! Request and response body processing.
//!
//! A [`BodyProcessor`] reads a buffered body and fills transaction
//! variables. Processors are looked up by upper-case name in a
//! [`BodyProcessorRegistry`] built once per WAF.

mod buffer;
mod json;
mod jsonstream;
mod multipart;
mod urlencoded;
mod xml;

pub use buffer::{BodyBuffer, BodyReader};
pub use json::{flatten_json, JsonProcessor};
pub use jsonstream::JsonStreamProcessor;
pub use multipart::{boundary_from_content_type, MultipartProcessor};
pub use urlencoded::{parse_query, UrlencodedProcessor};
pub use xml::XmlProcessor;

use crate::error::Result;
use crate::variables::TransactionVariables;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

/// Settings a processor may need.
#[derive(Debug, Clone)]
pub struct BodyProcessorOptions {
    /// Full `Content-Type` of the body.
    pub content_type: String,
    /// Directory for temporary files.
    pub tmp_dir: PathBuf,
    /// Directory for kept uploads.
    pub upload_dir: PathBuf,
    /// Keep uploaded files and expose their paths.
    pub keep_files: bool,
    /// Mode of kept uploads.
    pub upload_file_mode: u32,
    /// Maximum number of uploaded files.
    pub upload_file_limit: usize,
    /// Maximum JSON nesting depth.
    pub json_depth_limit: usize,
    /// Maximum number of arguments.
    pub arguments_limit: usize,
}

impl Default for BodyProcessorOptions {
    fn default() -> Self {
        Self {
            content_type: String::new(),
            tmp_dir: std::env::temp_dir(),
            upload_dir: std::env::temp_dir(),
            keep_files: false,
            upload_file_mode: 0o600,
            upload_file_limit: 100,
            json_depth_limit: 1024,
            arguments_limit: 1000,
        }
    }
}

/// What a processor writes into.
///
/// Streaming processors call [`BodyTarget::record_done`] after each record
/// so the transaction can evaluate it.
pub trait BodyTarget {
    /// Transaction variables.
    fn vars(&mut self) -> &mut TransactionVariables;

    /// A streamed record is complete; returns `false` to stop reading.
    fn record_done(&mut self) -> bool {
        true
    }
}

impl BodyTarget for TransactionVariables {
    fn vars(&mut self) -> &mut TransactionVariables {
        self
    }
}

/// Parses a body into transaction variables.
pub trait BodyProcessor: Send + Sync + fmt::Debug {
    /// Upper-case processor name.
    fn name(&self) -> &'static str;

    /// Process a request body.
    fn process_request(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()>;

    /// Process a response body.
    fn process_response(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()>;

    /// Whether the processor evaluates records itself through
    /// [`BodyTarget::record_done`].
    fn is_streaming(&self) -> bool {
        false
    }
}

/// Body processors by name.
#[derive(Debug, Clone)]
pub struct BodyProcessorRegistry {
    processors: HashMap<String, Arc<dyn BodyProcessor>>,
}

impl Default for BodyProcessorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            processors: HashMap::new(),
        };
        registry.register(Arc::new(UrlencodedProcessor));
        registry.register(Arc::new(MultipartProcessor));
        registry.register(Arc::new(JsonProcessor));
        registry.register(Arc::new(JsonStreamProcessor));
        registry.register(Arc::new(XmlProcessor));
        registry
    }
}

impl BodyProcessorRegistry {
    /// Registry with the built-in processors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a processor.
    pub fn register(&mut self, processor: Arc<dyn BodyProcessor>) {
        self.processors
            .insert(processor.name().to_ascii_uppercase(), processor);
    }

    /// Processor registered as `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn BodyProcessor>> {
        self.processors.get(&name.to_ascii_uppercase()).cloned()
    }
}

/// Processor implied by a request `Content-Type`.
pub fn processor_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/x-www-form-urlencoded" => Some("URLENCODED"),
        "multipart/form-data" => Some("MULTIPART"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = BodyProcessorRegistry::new();
        assert_eq!(registry.get("json").unwrap().name(), "JSON");
        assert!(registry.get("JSONSTREAM").unwrap().is_streaming());
        assert!(registry.get("YAML").is_none());
    }

    #[test]
    fn test_content_type_detection() {
        assert_eq!(
            processor_for_content_type("application/x-www-form-urlencoded; charset=utf-8"),
            Some("URLENCODED")
        );
        assert_eq!(
            processor_for_content_type("Multipart/Form-Data; boundary=xyz"),
            Some("MULTIPART")
        );
        assert_eq!(processor_for_content_type("application/json"), None);
    }
}
