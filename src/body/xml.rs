//! XML bodies.
//!
//! Only two projections are exposed: `//@*` (every attribute value) and
//! `/*` (every text node).

use super::{BodyProcessor, BodyProcessorOptions, BodyTarget};
use crate::error::{Error, Result};
use crate::variables::Variable;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;
use tracing::debug;

/// Key holding attribute values.
pub const XML_ATTRIBUTES: &str = "//@*";
/// Key holding element text.
pub const XML_TEXT: &str = "/*";

#[derive(Debug, Default)]
struct XmlContent {
    attributes: Vec<String>,
    text: Vec<String>,
}

fn parse(raw: &[u8], strict: bool) -> std::result::Result<XmlContent, (XmlContent, String)> {
    let mut reader = Reader::from_reader(raw);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = strict;
    config.allow_unmatched_ends = !strict;

    let mut content = XmlContent::default();
    let mut buf = Vec::new();
    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => return Err((content, format!("at byte {}: {e}", reader.buffer_position()))),
        };
        match event {
            Event::Start(e) | Event::Empty(e) => {
                for attr in e.attributes().with_checks(strict) {
                    match attr {
                        Ok(attr) => match attr.unescape_value() {
                            Ok(v) => content.attributes.push(v.into_owned()),
                            Err(_) => content
                                .attributes
                                .push(String::from_utf8_lossy(&attr.value).into_owned()),
                        },
                        Err(e) if strict => return Err((content, e.to_string())),
                        Err(_) => {}
                    }
                }
            }
            Event::Text(t) => {
                let text = match t.unescape() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::from_utf8_lossy(&t).into_owned(),
                };
                if !text.is_empty() {
                    content.text.push(text);
                }
            }
            Event::CData(c) => {
                content
                    .text
                    .push(String::from_utf8_lossy(&c.into_inner()).into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(content)
}

/// Fills `REQUEST_XML` (or `RESPONSE_XML`).
#[derive(Debug, Default)]
pub struct XmlProcessor;

impl XmlProcessor {
    fn process(body: &mut dyn Read, target: &mut dyn BodyTarget, collection: Variable) -> Result<()> {
        let mut raw = Vec::new();
        body.read_to_end(&mut raw)
            .map_err(|e| Error::body("XML", e.to_string()))?;

        let content = match parse(&raw, true) {
            Ok(content) => content,
            Err((_, strict_error)) => {
                debug!(error = %strict_error, "strict XML parse failed, retrying leniently");
                match parse(&raw, false) {
                    Ok(content) => content,
                    Err((content, _)) if !content.text.is_empty() || !content.attributes.is_empty() => {
                        content
                    }
                    Err((_, e)) => return Err(Error::body("XML", e)),
                }
            }
        };

        if let Some(map) = target.vars().map_mut(collection) {
            map.set(XML_ATTRIBUTES, content.attributes);
            map.set(XML_TEXT, content.text);
        }
        Ok(())
    }
}

impl BodyProcessor for XmlProcessor {
    fn name(&self) -> &'static str {
        "XML"
    }

    fn process_request(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        _options: &BodyProcessorOptions,
    ) -> Result<()> {
        Self::process(body, target, Variable::RequestXml)
    }

    fn process_response(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        _options: &BodyProcessorOptions,
    ) -> Result<()> {
        Self::process(body, target, Variable::ResponseXml)
    }
}
