//! `application/x-www-form-urlencoded` bodies and query strings.

use super::{BodyProcessor, BodyProcessorOptions, BodyTarget};
use crate::error::{Error, Result};
use crate::transformations::url_decode;
use crate::variables::Variable;
use std::io::Read;

/// Split `input` on `separator` and percent-decode keys and values.
///
/// Returns the pairs and whether any invalid escape was seen. A pair
/// without `=` has an empty value.
pub fn parse_query(input: &str, separator: char) -> (Vec<(String, String)>, bool) {
    let mut invalid = false;
    let pairs = input
        .split(separator)
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let (k, bad_k) = url_decode(k);
            let (v, bad_v) = url_decode(v);
            invalid |= bad_k || bad_v;
            (k.into_owned(), v.into_owned())
        })
        .collect();
    (pairs, invalid)
}

fn read_text(body: &mut dyn Read) -> Result<String> {
    let mut raw = Vec::new();
    body.read_to_end(&mut raw)
        .map_err(|e| Error::body("URLENCODED", e.to_string()))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Fills `ARGS_POST` (or `RESPONSE_ARGS`) from a form body.
#[derive(Debug, Default)]
pub struct UrlencodedProcessor;

impl UrlencodedProcessor {
    fn fill(
        target: &mut dyn BodyTarget,
        text: &str,
        collection: Variable,
        options: &BodyProcessorOptions,
    ) {
        let vars = target.vars();
        let (pairs, invalid) = parse_query(text, '&');
        if invalid {
            vars.set(Variable::UrlencodedError, "1");
        }
        for (key, value) in pairs.into_iter().take(options.arguments_limit) {
            vars.add(collection, &key, value);
        }
    }
}

impl BodyProcessor for UrlencodedProcessor {
    fn name(&self) -> &'static str {
        "URLENCODED"
    }

    fn process_request(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()> {
        let text = read_text(body)?;
        Self::fill(target, &text, Variable::ArgsPost, options);
        target.vars().set(Variable::RequestBody, text);
        Ok(())
    }

    fn process_response(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()> {
        let text = read_text(body)?;
        Self::fill(target, &text, Variable::ResponseArgs, options);
        Ok(())
    }
}
