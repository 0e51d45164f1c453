//! JSON bodies, flattened into dotted argument names.

use super::{BodyProcessor, BodyProcessorOptions, BodyTarget};
use crate::error::{Error, Result};
use crate::variables::{TransactionVariables, Variable};
use serde_json::Value;
use std::io::Read;

/// Flatten `value` into `(path, text)` pairs rooted at `prefix`.
///
/// Objects add `.key`, arrays add `.index` and also store their length
/// under their own path. Strings are stored unquoted, `null` as "".
/// Fails when nesting exceeds `depth_limit`.
pub fn flatten_json(value: &Value, prefix: &str, depth_limit: usize) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    flatten_into(value, prefix.to_string(), 0, depth_limit, &mut out)?;
    Ok(out)
}

fn flatten_into(
    value: &Value,
    path: String,
    depth: usize,
    depth_limit: usize,
    out: &mut Vec<(String, String)>,
) -> Result<()> {
    if depth > depth_limit {
        return Err(Error::body(
            "JSON",
            format!("nesting deeper than {depth_limit} levels"),
        ));
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, format!("{path}.{key}"), depth + 1, depth_limit, out)?;
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(child, format!("{path}.{i}"), depth + 1, depth_limit, out)?;
            }
            out.push((path, items.len().to_string()));
        }
        Value::String(s) => out.push((path, s.clone())),
        Value::Null => out.push((path, String::new())),
        Value::Bool(b) => out.push((path, b.to_string())),
        Value::Number(n) => out.push((path, n.to_string())),
    }
    Ok(())
}

/// Parse `raw` and store its flattened paths in `collection`.
///
/// For request bodies a flattened name also present in `ARGS_GET`, with or
/// without the `json.` root, replaces the query argument.
pub(crate) fn store_document(
    vars: &mut TransactionVariables,
    raw: &[u8],
    collection: Variable,
    options: &BodyProcessorOptions,
) -> Result<()> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| Error::body("JSON", e.to_string()))?;
    let pairs = flatten_json(&value, "json", options.json_depth_limit)?;
    for (path, text) in pairs.into_iter().take(options.arguments_limit) {
        if collection == Variable::ArgsPost {
            vars.remove(Variable::ArgsGet, &path);
            if let Some(name) = path.strip_prefix("json.") {
                vars.remove(Variable::ArgsGet, name);
            }
        }
        vars.set_index(collection, &path, 0, text);
    }
    Ok(())
}

fn read_all(body: &mut dyn Read) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    body.read_to_end(&mut raw)
        .map_err(|e| Error::body("JSON", e.to_string()))?;
    Ok(raw)
}

/// Fills `ARGS_POST` (or `RESPONSE_ARGS`) from a JSON document.
#[derive(Debug, Default)]
pub struct JsonProcessor;

impl BodyProcessor for JsonProcessor {
    fn name(&self) -> &'static str {
        "JSON"
    }

    fn process_request(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()> {
        let raw = read_all(body)?;
        store_document(target.vars(), &raw, Variable::ArgsPost, options)
    }

    fn process_response(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()> {
        let raw = read_all(body)?;
        store_document(target.vars(), &raw, Variable::ResponseArgs, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    #[test]
    fn test_flatten_nested() {
        let doc = json!({"a": {"b": [1, "x", null]}, "ok": true});
        let pairs = flatten_json(&doc, "json", 10).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("json.a.b.0".to_string(), "1".to_string()),
                ("json.a.b.1".to_string(), "x".to_string()),
                ("json.a.b.2".to_string(), String::new()),
                ("json.a.b".to_string(), "3".to_string()),
                ("json.ok".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_depth_limit() {
        let doc = json!({"a": {"b": {"c": 1}}});
        assert!(flatten_json(&doc, "json", 2).is_err());
        assert!(flatten_json(&doc, "json", 3).is_ok());
    }

    #[test]
    fn test_request_overrides_query_args() {
        let mut vars = TransactionVariables::new(Instant::now(), None, 3600);
        vars.add(Variable::ArgsGet, "foo", "bar");
        let mut body: &[u8] = br#"{"foo":"evil"}"#;
        JsonProcessor
            .process_request(&mut body, &mut vars, &BodyProcessorOptions::default())
            .unwrap();
        assert_eq!(vars.first(Variable::ArgsGet, "foo"), None);
        assert_eq!(vars.first(Variable::ArgsPost, "json.foo"), Some("evil"));
    }

    #[test]
    fn test_invalid_document() {
        let mut vars = TransactionVariables::new(Instant::now(), None, 3600);
        let mut body: &[u8] = b"{not json";
        let err = JsonProcessor
            .process_request(&mut body, &mut vars, &BodyProcessorOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::BodyProcessor { .. }));
    }
}
