//! Newline-delimited JSON, evaluated one record at a time.

use super::json::store_document;
use super::{BodyProcessor, BodyProcessorOptions, BodyTarget};
use crate::error::{Error, Result};
use crate::variables::Variable;
use std::io::{BufRead, BufReader, Read};
use tracing::debug;

/// Processes each line of the body as its own JSON document.
///
/// Before a record is stored the previous record's arguments are cleared;
/// `TX` and every other collection carry over.
#[derive(Debug, Default)]
pub struct JsonStreamProcessor;

impl JsonStreamProcessor {
    fn process(
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
        collection: Variable,
    ) -> Result<()> {
        let reader = BufReader::new(body);
        for (n, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::body("JSONSTREAM", e.to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            target.vars().reset(collection);
            store_document(target.vars(), line.as_bytes(), collection, options).map_err(|e| {
                Error::body("JSONSTREAM", format!("record {}: {e}", n + 1))
            })?;
            if !target.record_done() {
                debug!(record = n + 1, "stream processing stopped");
                break;
            }
        }
        Ok(())
    }
}

impl BodyProcessor for JsonStreamProcessor {
    fn name(&self) -> &'static str {
        "JSONSTREAM"
    }

    fn process_request(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()> {
        Self::process(body, target, options, Variable::ArgsPost)
    }

    fn process_response(
        &self,
        body: &mut dyn Read,
        target: &mut dyn BodyTarget,
        options: &BodyProcessorOptions,
    ) -> Result<()> {
        Self::process(body, target, options, Variable::ResponseArgs)
    }

    fn is_streaming(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::TransactionVariables;
    use std::time::Instant;

    struct Recorder {
        vars: TransactionVariables,
        seen: Vec<String>,
        stop_after: usize,
    }

    impl BodyTarget for Recorder {
        fn vars(&mut self) -> &mut TransactionVariables {
            &mut self.vars
        }

        fn record_done(&mut self) -> bool {
            let name = self.vars.first(Variable::ArgsPost, "json.name").unwrap_or("");
            self.seen.push(name.to_string());
            self.seen.len() < self.stop_after
        }
    }

    fn recorder(stop_after: usize) -> Recorder {
        Recorder {
            vars: TransactionVariables::new(Instant::now(), None, 3600),
            seen: Vec::new(),
            stop_after,
        }
    }

    #[test]
    fn test_records_are_isolated() {
        let mut target = recorder(10);
        let mut body: &[u8] = b"{\"name\":\"a\"}\n\n{\"name\":\"b\"}\n";
        JsonStreamProcessor
            .process_request(&mut body, &mut target, &BodyProcessorOptions::default())
            .unwrap();
        assert_eq!(target.seen, vec!["a", "b"]);
        assert_eq!(target.vars.map(Variable::ArgsPost).unwrap().len(), 1);
    }

    #[test]
    fn test_stop_requested() {
        let mut target = recorder(2);
        let mut body: &[u8] = b"{\"name\":\"a\"}\n{\"name\":\"b\"}\n{\"name\":\"c\"}\n";
        JsonStreamProcessor
            .process_request(&mut body, &mut target, &BodyProcessorOptions::default())
            .unwrap();
        assert_eq!(target.seen, vec!["a", "b"]);
    }

    #[test]
    fn test_bad_record_reports_line() {
        let mut target = recorder(10);
        let mut body: &[u8] = b"{\"name\":\"a\"}\n{oops\n";
        let err = JsonStreamProcessor
            .process_request(&mut body, &mut target, &BodyProcessorOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("record 2"));
    }
}
