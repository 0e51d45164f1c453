//! Operator trait definition.

use crate::macros::Macro;
use std::fmt;

/// What an operator may see of the transaction while evaluating.
pub trait OperatorContext {
    /// Whether the current rule has `capture` set.
    fn capturing(&self) -> bool;

    /// Write a capture slot (`TX:0`..`TX:9`). Ignored when not capturing.
    fn capture_field(&mut self, index: usize, value: &str);

    /// Expand a macro argument.
    fn expand(&self, template: &Macro) -> String;

    /// Record a path argument (`ARGS_PATH`).
    fn add_path_argument(&mut self, _key: &str, _value: &str) {}
}

/// Trait for all operators.
///
/// `evaluate` must not depend on anything but `input` and expanded macro
/// arguments; side effects go through the context.
pub trait Operator: Send + Sync + fmt::Debug {
    /// Evaluate the operator against a value.
    fn evaluate(&self, tx: &mut dyn OperatorContext, input: &str) -> bool;

    /// Get the operator name.
    fn name(&self) -> &'static str;
}

/// Expand a macro argument, skipping the work for static text.
pub(crate) fn expand_arg(tx: &dyn OperatorContext, arg: &Macro) -> String {
    if arg.is_static() {
        arg.as_str().to_string()
    } else {
        tx.expand(arg)
    }
}
