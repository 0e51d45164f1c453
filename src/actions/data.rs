//! Data actions (status, capture, t, xmlns).

use crate::engine::Rule;
use crate::error::{Error, Result};
use crate::transformations::{get_transformation, is_none};

/// Actions that carry data for other actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAction {
    /// HTTP status used by deny/drop/redirect.
    Status(u16),
    /// Write regex groups into `TX:0..9`.
    Capture,
    /// Transformation applied before the operator.
    Transformation(String),
    /// XML namespace declaration (`prefix=uri`).
    Xmlns(String),
}

impl DataAction {
    /// Action name.
    pub fn name(&self) -> &'static str {
        match self {
            DataAction::Status(_) => "status",
            DataAction::Capture => "capture",
            DataAction::Transformation(_) => "t",
            DataAction::Xmlns(_) => "xmlns",
        }
    }

    pub(crate) fn init(&self, rule: &mut Rule) -> Result<()> {
        match self {
            DataAction::Status(status) => rule.disruptive_status = Some(*status),
            DataAction::Capture => rule.capture = true,
            DataAction::Transformation(name) => rule.transformations.push_name(name)?,
            DataAction::Xmlns(ns) => rule.xmlns.push(ns.clone()),
        }
        Ok(())
    }
}

/// Parse `status:N`.
pub fn parse_status(value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(n) if (100..600).contains(&n) => Ok(n),
        _ => Err(Error::action("status", format!("invalid HTTP status: {value}"))),
    }
}

/// Validate a `t:` name; `none` is always accepted.
pub fn parse_transformation(value: &str) -> Result<String> {
    let name = value.trim();
    if !is_none(name) {
        get_transformation(name)?;
    }
    Ok(name.to_string())
}
