//! Transformation pipeline.

use super::{get_transformation, is_none, Transformation};
use crate::error::Result;
use std::borrow::Cow;
use tracing::debug;

/// A pipeline of transformations to apply in sequence.
#[derive(Clone, Default)]
pub struct TransformationPipeline {
    transformations: Vec<&'static dyn Transformation>,
}

impl TransformationPipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline from transformation names; `none` clears what came
    /// before it.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut pipeline = Self::new();
        for name in names {
            pipeline.push_name(name.as_ref())?;
        }
        Ok(pipeline)
    }

    /// Append a transformation by name (`none` clears).
    pub fn push_name(&mut self, name: &str) -> Result<()> {
        if is_none(name) {
            self.transformations.clear();
        } else {
            self.transformations.push(get_transformation(name)?);
        }
        Ok(())
    }

    /// Add a transformation to the pipeline.
    pub fn add(&mut self, transformation: &'static dyn Transformation) {
        self.transformations.push(transformation);
    }

    /// Remove every transformation.
    pub fn clear(&mut self) {
        self.transformations.clear();
    }

    /// Apply all transformations in sequence.
    ///
    /// A failing step is logged and skipped; the value it received carries
    /// on to the next step.
    pub fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let mut current: Cow<'a, str> = Cow::Borrowed(input);
        for t in &self.transformations {
            current = step(*t, current);
        }
        current
    }

    /// Apply cumulatively, returning the original and every intermediate
    /// value in order. Steps that leave the value unchanged add nothing.
    pub fn apply_all(&self, input: &str) -> Vec<String> {
        let mut values = vec![input.to_string()];
        let mut current: Cow<'_, str> = Cow::Borrowed(input);
        for t in &self.transformations {
            current = step(*t, current);
            if values.last().map(String::as_str) != Some(current.as_ref()) {
                values.push(current.clone().into_owned());
            }
        }
        values
    }

    /// Names of the transformations, in order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.transformations.iter().map(|t| t.name())
    }

    /// Check if the pipeline is empty.
    pub fn is_empty(&self) -> bool {
        self.transformations.is_empty()
    }

    /// Get the number of transformations.
    pub fn len(&self) -> usize {
        self.transformations.len()
    }
}

fn step<'a>(t: &dyn Transformation, current: Cow<'a, str>) -> Cow<'a, str> {
    let outcome = match t.transform(&current) {
        Ok(Cow::Borrowed(s)) if s.len() == current.len() => None,
        Ok(value) => Some(Ok(value.into_owned())),
        Err(e) => Some(Err(e)),
    };
    match outcome {
        None => current,
        Some(Ok(value)) => Cow::Owned(value),
        Some(Err(e)) => {
            debug!(transformation = t.name(), error = %e, "transformation failed");
            current
        }
    }
}

impl std::fmt::Debug for TransformationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
