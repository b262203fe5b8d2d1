//! Error types for substitution and interpolation.

use flotilla_tree::TreePath;
use thiserror::Error;

/// Errors raised by the string substitution layer and by mapping lookups.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("invalid template: {template}")]
    InvalidTemplate { template: String },

    #[error("required variable {name} is missing a value: {message}")]
    MissingRequired { name: String, message: String },

    #[error("named mapping not found: {name:?}")]
    UnknownMapping { name: String },

    #[error("invalid key in named mapping: {key:?}{}", fmt_resolved(.resolved))]
    InvalidKey {
        key: String,
        resolved: Option<String>,
    },

    #[error("lookup cycle detected: {name}[{key}]")]
    LookupCycle { name: String, key: String },

    #[error("failed to cast to expected type: {message}")]
    CastFailed { message: String },

    /// A failure that happened inside a mapping function, already rendered
    /// with its own context (typically a nested interpolation chain).
    #[error("{0}")]
    Resolve(String),
}

fn fmt_resolved(resolved: &Option<String>) -> String {
    match resolved {
        Some(value) => format!(" (resolved to {value:?})"),
        None => String::new(),
    }
}

/// A substitution failure located at a tree path.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("error while interpolating {path}: {source}")]
pub struct InterpolationError {
    pub path: TreePath,
    #[source]
    pub source: TemplateError,
}

impl InterpolationError {
    pub fn new(path: TreePath, source: TemplateError) -> Self {
        Self { path, source }
    }

    /// Re-render this error as a mapping-level failure, the form it takes
    /// when a lookup had to interpolate a sub-model and that failed.
    pub fn into_resolve_error(self) -> TemplateError {
        TemplateError::Resolve(format!("failed to interpolate model: {self}"))
    }
}
