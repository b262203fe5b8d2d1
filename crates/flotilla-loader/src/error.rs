//! Loader error kinds.
//!
//! Callers can tell the failure classes apart: a type error at a known path,
//! an interpolation failure, an import conflict, a cycle (include, extends,
//! or lookup; the latter travels inside [`LoadError::Interpolation`]), a
//! resource that would not load, or ambient cancellation. Every variant that
//! concerns a node carries its path.

use flotilla_template::InterpolationError;
use flotilla_tree::{ConvertError, TreePath};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    /// Invalid type at a known path.
    #[error("{path}: invalid type {actual} for {field}")]
    Syntax {
        path: TreePath,
        actual: &'static str,
        field: String,
    },

    /// Variable substitution failure, including lookup cycles.
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    /// A same-name resource imported via `include` had a different body.
    #[error("{resource} conflicts with imported resource")]
    Conflict { resource: String },

    /// The same file appeared twice on the include chain.
    #[error("include cycle detected:\n{}", fmt_include_chain(.chain))]
    IncludeCycle { chain: Vec<String> },

    /// The same `(file, service)` pair appeared twice on the extends stack.
    #[error("circular reference: {}", .chain.join(" -> "))]
    ExtendsCycle { chain: Vec<String> },

    /// A referenced file could not be produced or read.
    #[error("cannot read {path}: {reason}")]
    Resource { path: String, reason: String },

    /// A document shape error not tied to a single leaf.
    #[error("{0}")]
    Model(String),

    /// The YAML front-end rejected a document.
    #[error(transparent)]
    Parse(#[from] ConvertError),

    /// Ambient cancellation, surfaced at the nearest boundary.
    #[error("operation cancelled")]
    Cancelled,
}

impl LoadError {
    pub fn syntax(path: &TreePath, value: &flotilla_tree::Value, field: &str) -> Self {
        LoadError::Syntax {
            path: path.clone(),
            actual: value.type_name(),
            field: field.to_owned(),
        }
    }

    pub fn resource(path: impl Into<String>, reason: impl ToString) -> Self {
        LoadError::Resource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

fn fmt_include_chain(chain: &[String]) -> String {
    match chain.split_first() {
        Some((first, rest)) => {
            let mut out = first.clone();
            for file in rest {
                out.push_str("\n include ");
                out.push_str(file);
            }
            out
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_tree::Value;

    #[test]
    fn test_syntax_message() {
        let err = LoadError::syntax(
            &TreePath::from("services.web.env_file"),
            &Value::Bool(true),
            "env_file",
        );
        assert_eq!(
            err.to_string(),
            "services.web.env_file: invalid type bool for env_file"
        );
    }

    #[test]
    fn test_conflict_message() {
        let err = LoadError::Conflict { resource: "services.api".into() };
        assert_eq!(err.to_string(), "services.api conflicts with imported resource");
    }

    #[test]
    fn test_include_cycle_message() {
        let err = LoadError::IncludeCycle {
            chain: vec!["/a/compose.yaml".into(), "/b/compose.yaml".into(), "/a/compose.yaml".into()],
        };
        assert_eq!(
            err.to_string(),
            "include cycle detected:\n/a/compose.yaml\n include /b/compose.yaml\n include /a/compose.yaml"
        );
    }
}
