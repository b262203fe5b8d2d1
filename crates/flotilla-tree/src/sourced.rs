//! The provenance overlay.
//!
//! During a merge every leaf carries the tag of the document that supplied
//! it, so downstream consumers can tell which file an attribute came from.
//! The same machinery doubles as a scratch annotation channel: the loader
//! temporarily tags sub-trees with their working directory to drive relative
//! path resolution, then strips the tags again. Invariants:
//!
//! - pairs wrap leaves only, never interior nodes;
//! - pairs never nest: re-attaching replaces the tag;
//! - `strip_sources(attach_source(t, tag)) == t` for any tree `t`.

use crate::value::{Mapping, Value};
use crate::TreePath;
use indexmap::IndexMap;
use std::fmt;

/// Identifies the document (or document role) that contributed a leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceTag(String);

impl SourceTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A leaf value paired with its provenance tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced {
    pub value: Value,
    pub source: SourceTag,
}

impl Sourced {
    pub fn new(value: Value, source: SourceTag) -> Value {
        Value::Sourced(Box::new(Sourced { value, source }))
    }
}

/// Tag every leaf of `value` with `tag`.
///
/// Leaves that are already tagged get their tag replaced.
pub fn attach_source(value: Value, tag: &SourceTag) -> Value {
    attach_source_by(value, &|_, _| Some(tag.clone()))
}

/// Tag leaves with a per-path tag; leaves the callback declines stay bare.
pub fn attach_source_by(
    value: Value,
    tag_for: &dyn Fn(&TreePath, &Value) -> Option<SourceTag>,
) -> Value {
    attach_inner(value, TreePath::new(), tag_for)
}

fn attach_inner(
    value: Value,
    path: TreePath,
    tag_for: &dyn Fn(&TreePath, &Value) -> Option<SourceTag>,
) -> Value {
    match value {
        Value::Mapping(entries) => Value::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| {
                    let child = path.next(&k);
                    (k, attach_inner(v, child, tag_for))
                })
                .collect::<Mapping>(),
        ),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| attach_inner(v, path.next_index(i), tag_for))
                .collect(),
        ),
        Value::Sourced(sourced) => match tag_for(&path, &sourced.value) {
            Some(tag) => Sourced::new(sourced.value, tag),
            None => Value::Sourced(sourced),
        },
        leaf => match tag_for(&path, &leaf) {
            Some(tag) => Sourced::new(leaf, tag),
            None => leaf,
        },
    }
}

/// Strip every provenance pair, keeping the bare values.
pub fn strip_sources(value: Value) -> Value {
    strip_inner(value, TreePath::new(), &mut |_, _| {})
}

/// Strip every pair and report which tag sat at which path.
pub fn strip_sources_with(value: Value) -> (Value, IndexMap<TreePath, SourceTag>) {
    let mut tags = IndexMap::new();
    let stripped = strip_inner(value, TreePath::new(), &mut |path, tag| {
        tags.insert(path.clone(), tag.clone());
    });
    (stripped, tags)
}

fn strip_inner(
    value: Value,
    path: TreePath,
    observe: &mut dyn FnMut(&TreePath, &SourceTag),
) -> Value {
    match value {
        Value::Mapping(entries) => Value::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| {
                    let child = path.next(&k);
                    (k, strip_inner(v, child, observe))
                })
                .collect::<Mapping>(),
        ),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| strip_inner(v, path.next_index(i), observe))
                .collect(),
        ),
        Value::Sourced(sourced) => {
            observe(&path, &sourced.source);
            sourced.value
        }
        leaf => leaf,
    }
}

/// Rewrite a possibly-tagged value, re-tagging the result's leaves.
///
/// Canonical rewriters run through this so a pair-wrapped short form turns
/// into a structured record whose leaves all carry the original tag.
pub fn transform_sourced(value: Value, rewrite: &dyn Fn(Value) -> Value) -> Value {
    match value {
        Value::Sourced(sourced) => attach_source(rewrite(sourced.value), &sourced.source),
        other => rewrite(other),
    }
}

/// Fallible flavour of [`transform_sourced`].
pub fn try_transform_sourced<E>(
    value: Value,
    rewrite: &dyn Fn(Value) -> Result<Value, E>,
) -> Result<Value, E> {
    match value {
        Value::Sourced(sourced) => Ok(attach_source(rewrite(sourced.value)?, &sourced.source)),
        other => rewrite(other),
    }
}
