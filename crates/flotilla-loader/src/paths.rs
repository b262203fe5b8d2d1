//! Relative-path resolution for the path-bearing model fields.
//!
//! Positions are a fixed table; resolution is lexical (files need not exist
//! yet). A sub-tree can carry its own working directory, delivered as a
//! provenance annotation by the caller and passed here as a path-to-directory
//! side map, which takes precedence over the document base.

use crate::error::LoadError;
use flotilla_tree::{Mapping, SourceTag, TreePath, Value};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathKind {
    /// A plain file path.
    File,
    /// A build context: URLs and git remotes stay untouched.
    Context,
    /// A bind-mount source: resolved only for bind-type mounts.
    MountSource,
}

static PATH_FIELDS: Lazy<Vec<(TreePath, PathKind)>> = Lazy::new(|| {
    let p = TreePath::from;
    vec![
        (p("services.*.env_file.[].path"), PathKind::File),
        (p("services.*.label_file.[]"), PathKind::File),
        (p("services.*.extends.file"), PathKind::File),
        (p("services.*.build.context"), PathKind::Context),
        (p("services.*.volumes.[].source"), PathKind::MountSource),
        (p("configs.*.file"), PathKind::File),
        (p("secrets.*.file"), PathKind::File),
    ]
});

/// Resolve every registered relative path against `base`, or against the
/// per-subtree override recorded for that leaf.
pub fn resolve_relative_paths(
    model: Value,
    base: &Path,
    overrides: &IndexMap<TreePath, SourceTag>,
) -> Result<Value, LoadError> {
    resolve_value(model, &TreePath::new(), base, overrides, None)
}

fn resolve_value(
    value: Value,
    path: &TreePath,
    base: &Path,
    overrides: &IndexMap<TreePath, SourceTag>,
    parent: Option<&Value>,
) -> Result<Value, LoadError> {
    match value {
        Value::Mapping(entries) => {
            let snapshot = Value::Mapping(entries.clone());
            let mut out = Mapping::with_capacity(entries.len());
            for (key, child) in entries {
                let child_path = path.next(&key);
                out.insert(
                    key,
                    resolve_value(child, &child_path, base, overrides, Some(&snapshot))?,
                );
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(items) => {
            let items = items
                .into_iter()
                .enumerate()
                .map(|(i, child)| {
                    resolve_value(child, &path.next_index(i), base, overrides, parent)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Sequence(items))
        }
        Value::Sourced(sourced) => {
            let inner = resolve_value(sourced.value, path, base, overrides, parent)?;
            Ok(flotilla_tree::Sourced::new(inner, sourced.source))
        }
        Value::String(s) => match kind_for(path) {
            Some(kind) if should_resolve(kind, &s, parent) => {
                let dir = overrides
                    .get(path)
                    .map(|tag| PathBuf::from(tag.as_str()))
                    .unwrap_or_else(|| base.to_path_buf());
                Ok(Value::String(resolve_one(&s, &dir)))
            }
            _ => Ok(Value::String(s)),
        },
        other => Ok(other),
    }
}

fn kind_for(path: &TreePath) -> Option<PathKind> {
    PATH_FIELDS
        .iter()
        .find(|(pattern, _)| path.matches(pattern))
        .map(|(_, kind)| *kind)
}

fn should_resolve(kind: PathKind, value: &str, parent: Option<&Value>) -> bool {
    if value.is_empty() || Path::new(value).is_absolute() {
        return false;
    }
    match kind {
        PathKind::File => true,
        PathKind::Context => !value.contains("://") && !value.starts_with("git@"),
        PathKind::MountSource => {
            let mount_type = parent
                .and_then(|p| p.get("type"))
                .map(Value::unsourced)
                .and_then(Value::as_str);
            mount_type == Some("bind")
        }
    }
}

fn resolve_one(value: &str, dir: &Path) -> String {
    clean_path(&dir.join(value)).display().to_string()
}

/// Lexical normalization: fold `.` and `..` without touching the
/// filesystem.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}
