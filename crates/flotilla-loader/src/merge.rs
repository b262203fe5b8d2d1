//! The override-merge engine.
//!
//! [`merge`] folds an overlay document over a base document. The default
//! rules are: mappings merge recursively, sequences append, everything else
//! is replaced by the overlay. A table of per-path specials handles the
//! fields whose semantics differ: `KEY=VALUE` families normalize to a
//! sequence before concatenation, identity-keyed sequences (ports, mounts,
//! ipam pools) merge element-wise, and single-value sequences (command,
//! entrypoint) replace.
//!
//! [`enforce_unicity`] runs after the fold and collapses the sequences that
//! are really sets: duplicates are dropped order-stably, the last value
//! winning at the first position its key appeared.
//!
//! Provenance: each leaf keeps the tag of the document that supplied its
//! final value; on replacement the overlay's tag wins.

use crate::error::LoadError;
use flotilla_tree::{Mapping, Sourced, TreePath, Value};
use once_cell::sync::Lazy;

type MergeFn = fn(&Value, &Value, &TreePath) -> Result<Value, LoadError>;
type KeyFn = fn(&Value) -> Option<String>;

static MERGE_SPECIALS: Lazy<Vec<(TreePath, MergeFn)>> = Lazy::new(|| {
    let p = TreePath::from;
    vec![
        (p("services.*.annotations"), merge_to_sequence as MergeFn),
        (p("services.*.environment"), merge_to_sequence),
        (p("services.*.labels"), merge_to_sequence),
        (p("services.*.build.args"), merge_to_sequence),
        (p("services.*.build.labels"), merge_to_sequence),
        (p("networks.*.labels"), merge_to_sequence),
        (p("volumes.*.labels"), merge_to_sequence),
        (p("configs.*.labels"), merge_to_sequence),
        (p("secrets.*.labels"), merge_to_sequence),
        (p("services.*.command"), merge_replace),
        (p("services.*.entrypoint"), merge_replace),
        (p("services.*.healthcheck.test"), merge_replace),
        (p("services.*.ulimits.*"), merge_replace),
        (p("services.*.ports"), merge_ports),
        (p("services.*.volumes"), merge_volumes),
        (p("networks.*.ipam.config"), merge_ipam_pools),
    ]
});

/// Sequences deduplicated by the key before `=`.
static KV_UNICITY: Lazy<Vec<TreePath>> = Lazy::new(|| {
    [
        "services.*.annotations",
        "services.*.environment",
        "services.*.labels",
        "services.*.build.args",
        "services.*.build.labels",
        "networks.*.labels",
        "volumes.*.labels",
        "configs.*.labels",
        "secrets.*.labels",
    ]
    .into_iter()
    .map(TreePath::from)
    .collect()
});

/// Sequences deduplicated by their full scalar value.
static SET_UNICITY: Lazy<Vec<TreePath>> = Lazy::new(|| {
    [
        "services.*.cap_add",
        "services.*.cap_drop",
        "services.*.dns",
        "services.*.dns_opt",
        "services.*.dns_search",
        "services.*.tmpfs",
    ]
    .into_iter()
    .map(TreePath::from)
    .collect()
});

/// Merge `overlay` over `base`. Both trees are expected in canonical form
/// and may carry provenance pairs.
pub fn merge(base: &Value, overlay: &Value) -> Result<Value, LoadError> {
    merge_value(base, overlay, &TreePath::new())
}

/// The merge used by `extends`: the current service folds over the cleaned
/// base definition under the same per-field rules.
pub fn extend_service(base: &Value, overlay: &Value) -> Result<Value, LoadError> {
    // Rules are keyed by full model paths; service bodies merge under a
    // surrogate service position.
    let path = TreePath::from("services.*");
    merge_value(base, overlay, &path)
}

fn merge_value(base: &Value, overlay: &Value, path: &TreePath) -> Result<Value, LoadError> {
    for (pattern, special) in MERGE_SPECIALS.iter() {
        if path.matches(pattern) {
            return special(base, overlay, path);
        }
    }
    match (base, overlay) {
        (Value::Mapping(base_entries), Value::Mapping(overlay_entries)) => {
            let mut merged = base_entries.clone();
            for (key, overlay_value) in overlay_entries {
                let merged_value = match base_entries.get(key) {
                    Some(base_value) => {
                        merge_value(base_value, overlay_value, &path.next(key))?
                    }
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Ok(Value::Mapping(merged))
        }
        (Value::Sequence(base_items), Value::Sequence(overlay_items)) => {
            let mut merged = base_items.clone();
            merged.extend(overlay_items.iter().cloned());
            Ok(Value::Sequence(merged))
        }
        _ => Ok(overlay.clone()),
    }
}

fn merge_replace(_base: &Value, overlay: &Value, _path: &TreePath) -> Result<Value, LoadError> {
    Ok(overlay.clone())
}

/// Normalize both sides to a sequence of `KEY=VALUE` entries and append.
/// Deduplication by key happens in [`enforce_unicity`].
fn merge_to_sequence(base: &Value, overlay: &Value, _path: &TreePath) -> Result<Value, LoadError> {
    let mut items = to_kv_sequence(base);
    items.extend(to_kv_sequence(overlay));
    Ok(Value::Sequence(items))
}

fn to_kv_sequence(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items.clone(),
        Value::Mapping(entries) => entries
            .iter()
            .map(|(key, entry)| {
                let (tag, inner) = match entry {
                    Value::Sourced(sourced) => (Some(&sourced.source), &sourced.value),
                    other => (None, other),
                };
                let line = match inner {
                    // A null value means "key without value": the key alone.
                    Value::Null => key.clone(),
                    other => format!("{key}={}", other.scalar_to_string().unwrap_or_default()),
                };
                match tag {
                    Some(tag) => Sourced::new(Value::String(line), tag.clone()),
                    None => Value::String(line),
                }
            })
            .collect(),
        other => vec![other.clone()],
    }
}

fn merge_ports(base: &Value, overlay: &Value, path: &TreePath) -> Result<Value, LoadError> {
    merge_keyed_sequence(base, overlay, path, port_key)
}

fn merge_volumes(base: &Value, overlay: &Value, path: &TreePath) -> Result<Value, LoadError> {
    merge_keyed_sequence(base, overlay, path, volume_key)
}

fn merge_ipam_pools(base: &Value, overlay: &Value, path: &TreePath) -> Result<Value, LoadError> {
    merge_keyed_sequence(base, overlay, path, subnet_key)
}

/// Element-wise merge for sequences whose elements have an identity.
fn merge_keyed_sequence(
    base: &Value,
    overlay: &Value,
    path: &TreePath,
    key_of: KeyFn,
) -> Result<Value, LoadError> {
    let base_items = match base {
        Value::Sequence(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };
    let overlay_items: Vec<Value> = match overlay {
        Value::Sequence(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };

    let mut merged = base_items;
    let element_path = path.next("[]");
    for overlay_item in overlay_items {
        let key = key_of(overlay_item.unsourced());
        let position = key.as_ref().and_then(|key| {
            merged
                .iter()
                .position(|existing| key_of(existing.unsourced()).as_ref() == Some(key))
        });
        match position {
            Some(i) => merged[i] = merge_value(&merged[i], &overlay_item, &element_path)?,
            None => merged.push(overlay_item),
        }
    }
    Ok(Value::Sequence(merged))
}

fn port_key(value: &Value) -> Option<String> {
    let entries = value.as_mapping()?;
    let field = |name: &str| {
        entries
            .get(name)
            .map(Value::unsourced)
            .and_then(Value::scalar_to_string)
            .unwrap_or_default()
    };
    Some(format!(
        "{}/{}/{}/{}",
        field("target"),
        field("published"),
        field("protocol"),
        field("host_ip"),
    ))
}

fn volume_key(value: &Value) -> Option<String> {
    value
        .as_mapping()?
        .get("target")
        .map(Value::unsourced)
        .and_then(Value::scalar_to_string)
}

fn subnet_key(value: &Value) -> Option<String> {
    value
        .as_mapping()?
        .get("subnet")
        .map(Value::unsourced)
        .and_then(Value::scalar_to_string)
}

/// Collapse sequences that must be sets, order-stably.
pub fn enforce_unicity(model: Value) -> Result<Value, LoadError> {
    unicity_value(model, &TreePath::new())
}

fn unicity_value(value: Value, path: &TreePath) -> Result<Value, LoadError> {
    match value {
        Value::Mapping(entries) => {
            let mut out = Mapping::with_capacity(entries.len());
            for (key, child) in entries {
                let child_path = path.next(&key);
                out.insert(key, unicity_value(child, &child_path)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(items) => {
            let element_path = path.next("[]");
            let items = items
                .into_iter()
                .map(|item| unicity_value(item, &element_path))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Sequence(dedupe(items, path)))
        }
        other => Ok(other),
    }
}

fn dedupe(items: Vec<Value>, path: &TreePath) -> Vec<Value> {
    let key_of: Option<Box<dyn Fn(&Value) -> Option<String>>> =
        if KV_UNICITY.iter().any(|pattern| path.matches(pattern)) {
            Some(Box::new(|item: &Value| {
                item.unsourced()
                    .scalar_to_string()
                    .map(|line| match line.split_once('=') {
                        Some((key, _)) => key.to_owned(),
                        None => line,
                    })
            }))
        } else if SET_UNICITY.iter().any(|pattern| path.matches(pattern)) {
            Some(Box::new(|item: &Value| {
                item.unsourced().scalar_to_string()
            }))
        } else if path.matches(&TreePath::from("services.*.ports")) {
            Some(Box::new(|item: &Value| port_key(item.unsourced())))
        } else if path.matches(&TreePath::from("services.*.volumes")) {
            Some(Box::new(|item: &Value| volume_key(item.unsourced())))
        } else if path.matches(&TreePath::from("networks.*.ipam.config")) {
            Some(Box::new(|item: &Value| subnet_key(item.unsourced())))
        } else {
            None
        };

    let key_of = match key_of {
        Some(f) => f,
        None => return items,
    };

    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    let mut seen: Vec<(String, usize)> = Vec::new();
    for item in items {
        match key_of(&item) {
            Some(key) => match seen.iter().find(|(k, _)| *k == key) {
                Some((_, index)) => {
                    // Last occurrence wins, first position kept.
                    out[*index] = item;
                }
                None => {
                    seen.push((key, out.len()));
                    out.push(item);
                }
            },
            None => out.push(item),
        }
    }
    out
}
