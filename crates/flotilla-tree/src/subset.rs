//! Structural helpers: recursive walk, subset projection, path wrapping.

use crate::value::{Mapping, Value};
use crate::TreePath;

/// Visit every node of `value` pre-order with its path.
pub fn walk(value: &Value, visit: &mut dyn FnMut(&TreePath, &Value)) {
    walk_inner(value, TreePath::new(), visit)
}

fn walk_inner(value: &Value, path: TreePath, visit: &mut dyn FnMut(&TreePath, &Value)) {
    visit(&path, value);
    match value {
        Value::Mapping(entries) => {
            for (key, child) in entries {
                walk_inner(child, path.next(key), visit);
            }
        }
        Value::Sequence(items) => {
            for (i, child) in items.iter().enumerate() {
                walk_inner(child, path.next_index(i), visit);
            }
        }
        _ => {}
    }
}

/// Build a nested mapping whose leaf at `path` is `value`.
///
/// `wrap_value_with_path("services.web", v)` produces
/// `{services: {web: v}}`. Inverse of [`unwrap_value_with_path`].
pub fn wrap_value_with_path(path: &TreePath, value: Value) -> Value {
    let mut wrapped = value;
    for part in path.parts().iter().rev() {
        let mut entries = Mapping::new();
        entries.insert(part.clone(), wrapped);
        wrapped = Value::Mapping(entries);
    }
    wrapped
}

/// Take apart a nested mapping built by [`wrap_value_with_path`].
pub fn unwrap_value_with_path(path: &TreePath, wrapped: &Value) -> Option<Value> {
    wrapped.value_at(path).cloned()
}

/// A shallow projection of a mapping containing only the listed sub-paths.
///
/// Intermediate mappings are created as needed; a sub-path whose chain is
/// broken anywhere prunes the whole branch from the result. Sequences are
/// copied shallowly. Returns an empty mapping when `value` is not a mapping.
pub fn extract_subset(value: &Value, subpaths: &[TreePath]) -> Value {
    let source = match value.as_mapping() {
        Some(entries) => entries,
        None => return Value::Mapping(Mapping::new()),
    };

    let mut subset = Mapping::new();
    'subpath: for subpath in subpaths {
        let parts = subpath.parts();
        if parts.is_empty() {
            continue;
        }
        // Verify the full chain exists before touching the subset, so a
        // missing intermediate key prunes the whole branch.
        let mut src = source;
        for (i, part) in parts.iter().enumerate() {
            match src.get(part.as_str()) {
                None => {
                    subset.shift_remove(parts[0].as_str());
                    continue 'subpath;
                }
                Some(Value::Mapping(next)) if i < parts.len() - 1 => src = next,
                Some(_) if i < parts.len() - 1 => {
                    subset.shift_remove(parts[0].as_str());
                    continue 'subpath;
                }
                Some(_) => {}
            }
        }

        let mut src = source;
        let mut dst = &mut subset;
        for (i, part) in parts.iter().enumerate() {
            let found = src.get(part.as_str()).expect("chain verified above");
            if i < parts.len() - 1 {
                src = found.as_mapping().expect("chain verified above");
                dst = dst
                    .entry(part.clone())
                    .or_insert_with(|| Value::Mapping(Mapping::new()))
                    .as_mapping_mut()
                    .expect("subset interior nodes are mappings");
            } else {
                dst.insert(part.clone(), found.clone());
            }
        }
    }
    Value::Mapping(subset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> TreePath {
        TreePath::from(s)
    }

    #[test]
    fn test_wrap_and_unwrap_value() {
        let path = p("services.service_1");
        for value in [
            Value::from("test"),
            Value::mapping_from([("key1", Value::from("value1")), ("key2", Value::from("value2"))]),
            Value::Null,
        ] {
            let model = wrap_value_with_path(&path, value.clone());
            assert_eq!(
                model,
                Value::mapping_from([(
                    "services",
                    Value::mapping_from([("service_1", value.clone())]),
                )])
            );
            assert_eq!(unwrap_value_with_path(&path, &model), Some(value));
        }
    }

    #[test]
    fn test_extract_subset_simple() {
        let value = Value::mapping_from([
            (
                "labels",
                Value::mapping_from([("test-label", Value::from("test"))]),
            ),
            ("x-test-field", Value::from("test")),
        ]);
        let subset = extract_subset(&value, &[p("labels")]);
        assert_eq!(
            subset,
            Value::mapping_from([(
                "labels",
                Value::mapping_from([("test-label", Value::from("test"))]),
            )])
        );
    }

    #[test]
    fn test_extract_subset_multiple_paths() {
        let value = Value::mapping_from([
            (
                "environment",
                Value::mapping_from([("TESTVAR", Value::from("test"))]),
            ),
            ("env_file", Value::Sequence(vec![Value::from("example1.env")])),
            ("x-test-field", Value::from("test")),
        ]);
        let subset = extract_subset(&value, &[p("environment"), p("env_file")]);
        assert_eq!(
            subset,
            Value::mapping_from([
                (
                    "environment",
                    Value::mapping_from([("TESTVAR", Value::from("test"))]),
                ),
                ("env_file", Value::Sequence(vec![Value::from("example1.env")])),
            ])
        );
    }

    #[test]
    fn test_extract_subset_nested() {
        let value = Value::mapping_from([
            ("scale", Value::Integer(3)),
            (
                "deploy",
                Value::mapping_from([
                    ("replicas", Value::Integer(3)),
                    ("x-test-field", Value::from("test")),
                ]),
            ),
            ("x-test-field", Value::from("test")),
        ]);
        let subset = extract_subset(&value, &[p("scale"), p("deploy.replicas")]);
        assert_eq!(
            subset,
            Value::mapping_from([
                ("scale", Value::Integer(3)),
                ("deploy", Value::mapping_from([("replicas", Value::Integer(3))])),
            ])
        );
    }

    #[test]
    fn test_extract_subset_keeps_null_leaf() {
        let value = Value::mapping_from([
            ("environment", Value::Null),
            ("x-test-field", Value::from("test")),
        ]);
        let subset = extract_subset(&value, &[p("environment"), p("env_file")]);
        assert_eq!(subset, Value::mapping_from([("environment", Value::Null)]));
    }

    #[test]
    fn test_extract_subset_prunes_broken_branch() {
        let value = Value::mapping_from([
            ("scale", Value::Integer(3)),
            ("deploy", Value::Null),
            ("x-test-field", Value::from("test")),
        ]);
        let subset = extract_subset(&value, &[p("scale"), p("deploy.replicas")]);
        assert_eq!(subset, Value::mapping_from([("scale", Value::Integer(3))]));
    }

    #[test]
    fn test_walk_visits_with_paths() {
        let value = Value::mapping_from([(
            "services",
            Value::mapping_from([("web", Value::mapping_from([("image", Value::from("nginx"))]))]),
        )]);
        let mut seen = Vec::new();
        walk(&value, &mut |path, _| seen.push(path.to_string()));
        assert_eq!(seen, vec!["", "services", "services.web", "services.web.image"]);
    }
}
