//! The canonicalizer: per-pattern rewriters that fold every accepted input
//! form of a field into its single normal form.
//!
//! Rewriters run in one post-order pass driven by pattern dispatch: the
//! first pattern matching the current path owns the node (and recurses
//! itself where nested patterns apply, e.g. inside a service). Rewriters
//! are idempotent and provenance-transparent: a pair-wrapped short form
//! becomes a structured record whose leaves carry the original tag.

use crate::error::LoadError;
use flotilla_tree::{attach_source, try_transform_sourced, Mapping, TreePath, Value};
use once_cell::sync::Lazy;

type TransformFn = fn(Value, &TreePath, bool) -> Result<Value, LoadError>;

static TRANSFORMERS: Lazy<Vec<(TreePath, TransformFn)>> = Lazy::new(|| {
    let p = TreePath::from;
    vec![
        (p("services.*"), transform_service as TransformFn),
        (p("services.*.build"), transform_build),
        (p("services.*.build.secrets.*"), transform_file_mount),
        (p("services.*.build.additional_contexts"), transform_key_value),
        (p("services.*.build.ssh"), transform_ssh),
        (p("services.*.build.ulimits.*"), transform_ulimits),
        (p("services.*.depends_on"), transform_depends_on),
        (p("services.*.env_file"), transform_env_file),
        (p("services.*.extends"), transform_extends),
        (p("services.*.networks"), transform_service_networks),
        (p("services.*.volumes.*"), transform_volume_mount),
        (p("services.*.devices.*"), transform_device_mapping),
        (p("services.*.secrets.*"), transform_file_mount),
        (p("services.*.configs.*"), transform_file_mount),
        (p("services.*.ports"), transform_ports),
        (p("services.*.dns"), transform_string_or_list),
        (p("services.*.label_file"), transform_string_or_list),
        (p("services.*.ulimits.*"), transform_ulimits),
        (p("volumes.*"), transform_maybe_external),
        (p("networks.*"), transform_maybe_external),
        (p("secrets.*"), transform_maybe_external),
        (p("configs.*"), transform_maybe_external),
        (p("include.*"), transform_include),
    ]
});

/// Rewrite a model into canonical syntax.
pub fn canonical(model: Value, ignore_parse_error: bool) -> Result<Value, LoadError> {
    transform(model, &TreePath::new(), ignore_parse_error)
}

fn transform(value: Value, path: &TreePath, ignore_parse_error: bool) -> Result<Value, LoadError> {
    for (pattern, transformer) in TRANSFORMERS.iter() {
        if path.matches(pattern) {
            let original = value.clone();
            return match try_transform_sourced(value, &|v| {
                transformer(v, path, ignore_parse_error)
            }) {
                Ok(rewritten) => Ok(rewritten),
                Err(_) if ignore_parse_error => Ok(original),
                Err(e) => Err(e),
            };
        }
    }
    match value {
        Value::Mapping(entries) => transform_mapping(entries, path, ignore_parse_error),
        Value::Sequence(items) => transform_sequence(items, path, ignore_parse_error),
        other => Ok(other),
    }
}

fn transform_mapping(
    entries: Mapping,
    path: &TreePath,
    ignore_parse_error: bool,
) -> Result<Value, LoadError> {
    let mut out = Mapping::with_capacity(entries.len());
    for (key, value) in entries {
        let child = path.next(&key);
        out.insert(key, transform(value, &child, ignore_parse_error)?);
    }
    Ok(Value::Mapping(out))
}

fn transform_sequence(
    items: Vec<Value>,
    path: &TreePath,
    ignore_parse_error: bool,
) -> Result<Value, LoadError> {
    let child = path.next("[]");
    items
        .into_iter()
        .map(|item| transform(item, &child, ignore_parse_error))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Sequence)
}

fn transform_service(value: Value, path: &TreePath, ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::Mapping(entries) => transform_mapping(entries, path, ignore),
        Value::Null => Ok(Value::Null),
        other => Err(LoadError::syntax(path, &other, "service")),
    }
}

fn transform_build(value: Value, path: &TreePath, ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::String(context) => Ok(Value::mapping_from([("context", Value::String(context))])),
        Value::Mapping(entries) => transform_mapping(entries, path, ignore),
        other => Err(LoadError::syntax(path, &other, "build")),
    }
}

fn transform_string_or_list(value: Value, _path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::String(s) => Ok(Value::Sequence(vec![Value::String(s)])),
        other => Ok(other),
    }
}

fn transform_env_file(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    convert_into_sequence(value, |i, entry| {
        transform_env_file_value(entry, &path.next_index(i))
    })
}

fn transform_env_file_value(value: Value, path: &TreePath) -> Result<Value, LoadError> {
    match value {
        Value::String(file) => Ok(Value::mapping_from([
            ("path", Value::String(file)),
            ("required", Value::Bool(true)),
        ])),
        Value::Mapping(mut entries) => {
            if !entries.contains_key("required") {
                set_mapping_value(&mut entries, "required", Value::Bool(true));
            }
            Ok(Value::Mapping(entries))
        }
        other => Err(LoadError::syntax(path, &other, "env_file")),
    }
}

fn transform_depends_on(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::Sequence(items) => {
            let mut out = Mapping::with_capacity(items.len());
            for item in items {
                let name = item
                    .as_str()
                    .ok_or_else(|| LoadError::syntax(path, &item, "depends_on"))?
                    .to_owned();
                let record = Value::mapping_from([
                    ("condition", Value::from("service_started")),
                    ("required", Value::Bool(true)),
                    ("restart", Value::Bool(false)),
                ]);
                let record = match item {
                    Value::Sourced(sourced) => attach_source(record, &sourced.source),
                    _ => record,
                };
                out.insert(name, record);
            }
            Ok(Value::Mapping(out))
        }
        Value::Mapping(entries) => {
            let mut out = Mapping::with_capacity(entries.len());
            for (name, entry) in entries {
                let entry = try_transform_sourced(entry, &|v| match v {
                    Value::Mapping(mut record) => {
                        if !record.contains_key("condition") {
                            set_mapping_value(&mut record, "condition", Value::from("service_started"));
                        }
                        if !record.contains_key("required") {
                            set_mapping_value(&mut record, "required", Value::Bool(true));
                        }
                        Ok(Value::Mapping(record))
                    }
                    Value::Null => Ok(Value::mapping_from([
                        ("condition", Value::from("service_started")),
                        ("required", Value::Bool(true)),
                    ])),
                    other => Err(LoadError::syntax(&path.next(&name), &other, "depends_on")),
                })?;
                out.insert(name, entry);
            }
            Ok(Value::Mapping(out))
        }
        other => Err(LoadError::syntax(path, &other, "depends_on")),
    }
}

fn transform_extends(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::String(service) => Ok(Value::mapping_from([("service", Value::String(service))])),
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        other => Err(LoadError::syntax(path, &other, "extends")),
    }
}

fn transform_service_networks(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::Sequence(items) => {
            let mut out = Mapping::with_capacity(items.len());
            for item in items {
                let name = item
                    .as_str()
                    .ok_or_else(|| LoadError::syntax(path, &item, "networks"))?
                    .to_owned();
                let entry = match item {
                    Value::Sourced(sourced) => attach_source(Value::Null, &sourced.source),
                    _ => Value::Null,
                };
                out.insert(name, entry);
            }
            Ok(Value::Mapping(out))
        }
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        other => Err(LoadError::syntax(path, &other, "networks")),
    }
}

fn transform_file_mount(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::String(source) => Ok(Value::mapping_from([("source", Value::String(source))])),
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        other => Err(LoadError::syntax(path, &other, "file reference")),
    }
}

fn transform_key_value(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    convert_into_mapping(value, &|s| match s.split_once('=') {
        Some((key, val)) => Ok((key.to_owned(), Value::from(val))),
        None => Err(LoadError::Model(format!(
            "{path}: invalid syntax {s:?}, expected KEY=VALUE"
        ))),
    })
}

fn transform_ssh(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        Value::Sequence(_) => convert_into_mapping(value, &|s| match s.split_once('=') {
            Some((id, key_path)) => Ok((id.to_owned(), Value::from(key_path))),
            // `default` stands alone, everything else needs an explicit path.
            None if s == "default" => Ok((s.to_owned(), Value::Null)),
            None => Err(LoadError::Model(format!("{path}: invalid ssh key {s:?}"))),
        }),
        other => Err(LoadError::syntax(path, &other, "ssh")),
    }
}

fn transform_ulimits(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::Integer(_) | Value::String(_) => Ok(value),
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        other => Err(LoadError::syntax(path, &other, "ulimits")),
    }
}

fn transform_ports(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    convert_into_sequence(value, |i, entry| {
        let entry_path = path.next_index(i);
        match entry {
            Value::Integer(port) => Ok(Value::mapping_from([
                ("mode", Value::from("ingress")),
                ("target", Value::Integer(port)),
                ("protocol", Value::from("tcp")),
            ])),
            Value::String(spec) => parse_port_spec(&spec, &entry_path),
            Value::Mapping(entries) => Ok(Value::Mapping(entries)),
            other => Err(LoadError::syntax(&entry_path, &other, "port")),
        }
    })
}

fn parse_port_spec(spec: &str, path: &TreePath) -> Result<Value, LoadError> {
    let (address, protocol) = match spec.rsplit_once('/') {
        Some((address, protocol)) => (address, protocol),
        None => (spec, "tcp"),
    };
    let parts: Vec<&str> = address.split(':').collect();
    let (host_ip, published, target) = match parts.as_slice() {
        [target] => (None, None, *target),
        [published, target] => (None, Some(*published), *target),
        [host_ip, published, target] => (Some(*host_ip), Some(*published), *target),
        _ => {
            return Err(LoadError::Model(format!(
                "{path}: invalid port specification {spec:?}"
            )))
        }
    };

    let mut record = Mapping::new();
    if let Some(host_ip) = host_ip {
        record.insert("host_ip".into(), Value::from(host_ip));
    }
    record.insert("mode".into(), Value::from("ingress"));
    // Keep the string form for a target that still contains a template or a
    // range; the cast table settles the type after interpolation.
    let target = match target.parse::<i64>() {
        Ok(port) => Value::Integer(port),
        Err(_) => Value::from(target),
    };
    record.insert("target".into(), target);
    if let Some(published) = published {
        if !published.is_empty() {
            record.insert("published".into(), Value::from(published));
        }
    }
    record.insert("protocol".into(), Value::from(protocol));
    Ok(Value::Mapping(record))
}

fn transform_volume_mount(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::String(spec) => parse_volume_spec(&spec, path),
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        other => Err(LoadError::syntax(path, &other, "volume mount")),
    }
}

fn parse_volume_spec(spec: &str, path: &TreePath) -> Result<Value, LoadError> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (source, target, mode) = match parts.as_slice() {
        [target] => (None, *target, None),
        [source, target] => (Some(*source), *target, None),
        [source, target, mode] => (Some(*source), *target, Some(*mode)),
        _ => {
            return Err(LoadError::Model(format!(
                "{path}: invalid volume specification {spec:?}"
            )))
        }
    };

    let is_bind = source
        .map(|s| s.starts_with('/') || s.starts_with('.') || s.starts_with('~'))
        .unwrap_or(false);

    let mut record = Mapping::new();
    record.insert(
        "type".into(),
        Value::from(if is_bind { "bind" } else { "volume" }),
    );
    if let Some(source) = source {
        record.insert("source".into(), Value::from(source));
    }
    record.insert("target".into(), Value::from(target));
    if let Some(mode) = mode {
        for option in mode.split(',') {
            match option {
                "ro" => {
                    record.insert("read_only".into(), Value::Bool(true));
                }
                "rw" => {}
                other => {
                    return Err(LoadError::Model(format!(
                        "{path}: invalid volume mode {other:?} in {spec:?}"
                    )))
                }
            }
        }
    }
    if is_bind {
        record.insert(
            "bind".into(),
            Value::mapping_from([("create_host_path", Value::Bool(true))]),
        );
    }
    Ok(Value::Mapping(record))
}

fn transform_device_mapping(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::String(spec) => {
            let parts: Vec<&str> = spec.split(':').collect();
            match parts.as_slice() {
                [source] => Ok(Value::mapping_from([
                    ("source", Value::from(*source)),
                    ("target", Value::from(*source)),
                ])),
                [source, target] => Ok(Value::mapping_from([
                    ("source", Value::from(*source)),
                    ("target", Value::from(*target)),
                ])),
                [source, target, permissions] => Ok(Value::mapping_from([
                    ("source", Value::from(*source)),
                    ("target", Value::from(*target)),
                    ("permissions", Value::from(*permissions)),
                ])),
                _ => Err(LoadError::Model(format!(
                    "{path}: invalid device specification {spec:?}"
                ))),
            }
        }
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        other => Err(LoadError::syntax(path, &other, "device")),
    }
}

fn transform_maybe_external(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Mapping(mut entries) => {
            // Legacy form: `external: {name: …}` folds into a boolean plus
            // a hoisted name.
            let legacy_name = match entries.get("external").map(Value::unsourced) {
                Some(Value::Mapping(external)) => {
                    external.get("name").cloned()
                }
                _ => None,
            };
            if let Some(name) = legacy_name {
                entries.insert("external".into(), Value::Bool(true));
                if !entries.contains_key("name") {
                    entries.insert("name".into(), name);
                }
            }
            Ok(Value::Mapping(entries))
        }
        other => Err(LoadError::syntax(path, &other, path.parent().last())),
    }
}

fn transform_include(value: Value, path: &TreePath, _ignore: bool) -> Result<Value, LoadError> {
    match value {
        Value::String(file) => Ok(Value::mapping_from([("path", Value::String(file))])),
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        other => Err(LoadError::syntax(path, &other, "include")),
    }
}

/// Coerce scalar-or-sequence into a sequence, rewriting each element.
fn convert_into_sequence(
    value: Value,
    rewrite: impl Fn(usize, Value) -> Result<Value, LoadError>,
) -> Result<Value, LoadError> {
    let items = match value {
        Value::Null => return Ok(Value::Null),
        Value::Sequence(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| try_transform_sourced(item, &|v| rewrite(i, v)))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Sequence)
}

/// Coerce a sequence of `KEY=VALUE` strings into a mapping; mappings pass
/// through, anything else degrades to null.
fn convert_into_mapping(
    value: Value,
    parse: &dyn Fn(&str) -> Result<(String, Value), LoadError>,
) -> Result<Value, LoadError> {
    match value {
        Value::Sequence(items) => {
            let mut out = Mapping::with_capacity(items.len());
            for item in items {
                let (tag, inner) = match item {
                    Value::Sourced(sourced) => (Some(sourced.source), sourced.value),
                    other => (None, other),
                };
                let raw = inner.scalar_to_string().unwrap_or_default();
                let (key, parsed) = parse(&raw)?;
                let parsed = match tag {
                    Some(tag) => attach_source(parsed, &tag),
                    None => parsed,
                };
                out.insert(key, parsed);
            }
            Ok(Value::Mapping(out))
        }
        Value::Mapping(entries) => Ok(Value::Mapping(entries)),
        _ => Ok(Value::Null),
    }
}

/// Attach the provenance of an existing sibling to a default the rewriter
/// is inserting, so synthesized fields read as coming from the same file.
fn set_mapping_value(entries: &mut Mapping, key: &str, value: Value) {
    let sibling_tag = entries.values().find_map(|v| match v {
        Value::Sourced(sourced) => Some(sourced.source.clone()),
        _ => None,
    });
    let value = match sibling_tag {
        Some(tag) => attach_source(value, &tag),
        None => value,
    };
    entries.insert(key.to_owned(), value);
}

/// Default resource names: `<project>_<key>`, or the bare key for external
/// resources. The project name is read from the model's top-level `name`.
pub fn set_name_from_key(model: &mut Value) {
    let project = model
        .get("name")
        .map(Value::unsourced)
        .and_then(|v| v.scalar_to_string());
    let entries = match model.as_mapping_mut() {
        Some(entries) => entries,
        None => return,
    };
    for section in ["volumes", "networks", "secrets", "configs"] {
        let resources = match entries.get_mut(section).and_then(Value::as_mapping_mut) {
            Some(resources) => resources,
            None => continue,
        };
        let keys: Vec<String> = resources.keys().cloned().collect();
        for key in keys {
            let resource = match resources.get_mut(&key).and_then(Value::as_mapping_mut) {
                Some(resource) => resource,
                None => continue,
            };
            if resource.contains_key("name") {
                continue;
            }
            let external = resource
                .get("external")
                .map(Value::unsourced)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let name = if external {
                key.clone()
            } else {
                match &project {
                    Some(project) => format!("{project}_{key}"),
                    None => key.clone(),
                }
            };
            set_mapping_value(resource, "name", Value::String(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_tree::{parse_yaml, strip_sources_with};

    fn plain(value: Value) -> Value {
        strip_sources_with(value).0
    }

    fn canon(yaml: &str) -> Value {
        canonical(parse_yaml(yaml).unwrap(), false).unwrap()
    }

    fn service_field(model: &Value, field: &str) -> Value {
        model
            .value_at(&TreePath::from_parts(["services", "test", field]))
            .unwrap()
            .clone()
    }

    #[test]
    fn test_env_file_scalar() {
        let model = canon("services:\n  test:\n    env_file: foo.env\n");
        assert_eq!(
            service_field(&model, "env_file"),
            Value::Sequence(vec![Value::mapping_from([
                ("path", Value::from("foo.env")),
                ("required", Value::Bool(true)),
            ])])
        );
    }

    #[test]
    fn test_env_file_record_gets_required_default() {
        let model = canon(
            "services:\n  test:\n    env_file:\n      - path: foo.env\n      - path: bar.env\n        required: false\n",
        );
        assert_eq!(
            service_field(&model, "env_file"),
            Value::Sequence(vec![
                Value::mapping_from([
                    ("path", Value::from("foo.env")),
                    ("required", Value::Bool(true)),
                ]),
                Value::mapping_from([
                    ("path", Value::from("bar.env")),
                    ("required", Value::Bool(false)),
                ]),
            ])
        );
    }

    #[test]
    fn test_env_file_invalid_type() {
        let err = canonical(
            parse_yaml("services:\n  test:\n    env_file: true\n").unwrap(),
            false,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "services.test.env_file.0: invalid type bool for env_file"
        );
    }

    #[test]
    fn test_ignore_parse_error_retains_original() {
        let model = canonical(
            parse_yaml("services:\n  test:\n    env_file: true\n").unwrap(),
            true,
        )
        .unwrap();
        assert_eq!(service_field(&model, "env_file"), Value::Bool(true));
    }

    #[test]
    fn test_depends_on_list() {
        let model = canon("services:\n  test:\n    depends_on: [db, cache]\n");
        let expected_entry = Value::mapping_from([
            ("condition", Value::from("service_started")),
            ("required", Value::Bool(true)),
            ("restart", Value::Bool(false)),
        ]);
        assert_eq!(
            service_field(&model, "depends_on"),
            Value::mapping_from([
                ("db", expected_entry.clone()),
                ("cache", expected_entry),
            ])
        );
    }

    #[test]
    fn test_depends_on_mapping_defaults() {
        let model = canon(
            "services:\n  test:\n    depends_on:\n      db:\n        condition: service_healthy\n      cache:\n",
        );
        assert_eq!(
            service_field(&model, "depends_on"),
            Value::mapping_from([
                (
                    "db",
                    Value::mapping_from([
                        ("condition", Value::from("service_healthy")),
                        ("required", Value::Bool(true)),
                    ]),
                ),
                (
                    "cache",
                    Value::mapping_from([
                        ("condition", Value::from("service_started")),
                        ("required", Value::Bool(true)),
                    ]),
                ),
            ])
        );
    }

    #[test]
    fn test_ports_forms() {
        let model = canon(
            "services:\n  test:\n    ports:\n      - 8080\n      - \"80:8080\"\n      - \"127.0.0.1:5000:5000/udp\"\n",
        );
        assert_eq!(
            service_field(&model, "ports"),
            Value::Sequence(vec![
                Value::mapping_from([
                    ("mode", Value::from("ingress")),
                    ("target", Value::Integer(8080)),
                    ("protocol", Value::from("tcp")),
                ]),
                Value::mapping_from([
                    ("mode", Value::from("ingress")),
                    ("target", Value::Integer(8080)),
                    ("published", Value::from("80")),
                    ("protocol", Value::from("tcp")),
                ]),
                Value::mapping_from([
                    ("host_ip", Value::from("127.0.0.1")),
                    ("mode", Value::from("ingress")),
                    ("target", Value::Integer(5000)),
                    ("published", Value::from("5000")),
                    ("protocol", Value::from("udp")),
                ]),
            ])
        );
    }

    #[test]
    fn test_volume_short_syntax() {
        let model = canon(
            "services:\n  test:\n    volumes:\n      - /data\n      - db-data:/var/lib/db\n      - ./src:/app:ro\n",
        );
        assert_eq!(
            service_field(&model, "volumes"),
            Value::Sequence(vec![
                Value::mapping_from([
                    ("type", Value::from("volume")),
                    ("target", Value::from("/data")),
                ]),
                Value::mapping_from([
                    ("type", Value::from("volume")),
                    ("source", Value::from("db-data")),
                    ("target", Value::from("/var/lib/db")),
                ]),
                Value::mapping_from([
                    ("type", Value::from("bind")),
                    ("source", Value::from("./src")),
                    ("target", Value::from("/app")),
                    ("read_only", Value::Bool(true)),
                    (
                        "bind",
                        Value::mapping_from([("create_host_path", Value::Bool(true))]),
                    ),
                ]),
            ])
        );
    }

    #[test]
    fn test_ssh_and_additional_contexts() {
        let model = canon(
            "services:\n  test:\n    build:\n      context: .\n      ssh:\n        - default\n        - other=/home/me/.ssh/id\n      additional_contexts:\n        - base=registry/base\n",
        );
        let build = service_field(&model, "build");
        assert_eq!(
            build.get("ssh"),
            Some(&Value::mapping_from([
                ("default", Value::Null),
                ("other", Value::from("/home/me/.ssh/id")),
            ]))
        );
        assert_eq!(
            build.get("additional_contexts"),
            Some(&Value::mapping_from([("base", Value::from("registry/base"))]))
        );
    }

    #[test]
    fn test_build_context_shorthand() {
        let model = canon("services:\n  test:\n    build: ./dir\n");
        assert_eq!(
            service_field(&model, "build"),
            Value::mapping_from([("context", Value::from("./dir"))])
        );
    }

    #[test]
    fn test_dns_scalar_and_networks_list() {
        let model = canon(
            "services:\n  test:\n    dns: 8.8.8.8\n    networks:\n      - front\n      - back\n",
        );
        assert_eq!(
            service_field(&model, "dns"),
            Value::Sequence(vec![Value::from("8.8.8.8")])
        );
        assert_eq!(
            service_field(&model, "networks"),
            Value::mapping_from([("front", Value::Null), ("back", Value::Null)])
        );
    }

    #[test]
    fn test_include_scalar() {
        let model = canon("include:\n  - ../other/compose.yaml\n");
        assert_eq!(
            model.get("include"),
            Some(&Value::Sequence(vec![Value::mapping_from([(
                "path",
                Value::from("../other/compose.yaml"),
            )])]))
        );
    }

    #[test]
    fn test_external_legacy_form() {
        let model = canon("networks:\n  net:\n    external:\n      name: the-net\n");
        assert_eq!(
            model.value_at(&TreePath::from("networks.net")).unwrap(),
            &Value::mapping_from([
                ("external", Value::Bool(true)),
                ("name", Value::from("the-net")),
            ])
        );
    }

    #[test]
    fn test_canonical_is_idempotent() {
        let yaml = r#"
services:
  test:
    build: ./dir
    env_file: foo.env
    depends_on: [db]
    dns: 1.1.1.1
    ports:
      - "80:8080"
    volumes:
      - ./src:/app
    networks: [front]
networks:
  front:
    external:
      name: f
include:
  - other.yaml
"#;
        let once = canon(yaml);
        let twice = canonical(once.clone(), false).unwrap();
        assert_eq!(plain(once), plain(twice));
    }

    #[test]
    fn test_set_name_from_key() {
        let mut model = parse_yaml(
            "name: proj\nvolumes:\n  data: {}\n  ext:\n    external: true\n  named:\n    name: explicit\n",
        )
        .unwrap();
        set_name_from_key(&mut model);
        let volume_name = |key: &str| {
            model
                .value_at(&TreePath::from_parts(["volumes", key, "name"]))
                .unwrap()
                .as_str()
                .unwrap()
                .to_owned()
        };
        assert_eq!(volume_name("data"), "proj_data");
        assert_eq!(volume_name("ext"), "ext");
        assert_eq!(volume_name("named"), "explicit");
    }

    #[test]
    fn test_rewriter_preserves_provenance() {
        let tagged = flotilla_tree::attach_source(
            parse_yaml("services:\n  test:\n    env_file: foo.env\n").unwrap(),
            &flotilla_tree::SourceTag::new("left"),
        );
        let model = canonical(tagged, false).unwrap();
        let (model, tags) = strip_sources_with(model);
        assert_eq!(
            model.value_at(&TreePath::from("services.test.env_file.0.path")),
            Some(&Value::from("foo.env"))
        );
        assert_eq!(
            tags.get(&TreePath::from("services.test.env_file.0.path"))
                .map(|t| t.as_str()),
            Some("left")
        );
        assert_eq!(
            tags.get(&TreePath::from("services.test.env_file.0.required"))
                .map(|t| t.as_str()),
            Some("left")
        );
    }
}
