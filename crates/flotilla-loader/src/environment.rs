//! Environment and label resolution.
//!
//! Services may draw environment variables and labels from dotenv-style
//! files (`env_file`, `label_file`). Files are read raw: values are NOT
//! interpolated here. Single keys are expanded lazily at lookup time,
//! under whatever scope is active, so an unresolvable reference in one
//! entry never breaks the lookup of another.

use crate::error::LoadError;
use flotilla_tree::Value;
use indexmap::IndexMap;
use std::fs;
use std::path::Path;

/// Parse dotenv content: `KEY=VALUE` lines, `#` comments, blank lines,
/// optional `export ` prefix, single/double quote trimming. A bare `KEY`
/// line inherits the base environment when set there, otherwise it is
/// skipped. Later entries override earlier ones.
pub fn parse_dotenv(
    content: &str,
    base: &dyn Fn(&str) -> Option<String>,
) -> IndexMap<String, String> {
    let mut entries = IndexMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                entries.insert(key.to_owned(), unquote(value.trim()).to_owned());
            }
            None => {
                if let Some(value) = base(line) {
                    entries.insert(line.to_owned(), value);
                }
            }
        }
    }
    entries
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    // Unquoted values may carry a trailing comment.
    match value.find(" #") {
        Some(i) => value[..i].trim_end(),
        None => value,
    }
}

/// The effective, uninterpolated environment of a canonicalized service
/// fragment `{environment, env_file}`.
///
/// File entries load first (in order, later files overriding earlier ones),
/// then explicit `environment` entries override file entries. A `None`
/// value marks a pass-through entry (`KEY` with no value), which lookups
/// treat as absent.
pub fn effective_environment(
    fragment: &Value,
    base: &dyn Fn(&str) -> Option<String>,
) -> Result<IndexMap<String, Option<String>>, LoadError> {
    let mut resolved: IndexMap<String, Option<String>> = IndexMap::new();

    if let Some(files) = fragment.get("env_file").map(Value::unsourced) {
        for file in files.as_sequence().map(<[Value]>::to_vec).unwrap_or_default() {
            let record = file.unsourced();
            let path = record
                .get("path")
                .map(Value::unsourced)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let required = record
                .get("required")
                .map(Value::unsourced)
                .and_then(Value::as_bool)
                .unwrap_or(true);
            match read_env_file(&path, base) {
                Ok(entries) => {
                    for (key, value) in entries {
                        resolved.insert(key, Some(value));
                    }
                }
                Err(err) if required => return Err(err),
                Err(_) => {}
            }
        }
    }

    if let Some(environment) = fragment.get("environment").map(Value::unsourced) {
        merge_inline_entries(environment, &mut resolved);
    }
    Ok(resolved)
}

/// The effective, uninterpolated labels of a canonicalized fragment
/// `{labels, label_file}`. Same shape and precedence as
/// [`effective_environment`].
pub fn effective_labels(
    fragment: &Value,
    base: &dyn Fn(&str) -> Option<String>,
) -> Result<IndexMap<String, Option<String>>, LoadError> {
    let mut resolved: IndexMap<String, Option<String>> = IndexMap::new();

    if let Some(files) = fragment.get("label_file").map(Value::unsourced) {
        for file in files.as_sequence().map(<[Value]>::to_vec).unwrap_or_default() {
            let path = file
                .unsourced()
                .scalar_to_string()
                .unwrap_or_default();
            for (key, value) in read_env_file(&path, base)? {
                resolved.insert(key, Some(value));
            }
        }
    }

    if let Some(labels) = fragment.get("labels").map(Value::unsourced) {
        merge_inline_entries(labels, &mut resolved);
    }
    Ok(resolved)
}

fn read_env_file(
    path: &str,
    base: &dyn Fn(&str) -> Option<String>,
) -> Result<IndexMap<String, String>, LoadError> {
    let content =
        fs::read_to_string(Path::new(path)).map_err(|e| LoadError::resource(path, e))?;
    Ok(parse_dotenv(&content, base))
}

/// Fold mapping-form or `KEY=VALUE` sequence-form entries into `resolved`.
fn merge_inline_entries(entries: &Value, resolved: &mut IndexMap<String, Option<String>>) {
    match entries {
        Value::Mapping(map) => {
            for (key, value) in map {
                let value = match value.unsourced() {
                    Value::Null => None,
                    other => other.scalar_to_string(),
                };
                resolved.insert(key.clone(), value);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                let line = match item.unsourced().scalar_to_string() {
                    Some(line) => line,
                    None => continue,
                };
                match line.split_once('=') {
                    Some((key, value)) => {
                        resolved.insert(key.to_owned(), Some(value.to_owned()));
                    }
                    None => {
                        resolved.insert(line, None);
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_tree::parse_yaml;
    use std::io::Write;

    fn no_base(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_dotenv_basics() {
        let parsed = parse_dotenv(
            r#"
# comment
FOO=bar
EMPTY=
QUOTED="hello world"
SINGLE='single'
export EXPORTED=yes
TRAILING=value # not part of it
"#,
            &no_base,
        );
        assert_eq!(parsed.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(parsed.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(parsed.get("QUOTED").map(String::as_str), Some("hello world"));
        assert_eq!(parsed.get("SINGLE").map(String::as_str), Some("single"));
        assert_eq!(parsed.get("EXPORTED").map(String::as_str), Some("yes"));
        assert_eq!(parsed.get("TRAILING").map(String::as_str), Some("value"));
    }

    #[test]
    fn test_parse_dotenv_bare_key_inherits() {
        let base = |name: &str| (name == "HOME").then(|| "/home/test".to_owned());
        let parsed = parse_dotenv("HOME\nMISSING\n", &base);
        assert_eq!(parsed.get("HOME").map(String::as_str), Some("/home/test"));
        assert!(!parsed.contains_key("MISSING"));
    }

    #[test]
    fn test_parse_dotenv_keeps_templates_raw() {
        let parsed = parse_dotenv("REF=${OTHER}\n", &no_base);
        assert_eq!(parsed.get("REF").map(String::as_str), Some("${OTHER}"));
    }

    #[test]
    fn test_effective_environment_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "FROM_FILE=file\nSHARED=file").unwrap();
        let fragment = parse_yaml(&format!(
            "environment:\n  SHARED: inline\n  PASSTHROUGH:\nenv_file:\n  - path: {}\n    required: true\n",
            file.path().display()
        ))
        .unwrap();
        let env = effective_environment(&fragment, &no_base).unwrap();
        assert_eq!(env.get("FROM_FILE"), Some(&Some("file".to_owned())));
        assert_eq!(env.get("SHARED"), Some(&Some("inline".to_owned())));
        assert_eq!(env.get("PASSTHROUGH"), Some(&None));
    }

    #[test]
    fn test_effective_environment_missing_file() {
        let required = parse_yaml("env_file:\n  - path: /definitely/not/here.env\n    required: true\n").unwrap();
        assert!(effective_environment(&required, &no_base).is_err());

        let optional = parse_yaml("env_file:\n  - path: /definitely/not/here.env\n    required: false\n").unwrap();
        assert!(effective_environment(&optional, &no_base).unwrap().is_empty());
    }

    #[test]
    fn test_effective_labels_sequence_form() {
        let fragment = parse_yaml("labels:\n  - com.example.a=1\n  - bare\n").unwrap();
        let labels = effective_labels(&fragment, &no_base).unwrap();
        assert_eq!(labels.get("com.example.a"), Some(&Some("1".to_owned())));
        assert_eq!(labels.get("bare"), Some(&None));
    }
}
