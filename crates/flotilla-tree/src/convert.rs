//! Conversion from the YAML front-end into [`Value`] trees.

use crate::value::{Mapping, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Errors raised while turning parsed YAML into a [`Value`] tree.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConvertError {
    #[error("invalid YAML: {0}")]
    Scan(String),

    #[error("non-string key in mapping: {key:?}")]
    NonStringKey { key: String },

    #[error("unsupported YAML node: {0}")]
    Unsupported(String),
}

impl Value {
    /// Convert a `yaml_rust2` document into a [`Value`].
    ///
    /// Mapping keys must be strings. With `ignore_non_string_key_errors`,
    /// scalar keys are stringified instead and anything else is skipped.
    pub fn from_yaml(yaml: &Yaml, ignore_non_string_key_errors: bool) -> Result<Value, ConvertError> {
        match yaml {
            Yaml::Null => Ok(Value::Null),
            Yaml::Boolean(b) => Ok(Value::Bool(*b)),
            Yaml::Integer(i) => Ok(Value::Integer(*i)),
            Yaml::Real(raw) => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ConvertError::Unsupported(format!("real {raw:?}"))),
            Yaml::String(s) => Ok(Value::String(s.clone())),
            Yaml::Array(items) => {
                let mut sequence = Vec::with_capacity(items.len());
                for item in items {
                    sequence.push(Value::from_yaml(item, ignore_non_string_key_errors)?);
                }
                Ok(Value::Sequence(sequence))
            }
            Yaml::Hash(hash) => {
                let mut entries = Mapping::with_capacity(hash.len());
                for (key, value) in hash {
                    let key = match key {
                        Yaml::String(s) => s.clone(),
                        Yaml::Integer(i) if ignore_non_string_key_errors => i.to_string(),
                        Yaml::Boolean(b) if ignore_non_string_key_errors => b.to_string(),
                        Yaml::Real(r) if ignore_non_string_key_errors => r.clone(),
                        _ if ignore_non_string_key_errors => continue,
                        other => {
                            return Err(ConvertError::NonStringKey {
                                key: format!("{other:?}"),
                            })
                        }
                    };
                    entries.insert(key, Value::from_yaml(value, ignore_non_string_key_errors)?);
                }
                Ok(Value::Mapping(entries))
            }
            Yaml::Alias(_) | Yaml::BadValue => {
                Err(ConvertError::Unsupported(format!("{yaml:?}")))
            }
        }
    }
}

/// Parse a YAML document into a [`Value`] tree.
///
/// An empty document yields an empty mapping; only the first document of a
/// multi-document stream is used.
pub fn parse_yaml(source: &str) -> Result<Value, ConvertError> {
    parse_yaml_with(source, false)
}

/// [`parse_yaml`] with control over the non-string-key policy.
pub fn parse_yaml_with(
    source: &str,
    ignore_non_string_key_errors: bool,
) -> Result<Value, ConvertError> {
    let docs = YamlLoader::load_from_str(source).map_err(|e| ConvertError::Scan(e.to_string()))?;
    match docs.first() {
        None => Ok(Value::Mapping(Mapping::new())),
        Some(doc) => Value::from_yaml(doc, ignore_non_string_key_errors),
    }
}
