//! The tree node type.

use crate::sourced::Sourced;
use crate::TreePath;
use indexmap::IndexMap;
use std::fmt;

/// Order-preserving mapping from string keys to values.
pub type Mapping = IndexMap<String, Value>;

/// A node of the configuration tree.
///
/// Interior nodes are [`Value::Mapping`] and [`Value::Sequence`]; everything
/// else is a leaf. [`Value::Sourced`] is the provenance overlay: a leaf
/// together with the tag of the document that supplied it. Pairs wrap only
/// leaves and never nest (see [`crate::attach_source`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(Mapping),
    Sourced(Box<Sourced>),
}

impl Value {
    /// A human-readable name for the node type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Sourced(sourced) => sourced.value.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Sourced(sourced) => sourced.value.is_null(),
            _ => false,
        }
    }

    /// True for scalars and null, i.e. anything a provenance pair may wrap.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, Value::Sequence(_) | Value::Mapping(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Sourced(sourced) => sourced.value.as_str(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Sourced(sourced) => sourced.value.as_bool(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Sourced(sourced) => sourced.value.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Sourced(sourced) => sourced.value.as_f64(),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Value::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn into_mapping(self) -> Option<Mapping> {
        match self {
            Value::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn into_sequence(self) -> Option<Vec<Value>> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// The value behind a provenance pair, or the value itself.
    pub fn unsourced(&self) -> &Value {
        match self {
            Value::Sourced(sourced) => &sourced.value,
            other => other,
        }
    }

    /// Consume the pair wrapper, if any.
    pub fn into_unsourced(self) -> Value {
        match self {
            Value::Sourced(sourced) => sourced.value,
            other => other,
        }
    }

    /// Mapping entry lookup, transparent to provenance pairs on `self`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    /// The node addressed by `path`, if every intermediate step exists.
    pub fn value_at(&self, path: &TreePath) -> Option<&Value> {
        let mut current = self;
        for part in path.parts() {
            current = match current {
                Value::Mapping(entries) => entries.get(part.as_str())?,
                Value::Sequence(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Render a scalar the way it reads in a `KEY=VALUE` line.
    ///
    /// Returns `None` for interior nodes. Null renders as the empty string.
    pub fn scalar_to_string(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::String(s) => Some(s.clone()),
            Value::Sourced(sourced) => sourced.value.scalar_to_string(),
            Value::Sequence(_) | Value::Mapping(_) => None,
        }
    }

    /// Build a mapping from key/value pairs, in order.
    pub fn mapping_from<I, K>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scalar_to_string() {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "<{}>", self.type_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.0}")
    } else {
        f.to_string()
    }
}
