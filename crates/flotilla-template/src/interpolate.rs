//! Tree interpolation: per-leaf substitution under path-scoped mappings,
//! with type casts at registered paths.

use crate::error::{InterpolationError, TemplateError};
use crate::mappings::{NamedMapping, NamedMappings, ScopedMappings};
use crate::substitute::{contains_template, Substitution};
use flotilla_tree::{walk, Mapping, Sourced, TreePath, Value};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// External value lookup, usually backed by the host environment.
pub type LookupValue = Rc<dyn Fn(&str) -> Option<String>>;

/// Target type for a post-substitution cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    Int,
    Int64,
    Float,
    Float32,
    Bool,
}

/// `pattern → cast`, consulted for every leaf a substitution touched.
pub type CastTable = IndexMap<TreePath, Cast>;

/// Everything one interpolation pass needs. Cloning is cheap; the scoped
/// mapping table is shared so that mapping closures created during resolver
/// orchestration observe entries registered after their creation.
#[derive(Clone, Default)]
pub struct InterpolateOptions {
    pub lookup_value: Option<LookupValue>,
    pub named_mappings: Rc<RefCell<ScopedMappings>>,
    pub type_casts: Rc<CastTable>,
}

impl InterpolateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.lookup_value = Some(Rc::new(lookup));
        self
    }

    pub fn with_casts(mut self, casts: CastTable) -> Self {
        self.type_casts = Rc::new(casts);
        self
    }

    pub fn with_scoped_mappings(mut self, mappings: ScopedMappings) -> Self {
        self.named_mappings = Rc::new(RefCell::new(mappings));
        self
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.lookup_value.as_ref().and_then(|f| f(name))
    }

    fn cast_for(&self, path: &TreePath) -> Option<Cast> {
        self.type_casts
            .iter()
            .find(|(pattern, _)| path.matches(pattern))
            .map(|(_, cast)| *cast)
    }
}

/// Expand every `${…}` reference in `model`.
///
/// Traversal is top-down; the effective mappings for each leaf come from
/// the deepest-prefix scoped lookup. Leaves that contained no `$` are left
/// untouched; in particular they are never re-cast.
pub fn interpolate(model: &Value, opts: &InterpolateOptions) -> Result<Value, InterpolationError> {
    interpolate_value(model, &TreePath::new(), opts)
}

fn interpolate_value(
    value: &Value,
    path: &TreePath,
    opts: &InterpolateOptions,
) -> Result<Value, InterpolationError> {
    match value {
        Value::Mapping(entries) => {
            let mut out = Mapping::with_capacity(entries.len());
            for (key, child) in entries {
                out.insert(key.clone(), interpolate_value(child, &path.next(key), opts)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, child) in items.iter().enumerate() {
                out.push(interpolate_value(child, &path.next_index(i), opts)?);
            }
            Ok(Value::Sequence(out))
        }
        Value::Sourced(sourced) => {
            let inner = interpolate_value(&sourced.value, path, opts)?;
            Ok(Sourced::new(inner, sourced.source.clone()))
        }
        Value::String(s) if contains_template(s) => {
            let effective = opts.named_mappings.borrow().lookup(path);
            substitute_leaf(s, path, &effective, opts)
        }
        other => Ok(other.clone()),
    }
}

fn substitute_leaf(
    template: &str,
    path: &TreePath,
    mappings: &NamedMappings,
    opts: &InterpolateOptions,
) -> Result<Value, InterpolationError> {
    let lookup = |name: &str| opts.lookup(name);
    let substitution = Substitution {
        lookup: &lookup,
        mappings,
    };
    let expanded = substitution
        .substitute(template)
        .map_err(|e| InterpolationError::new(path.clone(), e))?;
    match opts.cast_for(path) {
        Some(cast) => {
            apply_cast(&expanded, cast).map_err(|e| InterpolationError::new(path.clone(), e))
        }
        None => Ok(Value::String(expanded)),
    }
}

fn apply_cast(value: &str, cast: Cast) -> Result<Value, TemplateError> {
    let failed = |message: String| TemplateError::CastFailed { message };
    match cast {
        Cast::Int | Cast::Int64 => value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| failed(format!("invalid integer {value:?}: {e}"))),
        Cast::Float => value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| failed(format!("invalid float {value:?}: {e}"))),
        Cast::Float32 => value
            .parse::<f32>()
            .map(|f| Value::Float(f as f64))
            .map_err(|e| failed(format!("invalid float {value:?}: {e}"))),
        Cast::Bool => parse_bool(value).map(Value::Bool).map_err(failed),
    }
}

// Boolean forms per http://yaml.org/type/bool.html; YAML 1.2 only keeps
// true/false, the rest is accepted with a warning.
fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        "y" | "yes" | "on" => {
            tracing::warn!(%value, "boolean form is not supported by YAML 1.2, please use `true`");
            Ok(true)
        }
        "n" | "no" | "off" => {
            tracing::warn!(%value, "boolean form is not supported by YAML 1.2, please use `false`");
            Ok(false)
        }
        _ => Err(format!("invalid boolean: {value}")),
    }
}

/// Produces named mappings from the model under construction.
///
/// A resolver contributes mappings at every path it accepts; `resolve` sees
/// the sub-model rooted there. `resolve_global` contributes mappings that do
/// not depend on the model at all.
pub trait NamedMappingsResolver {
    fn accept(&self, path: &TreePath) -> bool;

    fn resolve(
        &self,
        value: &Value,
        path: &TreePath,
        opts: &InterpolateOptions,
    ) -> Result<NamedMappings, InterpolationError>;

    fn resolve_global(&self, opts: &InterpolateOptions) -> Result<NamedMappings, InterpolationError>;
}

/// Run every resolver over the model and fill the scoped table in
/// `opts.named_mappings`, in place.
///
/// Resolvers run in configured order and the table is append-only: mappings
/// registered earlier keep precedence, later ones answer the keys earlier
/// ones miss. Returns the shared table for convenience.
pub fn resolve_named_mappings(
    model: &Value,
    opts: &InterpolateOptions,
    resolvers: &[Rc<dyn NamedMappingsResolver>],
) -> Result<Rc<RefCell<ScopedMappings>>, InterpolationError> {
    for resolver in resolvers {
        let global = resolver.resolve_global(opts)?;
        if !global.is_empty() {
            opts.named_mappings.borrow_mut().add(TreePath::new(), global);
        }

        let mut accepted = Vec::new();
        walk(model, &mut |path, _| {
            if !path.is_empty() && resolver.accept(path) {
                accepted.push(path.clone());
            }
        });
        if resolver.accept(&TreePath::new()) {
            accepted.insert(0, TreePath::new());
        }

        for path in accepted {
            let value = model
                .value_at(&path)
                .cloned()
                .unwrap_or(Value::Null);
            let mappings = resolver.resolve(&value, &path, opts)?;
            if !mappings.is_empty() {
                opts.named_mappings.borrow_mut().add(path, mappings);
            }
        }
    }
    Ok(opts.named_mappings.clone())
}

/// Contributes the global `env` mapping, backed by the external lookup.
pub struct EnvNamedMappingsResolver;

impl NamedMappingsResolver for EnvNamedMappingsResolver {
    fn accept(&self, _path: &TreePath) -> bool {
        false
    }

    fn resolve(
        &self,
        _value: &Value,
        _path: &TreePath,
        _opts: &InterpolateOptions,
    ) -> Result<NamedMappings, InterpolationError> {
        Ok(NamedMappings::new())
    }

    fn resolve_global(
        &self,
        opts: &InterpolateOptions,
    ) -> Result<NamedMappings, InterpolationError> {
        let lookup = opts.lookup_value.clone();
        let mut mappings = NamedMappings::new();
        mappings.insert(
            "env",
            NamedMapping::new(move |keys: &[String]| {
                Ok(keys
                    .first()
                    .and_then(|key| lookup.as_ref().and_then(|f| f(key))))
            }),
        );
        Ok(mappings)
    }
}
