//! Named mappings and their path-scoped tables.

use crate::error::TemplateError;
use flotilla_tree::TreePath;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// What a mapping lookup yields: a value, "known absent", or a failure
/// (unreadable backing file, nested interpolation error, lookup cycle).
pub type MappingResult = Result<Option<String>, TemplateError>;

/// A first-class lazy lookup function, addressed in templates as
/// `${name[key]…}`. Multi-segment addresses hand all segments to the
/// function (`${services[db].user}` → `["db", "user"]`).
#[derive(Clone)]
pub struct NamedMapping(Rc<dyn Fn(&[String]) -> MappingResult>);

impl NamedMapping {
    pub fn new(f: impl Fn(&[String]) -> MappingResult + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Convenience for single-key, infallible lookups.
    pub fn from_lookup(f: impl Fn(&str) -> Option<String> + 'static) -> Self {
        Self::new(move |keys| Ok(keys.first().and_then(|k| f(k))))
    }

    pub fn call(&self, keys: &[String]) -> MappingResult {
        (self.0)(keys)
    }
}

impl fmt::Debug for NamedMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NamedMapping(..)")
    }
}

/// A set of named mappings, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct NamedMappings {
    entries: IndexMap<String, NamedMapping>,
}

impl NamedMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, mapping: NamedMapping) {
        self.entries.insert(name.into(), mapping);
    }

    pub fn get(&self, name: &str) -> Option<&NamedMapping> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Combine two sets. On a name collision the mappings chain: `self` is
    /// consulted first and `other` answers the keys `self` reports absent.
    pub fn merge(&self, other: &NamedMappings) -> NamedMappings {
        let mut merged = self.clone();
        for (name, mapping) in &other.entries {
            match merged.entries.get(name) {
                None => {
                    merged.entries.insert(name.clone(), mapping.clone());
                }
                Some(preferred) => {
                    let first = preferred.clone();
                    let fallback = mapping.clone();
                    merged.entries.insert(
                        name.clone(),
                        NamedMapping::new(move |keys| match first.call(keys)? {
                            Some(value) => Ok(Some(value)),
                            None => fallback.call(keys),
                        }),
                    );
                }
            }
        }
        merged
    }
}

impl FromIterator<(String, NamedMapping)> for NamedMappings {
    fn from_iter<T: IntoIterator<Item = (String, NamedMapping)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Mappings indexed by the path they apply at.
///
/// The table is append-only while resolvers run; for a lookup site at path
/// `p` the effective mappings are the merge of every table whose path is a
/// prefix of `p`, deeper prefixes taking precedence.
#[derive(Debug, Clone, Default)]
pub struct ScopedMappings {
    tables: IndexMap<TreePath, NamedMappings>,
}

impl ScopedMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &TreePath) -> Option<&NamedMappings> {
        self.tables.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Register mappings at `path`. Mappings already registered there keep
    /// precedence: resolvers run in configured order, earlier wins.
    pub fn add(&mut self, path: TreePath, mappings: NamedMappings) {
        match self.tables.get_mut(&path) {
            Some(existing) => *existing = existing.merge(&mappings),
            None => {
                self.tables.insert(path, mappings);
            }
        }
    }

    /// Combine two tables; on collisions `self` keeps precedence per path.
    pub fn merge(&self, other: &ScopedMappings) -> ScopedMappings {
        let mut merged = self.clone();
        for (path, mappings) in &other.tables {
            merged.add(path.clone(), mappings.clone());
        }
        merged
    }

    /// The effective mappings for a site at `path`.
    pub fn lookup(&self, path: &TreePath) -> NamedMappings {
        let mut effective = self
            .tables
            .get(&TreePath::new())
            .cloned()
            .unwrap_or_default();
        let mut current = TreePath::new();
        for part in path.parts() {
            current = current.next(part);
            if let Some(table) = self.tables.get(&current) {
                // Longer prefix match takes priority.
                effective = table.merge(&effective);
            }
        }
        effective
    }
}
