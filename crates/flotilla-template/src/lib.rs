//! # flotilla-template
//!
//! `${…}` variable substitution over configuration trees.
//!
//! Two layers live here. The string layer ([`Substitution`]) expands one
//! template against an external lookup and a set of [`NamedMappings`]:
//! lazy, first-class lookup functions addressed as `${name[key]}`. The tree
//! layer ([`interpolate`]) walks a [`flotilla_tree::Value`], picks the
//! effective mappings for each leaf from a path-scoped table, and applies
//! type casts at registered paths.
//!
//! Named mappings are resolved against the model itself by
//! [`NamedMappingsResolver`] implementations; resolution and interpolation
//! are mutually recursive, which is why mappings are shared closures over a
//! per-scope cache (see the loader crate for the model-backed resolver).

mod error;
mod interpolate;
mod mappings;
mod substitute;

pub use error::{InterpolationError, TemplateError};
pub use interpolate::{
    interpolate, resolve_named_mappings, Cast, CastTable, EnvNamedMappingsResolver,
    InterpolateOptions, LookupValue, NamedMappingsResolver,
};
pub use mappings::{MappingResult, NamedMapping, NamedMappings, ScopedMappings};
pub use substitute::{contains_template, Substitution};
