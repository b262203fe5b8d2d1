//! # flotilla-loader
//!
//! The model transformation pipeline for declarative multi-service
//! deployment files: a raw parsed tree goes in, a canonical, merged,
//! fully-interpolated tree comes out.
//!
//! The pipeline, leaves first:
//!
//! 1. [`canonical`] rewrites every field into its single normal form.
//! 2. [`apply_include`] pulls whole fragments in from other documents and
//!    folds them under conflict detection; [`apply_extends`] does the same
//!    for single services, with an override merge instead of a conflict.
//! 3. [`merge`] folds override files over base files; [`enforce_unicity`]
//!    collapses the sequences that are really sets.
//! 4. The model named-mappings resolver publishes lazy `${name[key]}`
//!    lookups scoped to the node they describe, and interpolation expands
//!    every reference, casting typed fields at known paths.
//!
//! [`load`] drives the whole thing over a [`ConfigDetails`].
//!
//! YAML parsing, schema validation, and typed decoding are deliberately
//! outside this crate; it consumes and produces [`flotilla_tree::Value`]
//! trees.

mod cancel;
mod canonical;
mod environment;
mod error;
mod extends;
mod include;
mod interpolate;
mod loader;
mod mappings;
mod merge;
mod paths;

pub use cancel::CancelToken;
pub use canonical::{canonical, set_name_from_key};
pub use environment::{effective_environment, effective_labels, parse_dotenv};
pub use error::LoadError;
pub use extends::{apply_extends, CycleTracker};
pub use include::apply_include;
pub use interpolate::{interpolate_cast_table, interpolate_with_path};
pub use loader::{
    load, ConfigDetails, ConfigFile, Environment, LoadOptions, LocalResourceLoader, ResourceLoader,
};
pub use mappings::ModelNamedMappingsResolver;
pub use merge::{enforce_unicity, extend_service, merge};
pub use paths::resolve_relative_paths;
