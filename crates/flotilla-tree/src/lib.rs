//! # flotilla-tree
//!
//! The untyped tree a deployment file parses into, plus the structural
//! toolkit the rest of the pipeline is built on: typed paths with wildcard
//! matching, a recursive walker, subset projection, and the provenance
//! overlay that tags leaves with the document they came from.
//!
//! ## Design
//!
//! The whole pipeline operates on a single tagged union, [`Value`]. Interior
//! nodes are order-preserving mappings (`indexmap`) or sequences; leaves are
//! scalars or `null`. A leaf may be wrapped in a [`Sourced`] pair carrying a
//! [`SourceTag`]; pairs never nest and never wrap interior nodes.
//!
//! ## Example
//!
//! ```rust
//! use flotilla_tree::{parse_yaml, TreePath};
//!
//! let model = parse_yaml("services:\n  web:\n    image: nginx\n").unwrap();
//! let path = TreePath::from("services.web.image");
//! assert_eq!(model.value_at(&path).unwrap().as_str(), Some("nginx"));
//! ```

mod convert;
mod path;
mod sourced;
mod subset;
mod value;

pub use convert::{parse_yaml, parse_yaml_with, ConvertError};
pub use path::{TreePath, PATH_MATCH_ALL, PATH_MATCH_LIST, PATH_MATCH_TAIL};
pub use sourced::{
    attach_source, attach_source_by, strip_sources, strip_sources_with, transform_sourced,
    try_transform_sourced, SourceTag, Sourced,
};
pub use subset::{extract_subset, unwrap_value_with_path, walk, wrap_value_with_path};
pub use value::{Mapping, Value};
