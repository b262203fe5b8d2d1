//! The `load` entry point and its configuration surface.

use crate::canonical::{canonical, set_name_from_key};
use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::extends::apply_extends;
use crate::include::apply_include;
use crate::interpolate::interpolate_cast_table;
use crate::mappings::ModelNamedMappingsResolver;
use crate::merge;
use crate::paths;
use flotilla_template::{
    interpolate, resolve_named_mappings, EnvNamedMappingsResolver, InterpolateOptions,
    NamedMappingsResolver, Substitution,
};
use flotilla_tree::{attach_source, parse_yaml_with, strip_sources, Mapping, SourceTag, Value};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The host environment handed to the loader.
pub type Environment = IndexMap<String, String>;

/// One input document: a file name plus, optionally, its content already in
/// memory. Content is read from disk when absent.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub filename: String,
    pub content: Option<String>,
}

impl ConfigFile {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: None,
        }
    }

    pub fn with_content(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: Some(content.into()),
        }
    }
}

/// Everything [`load`] consumes: the documents, the working directory, and
/// the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigDetails {
    pub working_dir: PathBuf,
    pub config_files: Vec<ConfigFile>,
    pub environment: Environment,
}

impl ConfigDetails {
    pub fn lookup_env(&self, name: &str) -> Option<String> {
        self.environment.get(name).cloned()
    }
}

/// Produces a local file for a referenced document path.
pub trait ResourceLoader {
    fn accept(&self, path: &str) -> bool;
    fn load(&self, cancel: &CancelToken, path: &str) -> Result<PathBuf, LoadError>;

    /// Remote loaders survive into nested loads; the local one is replaced
    /// by a flavour rooted at the fragment's own directory.
    fn is_remote(&self) -> bool {
        true
    }
}

/// Resolves relative paths against a working directory; rejects URLs.
pub struct LocalResourceLoader {
    pub working_dir: PathBuf,
}

impl ResourceLoader for LocalResourceLoader {
    fn accept(&self, path: &str) -> bool {
        !path.contains("://")
    }

    fn load(&self, cancel: &CancelToken, path: &str) -> Result<PathBuf, LoadError> {
        cancel.check()?;
        let absolute = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.working_dir.join(path)
        };
        // Normalize so the same file always yields the same identity; the
        // include cycle check compares these paths verbatim.
        let absolute = paths::clean_path(&absolute);
        if !absolute.exists() {
            return Err(LoadError::resource(path, "no such file or directory"));
        }
        Ok(absolute)
    }

    fn is_remote(&self) -> bool {
        false
    }
}

/// Flags and collaborators steering one [`load`] invocation.
#[derive(Clone, Default)]
pub struct LoadOptions {
    pub project_name: Option<String>,
    pub skip_validation: bool,
    pub skip_interpolation: bool,
    pub skip_normalization: bool,
    pub skip_consistency_check: bool,
    pub skip_extends: bool,
    pub skip_include: bool,
    pub resolve_paths: bool,
    pub skip_default_values: bool,
    pub ignore_non_string_key_errors: bool,
    pub ignore_parse_error: bool,
    /// Keep the per-leaf source tags in the returned tree.
    pub retain_provenance: bool,
    pub resource_loaders: Vec<Rc<dyn ResourceLoader>>,
    pub cancel: CancelToken,
}

impl LoadOptions {
    pub fn remote_resource_loaders(&self) -> Vec<Rc<dyn ResourceLoader>> {
        self.resource_loaders
            .iter()
            .filter(|loader| loader.is_remote())
            .cloned()
            .collect()
    }

    /// Find a loader for `path` and produce the local file.
    pub(crate) fn load_resource(&self, path: &str) -> Result<PathBuf, LoadError> {
        for loader in &self.resource_loaders {
            if loader.accept(path) {
                return loader.load(&self.cancel, path);
            }
        }
        Err(LoadError::resource(path, "no resource loader accepts this path"))
    }
}

/// Load, transform, and fold the configured documents into one canonical,
/// interpolated model.
pub fn load(details: &ConfigDetails, options: &LoadOptions) -> Result<Value, LoadError> {
    options.cancel.check()?;
    if details.config_files.is_empty() {
        return Err(LoadError::Model("no configuration file provided".into()));
    }

    let mut options = options.clone();
    if options
        .resource_loaders
        .iter()
        .all(|loader| loader.is_remote())
    {
        options
            .resource_loaders
            .push(Rc::new(LocalResourceLoader {
                working_dir: details.working_dir.clone(),
            }));
    }

    let project_name = derive_project_name(details, &options)?;
    tracing::debug!(project = %project_name, files = details.config_files.len(), "loading model");

    let mut model: Option<Value> = None;
    for file in &details.config_files {
        let fragment = load_yaml_file(file, details, &options, &project_name, &[])?;
        let fragment = attach_source(fragment, &SourceTag::new(&file.filename));
        model = Some(match model {
            None => fragment,
            Some(base) => merge::merge(&base, &fragment)?,
        });
    }
    let model = model.expect("checked config_files non-empty");
    let mut model = merge::enforce_unicity(model)?;

    if !options.skip_normalization {
        normalize(&mut model, &project_name);
    }
    if !options.skip_consistency_check {
        check_consistency(&model)?;
    }
    if !options.retain_provenance {
        model = strip_sources(model);
    }
    Ok(model)
}

/// Run one document through the pipeline: parse → canonicalize → include →
/// extends → resolve named mappings → interpolate → resolve paths.
pub(crate) fn load_yaml_file(
    file: &ConfigFile,
    details: &ConfigDetails,
    options: &LoadOptions,
    project_name: &str,
    included: &[String],
) -> Result<Value, LoadError> {
    options.cancel.check()?;

    let content = match &file.content {
        Some(content) => content.clone(),
        None => fs::read_to_string(&file.filename)
            .map_err(|e| LoadError::resource(&file.filename, e))?,
    };
    let parsed = parse_yaml_with(&content, options.ignore_non_string_key_errors)?;
    let parsed = match parsed {
        Value::Mapping(_) => parsed,
        Value::Null => Value::Mapping(Mapping::new()),
        other => {
            return Err(LoadError::Model(format!(
                "top-level object must be a mapping, got {}",
                other.type_name()
            )))
        }
    };

    let mut model = canonical(parsed, options.ignore_parse_error)?;

    if !options.skip_include {
        // This file joins the include chain so a fragment pulling it back
        // in is flagged as a cycle.
        let identity = if Path::new(&file.filename).is_absolute() {
            paths::clean_path(Path::new(&file.filename)).display().to_string()
        } else {
            paths::clean_path(&details.working_dir.join(&file.filename))
                .display()
                .to_string()
        };
        let mut chain = included.to_vec();
        chain.push(identity);
        apply_include(&mut model, details, options, project_name, &chain)?;
    }
    if !options.skip_extends {
        apply_extends(&mut model, details, options, project_name, &file.filename)?;
    }

    if !options.skip_interpolation {
        let interp = interpolate_options(details);
        let resolvers: Vec<Rc<dyn NamedMappingsResolver>> = vec![
            Rc::new(EnvNamedMappingsResolver),
            Rc::new(ModelNamedMappingsResolver::new(
                details.clone(),
                project_name,
                Some(PathBuf::from(&file.filename)),
            )),
        ];
        resolve_named_mappings(&model, &interp, &resolvers)?;
        model = interpolate(&model, &interp)?;
    }

    if options.resolve_paths {
        model = paths::resolve_relative_paths(model, &details.working_dir, &IndexMap::new())?;
    }
    Ok(model)
}

pub(crate) fn interpolate_options(details: &ConfigDetails) -> InterpolateOptions {
    let environment = details.environment.clone();
    let mut opts = InterpolateOptions::new()
        .with_lookup(move |name| environment.get(name).cloned());
    opts.type_casts = interpolate_cast_table();
    opts
}

/// The project name: explicit, or the documents' top-level `name` (itself
/// interpolable from the environment), or the working directory's base
/// name, sanitized.
fn derive_project_name(details: &ConfigDetails, options: &LoadOptions) -> Result<String, LoadError> {
    if let Some(name) = &options.project_name {
        return Ok(name.clone());
    }

    for file in details.config_files.iter().rev() {
        let content = match &file.content {
            Some(content) => content.clone(),
            None => match fs::read_to_string(&file.filename) {
                Ok(content) => content,
                Err(_) => continue,
            },
        };
        let parsed = match parse_yaml_with(&content, true) {
            Ok(parsed) => parsed,
            Err(_) => continue,
        };
        if let Some(name) = parsed.get("name").and_then(Value::as_str) {
            let name = if name.contains('$') {
                let lookup = |key: &str| details.lookup_env(key);
                let mappings = flotilla_template::NamedMappings::new();
                let substitution = Substitution {
                    lookup: &lookup,
                    mappings: &mappings,
                };
                substitution.substitute(name).map_err(|e| {
                    LoadError::Model(format!("invalid project name: {e}"))
                })?
            } else {
                name.to_owned()
            };
            if !name.is_empty() {
                return Ok(sanitize_project_name(&name));
            }
        }
    }

    let base = details
        .working_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized = sanitize_project_name(&base);
    if sanitized.is_empty() {
        return Ok("default".to_owned());
    }
    Ok(sanitized)
}

fn sanitize_project_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    lowered
        .trim_start_matches(|c: char| !c.is_ascii_lowercase() && !c.is_ascii_digit())
        .to_owned()
}

fn normalize(model: &mut Value, project_name: &str) {
    if let Some(entries) = model.as_mapping_mut() {
        if !entries.contains_key("name") {
            entries.insert("name".into(), Value::from(project_name));
        }
    }
    set_name_from_key(model);
}

/// Cross-reference sanity: services may only name services, networks, and
/// volumes that exist.
fn check_consistency(model: &Value) -> Result<(), LoadError> {
    let plain = strip_sources(model.clone());
    let services = match plain.get("services").and_then(Value::as_mapping) {
        Some(services) => services,
        None => return Ok(()),
    };
    let networks = plain.get("networks").and_then(Value::as_mapping);
    let volumes = plain.get("volumes").and_then(Value::as_mapping);

    for (name, service) in services {
        if let Some(depends_on) = service.get("depends_on").and_then(Value::as_mapping) {
            for dependency in depends_on.keys() {
                let required = depends_on
                    .get(dependency)
                    .and_then(|d| d.get("required"))
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if required && !services.contains_key(dependency) {
                    return Err(LoadError::Model(format!(
                        "service {name:?} depends on undefined service {dependency:?}"
                    )));
                }
            }
        }
        if let Some(service_networks) = service.get("networks").and_then(Value::as_mapping) {
            for network in service_networks.keys() {
                if network == "default" {
                    continue;
                }
                let defined = networks.map(|n| n.contains_key(network)).unwrap_or(false);
                if !defined {
                    return Err(LoadError::Model(format!(
                        "service {name:?} refers to undefined network {network:?}"
                    )));
                }
            }
        }
        if let Some(mounts) = service.get("volumes").and_then(Value::as_sequence) {
            for mount in mounts {
                let is_volume = mount.get("type").and_then(Value::as_str) == Some("volume");
                let source = mount.get("source").and_then(Value::as_str);
                if let (true, Some(source)) = (is_volume, source) {
                    let defined = volumes.map(|v| v.contains_key(source)).unwrap_or(false);
                    if !defined {
                        return Err(LoadError::Model(format!(
                            "service {name:?} refers to undefined volume {source:?}"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_project_name() {
        assert_eq!(sanitize_project_name("My Project"), "my_project");
        assert_eq!(sanitize_project_name("web-app_2"), "web-app_2");
        assert_eq!(sanitize_project_name("--weird"), "weird");
    }

    #[test]
    fn test_derive_project_name_from_top_level_name() {
        let details = ConfigDetails {
            working_dir: PathBuf::from("/somewhere"),
            config_files: vec![ConfigFile::with_content(
                "compose.yaml",
                "name: from-file\nservices: {}\n",
            )],
            environment: Environment::new(),
        };
        let name = derive_project_name(&details, &LoadOptions::default()).unwrap();
        assert_eq!(name, "from-file");
    }

    #[test]
    fn test_derive_project_name_explicit_wins() {
        let details = ConfigDetails {
            working_dir: PathBuf::from("/somewhere"),
            config_files: vec![ConfigFile::with_content("c.yaml", "name: other\n")],
            environment: Environment::new(),
        };
        let options = LoadOptions {
            project_name: Some("explicit".into()),
            ..Default::default()
        };
        assert_eq!(derive_project_name(&details, &options).unwrap(), "explicit");
    }

    #[test]
    fn test_derive_project_name_falls_back_to_dir() {
        let details = ConfigDetails {
            working_dir: PathBuf::from("/home/user/My App"),
            config_files: vec![ConfigFile::with_content("c.yaml", "services: {}\n")],
            environment: Environment::new(),
        };
        let name = derive_project_name(&details, &LoadOptions::default()).unwrap();
        assert_eq!(name, "my_app");
    }

    #[test]
    fn test_check_consistency_undefined_dependency() {
        let model = flotilla_tree::parse_yaml(
            "services:\n  web:\n    depends_on:\n      db:\n        condition: service_started\n        required: true\n",
        )
        .unwrap();
        let err = check_consistency(&model).unwrap_err();
        assert!(err.to_string().contains("depends on undefined service"));
    }

    #[test]
    fn test_check_consistency_optional_dependency_ok() {
        let model = flotilla_tree::parse_yaml(
            "services:\n  web:\n    depends_on:\n      db:\n        condition: service_started\n        required: false\n",
        )
        .unwrap();
        assert!(check_consistency(&model).is_ok());
    }
}
