//! The include driver: pull whole documents into the model.
//!
//! Each `include` entry names one or more files. The first file defines the
//! project directory for the fragment (unless overridden); a `.env` file in
//! that directory seeds the fragment's environment by default. Fragments
//! are loaded through the full pipeline (nested includes and extends
//! apply) and folded into the top-level model section by section, where a
//! same-name resource with a different body is a conflict, not an override.

use crate::environment::parse_dotenv;
use crate::error::LoadError;
use crate::loader::{load_yaml_file, ConfigDetails, ConfigFile, LoadOptions, LocalResourceLoader};
use crate::merge;
use flotilla_template::{interpolate, InterpolateOptions};
use flotilla_tree::{strip_sources, wrap_value_with_path, TreePath, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

struct IncludeEntry {
    paths: Vec<String>,
    project_directory: Option<String>,
    env_files: Vec<String>,
}

/// Apply and remove the model's top-level `include` section.
pub fn apply_include(
    model: &mut Value,
    details: &ConfigDetails,
    options: &LoadOptions,
    project_name: &str,
    included: &[String],
) -> Result<(), LoadError> {
    let entries = match model.get("include") {
        None => return Ok(()),
        Some(Value::Null) => {
            remove_include_key(model);
            return Ok(());
        }
        Some(raw) => parse_include_entries(raw.clone(), details, options)?,
    };

    for entry in entries {
        options.cancel.check()?;
        tracing::debug!(paths = ?entry.paths, "applying include");
        apply_one(model, &entry, details, options, project_name, included)?;
    }
    remove_include_key(model);
    Ok(())
}

fn remove_include_key(model: &mut Value) {
    if let Some(entries) = model.as_mapping_mut() {
        entries.shift_remove("include");
    }
}

fn parse_include_entries(
    raw: Value,
    details: &ConfigDetails,
    options: &LoadOptions,
) -> Result<Vec<IncludeEntry>, LoadError> {
    let raw = strip_sources(raw);
    let raw = if options.skip_interpolation {
        raw
    } else {
        // The include section interpolates from the environment before any
        // model-backed mappings exist.
        let environment = details.environment.clone();
        let interp = InterpolateOptions::new()
            .with_lookup(move |name| environment.get(name).cloned());
        let path = TreePath::from("include");
        let wrapped = wrap_value_with_path(&path, raw);
        let interpolated = interpolate(&wrapped, &interp)?;
        interpolated
            .value_at(&path)
            .cloned()
            .unwrap_or(Value::Null)
    };

    let items = raw
        .into_sequence()
        .ok_or_else(|| LoadError::Model("`include` must be a list".into()))?;

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        match item.into_unsourced() {
            Value::String(path) => entries.push(IncludeEntry {
                paths: vec![path],
                project_directory: None,
                env_files: Vec::new(),
            }),
            Value::Mapping(fields) => {
                let paths = string_or_list(fields.get("path"), "include.path")?;
                let project_directory = fields
                    .get("project_directory")
                    .map(Value::unsourced)
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let env_files = match fields.get("env_file") {
                    None => Vec::new(),
                    some => string_or_list(some, "include.env_file")?,
                };
                entries.push(IncludeEntry {
                    paths,
                    project_directory,
                    env_files,
                });
            }
            other => {
                return Err(LoadError::syntax(
                    &TreePath::from("include.[]"),
                    &other,
                    "include",
                ))
            }
        }
    }
    Ok(entries)
}

fn string_or_list(value: Option<&Value>, field: &str) -> Result<Vec<String>, LoadError> {
    match value.map(Value::unsourced) {
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| {
                    LoadError::Model(format!("{field} must be a string or a list of strings"))
                })
            })
            .collect(),
        Some(other) => Err(LoadError::Model(format!(
            "{field} must be a string or a list of strings, got {}",
            other.type_name()
        ))),
        None => Err(LoadError::Model(format!("{field} is required"))),
    }
}

fn apply_one(
    model: &mut Value,
    entry: &IncludeEntry,
    details: &ConfigDetails,
    options: &LoadOptions,
    project_name: &str,
    included: &[String],
) -> Result<(), LoadError> {
    // Resolve every referenced file through the loader chain; the first one
    // pins the fragment's project directory and the cycle identity.
    let mut local_files = Vec::with_capacity(entry.paths.len());
    let mut project_directory = entry.project_directory.clone().map(PathBuf::from);

    for (i, path) in entry.paths.iter().enumerate() {
        let local = options.load_resource(path)?;
        if i == 0 {
            match &mut project_directory {
                None => {
                    project_directory =
                        Some(local.parent().unwrap_or(Path::new(".")).to_path_buf());
                }
                Some(dir) if dir.is_relative() => {
                    *dir = details.working_dir.join(&*dir);
                }
                Some(_) => {}
            }
            let identity = local.display().to_string();
            if included.contains(&identity) {
                let mut chain = included.to_vec();
                chain.push(identity);
                return Err(LoadError::IncludeCycle { chain });
            }
        }
        local_files.push(local);
    }
    let project_directory = project_directory.expect("at least one include path");

    // The fragment's environment: an explicit env_file list, or the project
    // directory's `.env`, with the host environment taking precedence.
    let mut env_files: Vec<PathBuf> = Vec::new();
    if entry.env_files.is_empty() {
        let candidate = project_directory.join(".env");
        if candidate.is_file() {
            env_files.push(candidate);
        }
    } else {
        for file in &entry.env_files {
            let file = if Path::new(file).is_absolute() {
                PathBuf::from(file)
            } else {
                details.working_dir.join(file)
            };
            let metadata = fs::metadata(&file)
                .map_err(|e| LoadError::resource(file.display().to_string(), e))?;
            if metadata.is_dir() {
                return Err(LoadError::Model(format!(
                    "{} is not a file",
                    file.display()
                )));
            }
            env_files.push(file);
        }
    }

    let mut environment = crate::loader::Environment::new();
    for file in &env_files {
        let content = fs::read_to_string(file)
            .map_err(|e| LoadError::resource(file.display().to_string(), e))?;
        let base = |name: &str| details.lookup_env(name);
        environment.extend(parse_dotenv(&content, &base));
    }
    for (key, value) in &details.environment {
        environment.insert(key.clone(), value.clone());
    }

    let sub_details = ConfigDetails {
        working_dir: project_directory.clone(),
        config_files: Vec::new(),
        environment,
    };
    let mut sub_options = options.clone();
    sub_options.skip_normalization = true;
    sub_options.skip_consistency_check = true;
    sub_options.resource_loaders = options.remote_resource_loaders();
    sub_options
        .resource_loaders
        .push(Rc::new(LocalResourceLoader {
            working_dir: project_directory,
        }));

    let mut imported: Option<Value> = None;
    for file in &local_files {
        let fragment = load_yaml_file(
            &ConfigFile::new(file.display().to_string()),
            &sub_details,
            &sub_options,
            project_name,
            included,
        )?;
        imported = Some(match imported {
            None => fragment,
            Some(base) => merge::merge(&base, &fragment)?,
        });
    }

    if let Some(imported) = imported {
        import_resources(&imported, model)?;
    }
    Ok(())
}

/// Fold every resource section of `source` into `target`; a same-name
/// resource with a different body is fatal.
fn import_resources(source: &Value, target: &mut Value) -> Result<(), LoadError> {
    for section in ["services", "volumes", "networks", "secrets", "configs"] {
        let from = match source.get(section).and_then(Value::as_mapping) {
            Some(from) => from,
            None => continue,
        };
        let target_entries = match target.as_mapping_mut() {
            Some(entries) => entries,
            None => return Ok(()),
        };
        let into = target_entries
            .entry(section.to_owned())
            .or_insert_with(|| Value::Mapping(Default::default()));
        let into = match into.as_mapping_mut() {
            Some(into) => into,
            None => {
                return Err(LoadError::Model(format!("{section} must be a mapping")));
            }
        };
        for (name, value) in from {
            match into.get(name) {
                Some(existing) => {
                    let same = strip_sources(existing.clone()) == strip_sources(value.clone());
                    if !same {
                        return Err(LoadError::Conflict {
                            resource: format!("{section}.{name}"),
                        });
                    }
                }
                None => {
                    into.insert(name.clone(), value.clone());
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_tree::parse_yaml;

    #[test]
    fn test_import_resources_union() {
        let mut target = parse_yaml("services:\n  web:\n    image: a\n").unwrap();
        let source = parse_yaml("services:\n  db:\n    image: b\nvolumes:\n  data: {}\n").unwrap();
        import_resources(&source, &mut target).unwrap();
        assert!(target.value_at(&TreePath::from("services.web")).is_some());
        assert!(target.value_at(&TreePath::from("services.db")).is_some());
        assert!(target.value_at(&TreePath::from("volumes.data")).is_some());
    }

    #[test]
    fn test_import_resources_conflict() {
        let mut target = parse_yaml("services:\n  api:\n    image: a\n").unwrap();
        let source = parse_yaml("services:\n  api:\n    image: b\n").unwrap();
        let err = import_resources(&source, &mut target).unwrap_err();
        assert_eq!(
            err.to_string(),
            "services.api conflicts with imported resource"
        );
    }

    #[test]
    fn test_import_resources_equal_bodies_allowed() {
        let mut target = parse_yaml("services:\n  api:\n    image: same\n").unwrap();
        let source = parse_yaml("services:\n  api:\n    image: same\n").unwrap();
        assert!(import_resources(&source, &mut target).is_ok());
    }

    #[test]
    fn test_string_or_list() {
        let single = Value::from("one.yaml");
        assert_eq!(
            string_or_list(Some(&single), "include.path").unwrap(),
            vec!["one.yaml"]
        );
        let list = Value::Sequence(vec![Value::from("a.yaml"), Value::from("b.yaml")]);
        assert_eq!(
            string_or_list(Some(&list), "include.path").unwrap(),
            vec!["a.yaml", "b.yaml"]
        );
        assert!(string_or_list(Some(&Value::Integer(1)), "include.path").is_err());
        assert!(string_or_list(None, "include.path").is_err());
    }
}
