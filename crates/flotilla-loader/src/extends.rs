//! The extends driver: a service inherits another service's definition.
//!
//! Resolution is depth-first: the referenced base resolves its own
//! `extends` first, possibly across files. The base is then deep-cloned,
//! stripped of the attributes that would smuggle in dependencies on the
//! base's neighbours (`depends_on`, `volumes_from`), and the current
//! service merges over it. A `(file, service)` pair appearing twice on the
//! resolution stack is fatal.

use crate::error::LoadError;
use crate::interpolate::interpolate_cast_table;
use crate::loader::{load_yaml_file, ConfigDetails, ConfigFile, LoadOptions, LocalResourceLoader};
use crate::merge::extend_service;
use flotilla_template::{interpolate, InterpolateOptions};
use flotilla_tree::{strip_sources, wrap_value_with_path, Mapping, TreePath, Value};
use std::path::Path;
use std::rc::Rc;

/// Attributes that would create dependencies on the base service's
/// neighbours; they never survive an extends merge.
const EXCLUSIONS: [&str; 2] = ["depends_on", "volumes_from"];

/// The stack of `(file, service)` pairs currently being resolved.
#[derive(Debug, Clone, Default)]
pub struct CycleTracker {
    stack: Vec<(String, String)>,
}

impl CycleTracker {
    fn with(&self, filename: &str, service: &str) -> Result<CycleTracker, LoadError> {
        if self
            .stack
            .iter()
            .any(|(f, s)| f == filename && s == service)
        {
            let mut chain: Vec<String> = self
                .stack
                .iter()
                .map(|(f, s)| format!("{s} in {f}"))
                .collect();
            chain.push(format!("{service} in {filename}"));
            return Err(LoadError::ExtendsCycle { chain });
        }
        let mut next = self.clone();
        next.stack.push((filename.to_owned(), service.to_owned()));
        Ok(next)
    }
}

/// Resolve `extends` for every service of the model, in place.
pub fn apply_extends(
    model: &mut Value,
    details: &ConfigDetails,
    options: &LoadOptions,
    project_name: &str,
    filename: &str,
) -> Result<(), LoadError> {
    options.cancel.check()?;
    let entries = match model.as_mapping_mut() {
        Some(entries) => entries,
        None => return Ok(()),
    };
    let services = match entries.shift_remove("services") {
        None => return Ok(()),
        Some(Value::Mapping(services)) => services,
        Some(other) => {
            entries.insert("services".into(), other);
            return Err(LoadError::Model("services must be a mapping".into()));
        }
    };

    let mut services = services;
    let tracker = CycleTracker::default();
    let names: Vec<String> = services.keys().cloned().collect();
    for name in names {
        let merged = apply_service_extends(
            &name,
            &mut services,
            details,
            options,
            project_name,
            filename,
            &tracker,
        )?;
        services.insert(name, merged);
    }

    if let Some(entries) = model.as_mapping_mut() {
        entries.insert("services".into(), Value::Mapping(services));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_service_extends(
    name: &str,
    services: &mut Mapping,
    details: &ConfigDetails,
    options: &LoadOptions,
    project_name: &str,
    filename: &str,
    tracker: &CycleTracker,
) -> Result<Value, LoadError> {
    let service = match services.get(name) {
        None => return Ok(Value::Null),
        Some(service) => service.clone(),
    };
    if service.is_null() {
        return Ok(Value::Null);
    }
    let entries = service.as_mapping().ok_or_else(|| {
        LoadError::Model(format!("services.{name} must be a mapping"))
    })?;
    let extends = match entries.get("extends") {
        None => return Ok(service),
        Some(extends) => strip_sources(extends.clone()),
    };

    // The reference itself may contain variables.
    let extends = if options.skip_interpolation {
        extends
    } else {
        let environment = details.environment.clone();
        let mut interp = InterpolateOptions::new()
            .with_lookup(move |key| environment.get(key).cloned());
        interp.type_casts = interpolate_cast_table();
        let path = TreePath::from_parts(["services", name, "extends"]);
        let wrapped = wrap_value_with_path(&path, extends);
        let interpolated = interpolate(&wrapped, &interp)?;
        interpolated.value_at(&path).cloned().unwrap_or(Value::Null)
    };

    let (reference, ref_file) = match &extends {
        Value::String(reference) => (reference.clone(), None),
        Value::Mapping(fields) => {
            let reference = fields
                .get("service")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    LoadError::Model(format!("services.{name}.extends.service must be a string"))
                })?
                .to_owned();
            let file = fields.get("file").and_then(Value::as_str).map(str::to_owned);
            (reference, file)
        }
        other => {
            return Err(LoadError::syntax(
                &TreePath::from_parts(["services", name, "extends"]),
                other,
                "extends",
            ))
        }
    };

    let base = if let Some(ref_file) = ref_file {
        tracing::debug!(service = name, base = %reference, file = %ref_file, "resolving extends");
        let (mut base_services, sub_details, sub_options, base_filename) =
            load_extends_base(&ref_file, name, &reference, filename, details, options, project_name)?;
        let tracker = tracker.with(&base_filename, name)?;
        apply_service_extends(
            &reference,
            &mut base_services,
            &sub_details,
            &sub_options,
            project_name,
            &base_filename,
            &tracker,
        )?
    } else {
        if !services.contains_key(&reference) {
            return Err(LoadError::Model(format!(
                "cannot extend service {name:?} in {filename}: service {reference:?} not found"
            )));
        }
        let tracker = tracker.with(filename, name)?;
        let merged = apply_service_extends(
            &reference,
            services,
            details,
            options,
            project_name,
            filename,
            &tracker,
        )?;
        services.insert(reference.clone(), merged.clone());
        merged
    };

    if base.is_null() {
        return Ok(service);
    }
    let mut source = base.into_mapping().unwrap_or_default();
    for exclusion in EXCLUSIONS {
        source.shift_remove(exclusion);
    }
    let mut merged = extend_service(&Value::Mapping(source), &service)?;
    if let Some(entries) = merged.as_mapping_mut() {
        entries.shift_remove("extends");
    }
    Ok(merged)
}

/// Load the file a cross-file `extends` points at and return its services,
/// with options rebased on the referenced file's own directory.
fn load_extends_base(
    ref_file: &str,
    name: &str,
    reference: &str,
    filename: &str,
    details: &ConfigDetails,
    options: &LoadOptions,
    project_name: &str,
) -> Result<(Mapping, ConfigDetails, LoadOptions, String), LoadError> {
    let local = options.load_resource(ref_file)?;
    let local_dir = local.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut sub_options = options.clone();
    sub_options.resource_loaders = options.remote_resource_loaders();
    sub_options
        .resource_loaders
        .push(Rc::new(LocalResourceLoader {
            working_dir: local_dir.clone(),
        }));
    sub_options.skip_normalization = true;
    sub_options.skip_consistency_check = true;
    sub_options.skip_include = true;
    // The base's own extends graph resolves here, on its raw definition.
    sub_options.skip_extends = true;
    sub_options.skip_validation = true;
    sub_options.skip_default_values = true;

    let sub_details = ConfigDetails {
        working_dir: local_dir,
        config_files: Vec::new(),
        environment: details.environment.clone(),
    };

    let base_filename = local.display().to_string();
    let source = load_yaml_file(
        &ConfigFile::new(base_filename.clone()),
        &sub_details,
        &sub_options,
        project_name,
        &[],
    )?;
    let services = match source.get("services") {
        None => {
            return Err(LoadError::Model(format!(
                "cannot extend service {name:?} in {base_filename}: no services section"
            )))
        }
        Some(services) => services.as_mapping().cloned().ok_or_else(|| {
            LoadError::Model(format!(
                "cannot extend service {name:?} in {base_filename}: services must be a mapping"
            ))
        })?,
    };
    if !services.contains_key(reference) {
        return Err(LoadError::Model(format!(
            "cannot extend service {name:?} in {filename}: service {reference:?} not found in {ref_file}"
        )));
    }

    // Extends inside the base apply on its raw definition, so re-enable the
    // recursion driver for the caller.
    sub_options.skip_extends = options.skip_extends;
    Ok((services, sub_details, sub_options, base_filename))
}
