//! The model-backed named-mappings resolver.
//!
//! Publishes lazy `${name[key]}` lookups whose values are computed from the
//! model under construction: `project` and `compose` globally, `service` /
//! `image` / `container` / `containerEnv` / `labels` per service, `network`
//! / `volume` / `config` / `secret` (plus `labels`) per resource, and the
//! plural cross-reference mappings at the root.
//!
//! Lookups are lazy, cached per scope, and cycle-guarded: a computation may
//! interpolate a small sub-model, which may re-enter other mappings under
//! the same scope. The cycle tracker is keyed by `(name, key)`: the same
//! key under a different name is legal, re-entering the same pair is not.

use crate::canonical::{canonical, set_name_from_key};
use crate::environment::{effective_environment, effective_labels};
use crate::error::LoadError;
use crate::interpolate::interpolate_with_path;
use crate::loader::ConfigDetails;
use crate::paths::resolve_relative_paths;
use flotilla_template::{
    interpolate, InterpolateOptions, InterpolationError, MappingResult, NamedMapping,
    NamedMappings, NamedMappingsResolver, TemplateError,
};
use flotilla_tree::{
    attach_source_by, extract_subset, strip_sources_with, unwrap_value_with_path,
    wrap_value_with_path, SourceTag, TreePath, Value,
};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

pub struct ModelNamedMappingsResolver {
    ctx: Rc<ResolverContext>,
}

struct ResolverContext {
    details: ConfigDetails,
    project_name: String,
    config_file: Option<PathBuf>,
}

impl ModelNamedMappingsResolver {
    pub fn new(
        details: ConfigDetails,
        project_name: impl Into<String>,
        config_file: Option<PathBuf>,
    ) -> Self {
        Self {
            ctx: Rc::new(ResolverContext {
                details,
                project_name: project_name.into(),
                config_file,
            }),
        }
    }
}

/// Per-path lookup scope: the sub-model, the caches, and the cycle tracker.
struct Scope {
    value: Value,
    path: TreePath,
    opts: InterpolateOptions,
    caches: RefCell<HashMap<String, HashMap<String, Option<String>>>>,
    cycles: RefCell<HashMap<String, HashSet<String>>>,
    env_entries: RefCell<Option<Rc<IndexMap<String, Option<String>>>>>,
    label_entries: RefCell<Option<Rc<IndexMap<String, Option<String>>>>>,
}

impl Scope {
    fn new(value: Value, path: TreePath, opts: InterpolateOptions) -> Rc<Self> {
        Rc::new(Self {
            value,
            path,
            opts,
            caches: RefCell::new(HashMap::new()),
            cycles: RefCell::new(HashMap::new()),
            env_entries: RefCell::new(None),
            label_entries: RefCell::new(None),
        })
    }

    /// Memoized lookup with cycle detection on `(name, key)`.
    fn cached(
        &self,
        name: &str,
        key: &str,
        compute: impl FnOnce() -> MappingResult,
    ) -> MappingResult {
        if let Some(cache) = self.caches.borrow().get(name) {
            if let Some(value) = cache.get(key) {
                return Ok(value.clone());
            }
        }
        {
            let mut cycles = self.cycles.borrow_mut();
            let tracker = cycles.entry(name.to_owned()).or_default();
            if tracker.contains(key) {
                return Err(TemplateError::LookupCycle {
                    name: name.to_owned(),
                    key: key.to_owned(),
                });
            }
            tracker.insert(key.to_owned());
        }
        let result = compute();
        if let Some(tracker) = self.cycles.borrow_mut().get_mut(name) {
            tracker.remove(key);
        }
        let value = result?;
        self.store(name, key, value.clone());
        Ok(value)
    }

    fn store(&self, name: &str, key: &str, value: Option<String>) {
        self.caches
            .borrow_mut()
            .entry(name.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
    }
}

fn model_error(err: LoadError) -> TemplateError {
    TemplateError::Resolve(err.to_string())
}

/// Build a [`NamedMapping`] closure over the shared context and scope.
fn mapping(
    ctx: &Rc<ResolverContext>,
    scope: &Rc<Scope>,
    f: fn(&ResolverContext, &Rc<Scope>, &[String]) -> MappingResult,
) -> NamedMapping {
    let ctx = ctx.clone();
    let scope = scope.clone();
    NamedMapping::new(move |keys| {
        if keys.is_empty() {
            return Ok(None);
        }
        f(&ctx, &scope, keys)
    })
}

impl NamedMappingsResolver for ModelNamedMappingsResolver {
    fn accept(&self, path: &TreePath) -> bool {
        if path.is_empty() {
            return true;
        }
        let parts = path.parts();
        parts.len() == 2
            && matches!(
                parts[0].as_str(),
                "services" | "networks" | "volumes" | "configs" | "secrets"
            )
    }

    fn resolve(
        &self,
        value: &Value,
        path: &TreePath,
        opts: &InterpolateOptions,
    ) -> Result<NamedMappings, InterpolationError> {
        let scope = Scope::new(value.clone(), path.clone(), opts.clone());
        let mut mappings = NamedMappings::new();

        if path.is_empty() {
            for (name, kind) in [
                ("services", CrossRef::Service),
                ("containers", CrossRef::Container),
                ("networks", CrossRef::Network),
                ("volumes", CrossRef::Volume),
                ("configs", CrossRef::Config),
                ("secrets", CrossRef::Secret),
            ] {
                let ctx = self.ctx.clone();
                let scope = scope.clone();
                mappings.insert(
                    name,
                    NamedMapping::new(move |keys| cross_ref_mapping(&ctx, &scope, kind, keys)),
                );
            }
            return Ok(mappings);
        }

        match path.parts()[0].as_str() {
            "services" => {
                mappings.insert("service", mapping(&self.ctx, &scope, service_mapping));
                mappings.insert("image", mapping(&self.ctx, &scope, image_mapping));
                mappings.insert("container", mapping(&self.ctx, &scope, container_mapping));
                mappings.insert(
                    "containerEnv",
                    mapping(&self.ctx, &scope, |ctx, scope, keys| {
                        container_env_mapping(ctx, scope, &keys[0])
                    }),
                );
                mappings.insert(
                    "labels",
                    mapping(&self.ctx, &scope, |ctx, scope, keys| {
                        labels_mapping(ctx, scope, &keys[0])
                    }),
                );
            }
            "networks" => {
                mappings.insert("network", mapping(&self.ctx, &scope, network_mapping));
                mappings.insert(
                    "labels",
                    mapping(&self.ctx, &scope, |ctx, scope, keys| {
                        labels_mapping(ctx, scope, &keys[0])
                    }),
                );
            }
            "volumes" => {
                mappings.insert("volume", mapping(&self.ctx, &scope, volume_mapping));
                mappings.insert(
                    "labels",
                    mapping(&self.ctx, &scope, |ctx, scope, keys| {
                        labels_mapping(ctx, scope, &keys[0])
                    }),
                );
            }
            "configs" => {
                mappings.insert("config", mapping(&self.ctx, &scope, config_mapping));
                mappings.insert(
                    "labels",
                    mapping(&self.ctx, &scope, |ctx, scope, keys| {
                        labels_mapping(ctx, scope, &keys[0])
                    }),
                );
            }
            "secrets" => {
                mappings.insert("secret", mapping(&self.ctx, &scope, secret_mapping));
                mappings.insert(
                    "labels",
                    mapping(&self.ctx, &scope, |ctx, scope, keys| {
                        labels_mapping(ctx, scope, &keys[0])
                    }),
                );
            }
            _ => {}
        }
        Ok(mappings)
    }

    fn resolve_global(
        &self,
        opts: &InterpolateOptions,
    ) -> Result<NamedMappings, InterpolationError> {
        let scope = Scope::new(Value::Null, TreePath::new(), opts.clone());
        let mut mappings = NamedMappings::new();
        mappings.insert("project", mapping(&self.ctx, &scope, project_mapping));
        mappings.insert("compose", mapping(&self.ctx, &scope, compose_mapping));
        Ok(mappings)
    }
}

fn project_mapping(ctx: &ResolverContext, _scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    match keys[0].as_str() {
        "name" => Ok(Some(ctx.project_name.clone())),
        "working-dir" | "working_dir" => {
            Ok(Some(ctx.details.working_dir.display().to_string()))
        }
        _ => Ok(None),
    }
}

fn compose_mapping(ctx: &ResolverContext, _scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    match keys[0].as_str() {
        "root-dir" | "working-dir" | "working_dir" => {
            Ok(Some(ctx.details.working_dir.display().to_string()))
        }
        "config-dir" => Ok(ctx
            .config_file
            .as_ref()
            .and_then(|file| file.parent())
            .map(|dir| dir.display().to_string())),
        _ => Ok(None),
    }
}

fn service_mapping(ctx: &ResolverContext, scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    match keys[0].as_str() {
        "name" => Ok(Some(scope.path.last().to_owned())),
        "scale" => scope.cached("service", "scale", || {
            let subset = extract_subset(
                &scope.value,
                &[TreePath::from("scale"), TreePath::from("deploy.replicas")],
            );
            let interpolated = interpolate_with_path(&scope.path, &subset, &scope.opts)?;
            let replicas = interpolated
                .value_at(&TreePath::from("deploy.replicas"))
                .or_else(|| interpolated.get("scale"))
                .map(Value::unsourced)
                .and_then(Value::scalar_to_string)
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(1);
            Ok(Some(replicas.to_string()))
        }),
        "containers" if keys.len() > 2 && keys[1] == "0" => {
            container_mapping(ctx, scope, &keys[2..])
        }
        _ => {
            // A single-replica service exposes its only container's fields.
            if let Some(scale) = service_mapping(ctx, scope, &["scale".to_owned()])? {
                if scale == "1" {
                    return container_mapping(ctx, scope, keys);
                }
            }
            Ok(None)
        }
    }
}

fn image_mapping(_ctx: &ResolverContext, scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    match keys[0].as_str() {
        "name" => interpolated_field(scope, "image", "name", "image"),
        _ => Ok(None),
    }
}

fn container_mapping(ctx: &ResolverContext, scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    match keys[0].as_str() {
        "name" => interpolated_field(scope, "container", "name", "container_name"),
        "user" => interpolated_field(scope, "container", "user", "user"),
        "working-dir" | "working_dir" => {
            interpolated_field(scope, "container", "working-dir", "working_dir")
        }
        "image" => {
            if keys.len() == 1 {
                image_mapping(ctx, scope, &["name".to_owned()])
            } else {
                image_mapping(ctx, scope, &keys[1..])
            }
        }
        "env" if keys.len() >= 2 => container_env_mapping(ctx, scope, &keys[1]),
        "labels" if keys.len() >= 2 => labels_mapping(ctx, scope, &keys[1]),
        _ => Ok(None),
    }
}

/// Interpolate one scalar field of the scope's sub-model, on demand.
fn interpolated_field(
    scope: &Rc<Scope>,
    cache_name: &str,
    cache_key: &str,
    field: &str,
) -> MappingResult {
    scope.cached(cache_name, cache_key, || match scope.value.get(field) {
        Some(value) if !value.is_null() => {
            let interpolated = interpolate_with_path(&scope.path.next(field), value, &scope.opts)?;
            Ok(interpolated.unsourced().scalar_to_string())
        }
        _ => Ok(None),
    })
}

fn container_env_mapping(ctx: &ResolverContext, scope: &Rc<Scope>, key: &str) -> MappingResult {
    scope.cached("containerEnv", key, || {
        let entries = uninterpolated_env(ctx, scope)?;
        match entries.get(key) {
            None | Some(None) => Ok(None),
            Some(Some(raw)) => {
                // Interpolate only this one entry, so unresolved references
                // elsewhere in the environment cannot fail this lookup.
                let path = scope.path.next("environment").next(key);
                let value = interpolate_with_path(&path, &Value::from(raw.as_str()), &scope.opts)?;
                Ok(Some(
                    value.unsourced().scalar_to_string().unwrap_or_default(),
                ))
            }
        }
    })
}

fn labels_mapping(ctx: &ResolverContext, scope: &Rc<Scope>, key: &str) -> MappingResult {
    scope.cached("labels", key, || {
        let entries = uninterpolated_labels(ctx, scope)?;
        match entries.get(key) {
            None | Some(None) => Ok(None),
            Some(Some(raw)) => {
                let path = scope.path.next("labels").next(key);
                let value = interpolate_with_path(&path, &Value::from(raw.as_str()), &scope.opts)?;
                Ok(Some(
                    value.unsourced().scalar_to_string().unwrap_or_default(),
                ))
            }
        }
    })
}

/// The whole uninterpolated environment of the scope's service, built once:
/// subset → canonical (env_file normalization) → path resolution → dotenv
/// expansion.
fn uninterpolated_env(
    ctx: &ResolverContext,
    scope: &Rc<Scope>,
) -> Result<Rc<IndexMap<String, Option<String>>>, TemplateError> {
    if let Some(entries) = scope.env_entries.borrow().clone() {
        return Ok(entries);
    }
    let subset = extract_subset(
        &scope.value,
        &[TreePath::from("environment"), TreePath::from("env_file")],
    );
    let fragment = canonical_fragment(ctx, scope, subset)?;
    let host = host_lookup(ctx);
    let entries = Rc::new(effective_environment(&fragment, &host).map_err(model_error)?);
    *scope.env_entries.borrow_mut() = Some(entries.clone());
    Ok(entries)
}

fn uninterpolated_labels(
    ctx: &ResolverContext,
    scope: &Rc<Scope>,
) -> Result<Rc<IndexMap<String, Option<String>>>, TemplateError> {
    if let Some(entries) = scope.label_entries.borrow().clone() {
        return Ok(entries);
    }
    let subset = extract_subset(
        &scope.value,
        &[TreePath::from("labels"), TreePath::from("label_file")],
    );
    let fragment = canonical_fragment(ctx, scope, subset)?;
    let host = host_lookup(ctx);
    let entries = Rc::new(effective_labels(&fragment, &host).map_err(model_error)?);
    *scope.label_entries.borrow_mut() = Some(entries.clone());
    Ok(entries)
}

/// Wrap a subset at the scope's path, canonicalize it, and resolve its
/// relative paths, then unwrap it again.
fn canonical_fragment(
    ctx: &ResolverContext,
    scope: &Rc<Scope>,
    subset: Value,
) -> Result<Value, TemplateError> {
    let model = wrap_value_with_path(&scope.path, subset);
    let model = canonical(model, false).map_err(model_error)?;
    let model = resolve_scoped_paths(ctx, scope, model)?;
    Ok(unwrap_value_with_path(&scope.path, &model).unwrap_or(Value::Null))
}

/// Resolve relative paths of a wrapped sub-model, honoring any working-dir
/// override the `compose` mapping publishes for a sub-tree. The override is
/// delivered by temporarily tagging every leaf with its directory, then
/// stripping the tags into a side map; the annotation never survives into
/// the result.
fn resolve_scoped_paths(
    ctx: &ResolverContext,
    scope: &Rc<Scope>,
    model: Value,
) -> Result<Value, TemplateError> {
    let table = scope.opts.named_mappings.borrow().clone();
    let annotated = attach_source_by(model, &|path, _| {
        table
            .lookup(path)
            .get("compose")
            .and_then(|m| m.call(&["working-dir".to_owned()]).ok().flatten())
            .map(SourceTag::new)
    });
    let (model, overrides) = strip_sources_with(annotated);
    resolve_relative_paths(model, &ctx.details.working_dir, &overrides).map_err(model_error)
}

fn host_lookup(ctx: &ResolverContext) -> impl Fn(&str) -> Option<String> + '_ {
    move |name: &str| ctx.details.environment.get(name).cloned()
}

fn network_mapping(ctx: &ResolverContext, scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    if let Some(value) = resource_mapping(ctx, scope, "network", keys)? {
        return Ok(Some(value));
    }
    match keys[0].as_str() {
        "driver" => interpolated_field(scope, "network", "driver", "driver"),
        _ => Ok(None),
    }
}

fn volume_mapping(ctx: &ResolverContext, scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    if let Some(value) = resource_mapping(ctx, scope, "volume", keys)? {
        return Ok(Some(value));
    }
    match keys[0].as_str() {
        "driver" => interpolated_field(scope, "volume", "driver", "driver"),
        _ => Ok(None),
    }
}

fn config_mapping(ctx: &ResolverContext, scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    if let Some(value) = resource_mapping(ctx, scope, "config", keys)? {
        return Ok(Some(value));
    }
    file_object_mapping(ctx, scope, "config", &keys[0])
}

fn secret_mapping(ctx: &ResolverContext, scope: &Rc<Scope>, keys: &[String]) -> MappingResult {
    if let Some(value) = resource_mapping(ctx, scope, "secret", keys)? {
        return Ok(Some(value));
    }
    file_object_mapping(ctx, scope, "secret", &keys[0])
}

/// `name` and `external` of a resource, resolved jointly: the two fields
/// feed each other (an external resource defaults its name to its key), so
/// one computation settles both and cross-caches the sibling.
fn resource_mapping(
    ctx: &ResolverContext,
    scope: &Rc<Scope>,
    kind: &str,
    keys: &[String],
) -> MappingResult {
    match keys[0].as_str() {
        "name" | "external" => {
            let requested = keys[0].clone();
            scope.cached(kind, &requested, || {
                let subset =
                    extract_subset(&scope.value, &[TreePath::from("name"), TreePath::from("external")]);
                let mut model = wrap_value_with_path(&scope.path, subset);
                if let Some(entries) = model.as_mapping_mut() {
                    // The top-level name slot carries the project name, so
                    // default naming sees it.
                    entries.insert("name".into(), Value::String(ctx.project_name.clone()));
                }
                let model = canonical(model, false).map_err(model_error)?;
                let mut model =
                    interpolate(&model, &scope.opts).map_err(|e| e.into_resolve_error())?;
                set_name_from_key(&mut model);
                let resource =
                    unwrap_value_with_path(&scope.path, &model).unwrap_or(Value::Null);
                let name = resource
                    .get("name")
                    .map(Value::unsourced)
                    .and_then(Value::scalar_to_string)
                    .unwrap_or_default();
                let external = resource
                    .get("external")
                    .map(Value::unsourced)
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                    .to_string();
                if requested == "name" {
                    scope.store(kind, "external", Some(external));
                    Ok(Some(name))
                } else {
                    scope.store(kind, "name", Some(name));
                    Ok(Some(external))
                }
            })
        }
        "labels" if keys.len() >= 2 => labels_mapping(ctx, scope, &keys[1]),
        _ => Ok(None),
    }
}

fn file_object_mapping(
    ctx: &ResolverContext,
    scope: &Rc<Scope>,
    kind: &str,
    key: &str,
) -> MappingResult {
    match key {
        "file" => scope.cached(kind, "file", || match scope.value.get("file") {
            Some(value) if !value.is_null() => {
                let path = scope.path.next("file");
                let model = wrap_value_with_path(&path, value.clone());
                let model = interpolate(&model, &scope.opts).map_err(|e| e.into_resolve_error())?;
                let model = resolve_scoped_paths(ctx, scope, model)?;
                Ok(unwrap_value_with_path(&path, &model)
                    .as_ref()
                    .map(Value::unsourced)
                    .and_then(Value::scalar_to_string))
            }
            _ => Ok(None),
        }),
        "environment" => interpolated_field(scope, kind, "environment", "environment"),
        "content" => interpolated_field(scope, kind, "content", "content"),
        "data" => scope.cached(kind, "data", || {
            if let Some(env_name) = file_object_mapping(ctx, scope, kind, "environment")? {
                return Ok(Some(
                    ctx.details
                        .environment
                        .get(&env_name)
                        .cloned()
                        .unwrap_or_default(),
                ));
            }
            if let Some(file) = file_object_mapping(ctx, scope, kind, "file")? {
                return fs::read_to_string(&file)
                    .map(Some)
                    .map_err(|e| TemplateError::Resolve(format!("cannot read {file}: {e}")));
            }
            if let Some(content) = file_object_mapping(ctx, scope, kind, "content")? {
                return Ok(Some(content));
            }
            Ok(None)
        }),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossRef {
    Service,
    Container,
    Network,
    Volume,
    Config,
    Secret,
}

impl CrossRef {
    fn section(self) -> &'static str {
        match self {
            CrossRef::Service | CrossRef::Container => "services",
            CrossRef::Network => "networks",
            CrossRef::Volume => "volumes",
            CrossRef::Config => "configs",
            CrossRef::Secret => "secrets",
        }
    }

    fn element_mapping(self) -> &'static str {
        match self {
            CrossRef::Service | CrossRef::Container => "service",
            CrossRef::Network => "network",
            CrossRef::Volume => "volume",
            CrossRef::Config => "config",
            CrossRef::Secret => "secret",
        }
    }
}

/// `${services[name].field}` and friends: find the element by key, or by
/// its resolved `name`; containers are enumerated across services by scale.
fn cross_ref_mapping(
    _ctx: &ResolverContext,
    scope: &Rc<Scope>,
    kind: CrossRef,
    keys: &[String],
) -> MappingResult {
    let target = match keys.first() {
        Some(target) => target.clone(),
        None => return Ok(None),
    };
    let mut args: Vec<String> = keys[1..].to_vec();
    if matches!(kind, CrossRef::Config | CrossRef::Secret) && args.is_empty() {
        // `${configs[name]}` with no field reads the payload directly.
        args.push("data".to_owned());
    }

    let section_path = TreePath::new().next(kind.section());
    let table = scope.opts.named_mappings.borrow().clone();

    if kind != CrossRef::Container {
        // Try the element key first.
        if let Some(mapping) = table
            .lookup(&section_path.next(&target))
            .get(kind.element_mapping())
            .cloned()
        {
            return mapping.call(&args);
        }
        // Fall back to matching the resolved name across the section.
        if let Some(elements) = scope.value.get(kind.section()).and_then(Value::as_mapping) {
            for element_key in elements.keys() {
                let element_path = section_path.next(element_key);
                if let Some(mapping) =
                    table.lookup(&element_path).get(kind.element_mapping()).cloned()
                {
                    if mapping.call(&["name".to_owned()])?.as_deref() == Some(target.as_str()) {
                        return mapping.call(&args);
                    }
                }
            }
        }
        return Ok(None);
    }

    // Containers: enumerate every service's replicas by name.
    if let Some(services) = scope.value.get("services").and_then(Value::as_mapping) {
        for service_key in services.keys() {
            let service_path = section_path.next(service_key);
            let mapping = match table.lookup(&service_path).get("service").cloned() {
                Some(mapping) => mapping,
                None => continue,
            };
            let scale = match mapping.call(&["scale".to_owned()])? {
                Some(scale) => scale.parse::<usize>().unwrap_or(0),
                None => continue,
            };
            for i in 0..scale {
                let probe = vec!["containers".to_owned(), i.to_string(), "name".to_owned()];
                if mapping.call(&probe)?.as_deref() == Some(target.as_str()) {
                    let mut call_keys = vec!["containers".to_owned(), i.to_string()];
                    call_keys.append(&mut args);
                    return mapping.call(&call_keys);
                }
            }
        }
    }
    Ok(None)
}
