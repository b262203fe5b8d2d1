//! The loader side of interpolation: the type-cast table for known model
//! paths, and the wrap-interpolate-unwrap helper the named mappings use to
//! expand a small sub-model in place.

use flotilla_template::{interpolate, Cast, CastTable, InterpolateOptions, TemplateError};
use flotilla_tree::{unwrap_value_with_path, wrap_value_with_path, TreePath, Value};
use once_cell::sync::Lazy;
use std::rc::Rc;

static CAST_TABLE: Lazy<CastTable> = Lazy::new(build_cast_table);

fn build_cast_table() -> CastTable {
    fn service(parts: &str) -> TreePath {
        TreePath::from(format!("services.*.{parts}").as_str())
    }
    let p = TreePath::from;

    let mut casts = CastTable::new();
    casts.insert(service("configs.[].mode"), Cast::Int);
    casts.insert(service("cpu_count"), Cast::Int64);
    casts.insert(service("cpu_percent"), Cast::Float);
    casts.insert(service("cpu_period"), Cast::Int64);
    casts.insert(service("cpu_quota"), Cast::Int64);
    casts.insert(service("cpu_rt_period"), Cast::Int64);
    casts.insert(service("cpu_rt_runtime"), Cast::Int64);
    casts.insert(service("cpus"), Cast::Float32);
    casts.insert(service("cpu_shares"), Cast::Int64);
    casts.insert(service("init"), Cast::Bool);
    casts.insert(service("deploy.replicas"), Cast::Int);
    casts.insert(service("deploy.update_config.parallelism"), Cast::Int);
    casts.insert(service("deploy.update_config.max_failure_ratio"), Cast::Float);
    casts.insert(service("deploy.rollback_config.parallelism"), Cast::Int);
    casts.insert(service("deploy.rollback_config.max_failure_ratio"), Cast::Float);
    casts.insert(service("deploy.restart_policy.max_attempts"), Cast::Int);
    casts.insert(service("deploy.placement.max_replicas_per_node"), Cast::Int);
    casts.insert(service("healthcheck.retries"), Cast::Int);
    casts.insert(service("healthcheck.disable"), Cast::Bool);
    casts.insert(service("oom_kill_disable"), Cast::Bool);
    casts.insert(service("oom_score_adj"), Cast::Int64);
    casts.insert(service("pids_limit"), Cast::Int64);
    casts.insert(service("ports.[].target"), Cast::Int);
    casts.insert(service("privileged"), Cast::Bool);
    casts.insert(service("read_only"), Cast::Bool);
    casts.insert(service("scale"), Cast::Int);
    casts.insert(service("secrets.[].mode"), Cast::Int);
    casts.insert(service("stdin_open"), Cast::Bool);
    casts.insert(service("tty"), Cast::Bool);
    // Covers the bare limit, `soft`, and `hard` spellings in one rule.
    casts.insert(service("ulimits.**"), Cast::Int);
    casts.insert(service("build.ulimits.**"), Cast::Int);
    casts.insert(service("volumes.[].read_only"), Cast::Bool);
    casts.insert(service("volumes.[].volume.nocopy"), Cast::Bool);
    casts.insert(p("networks.*.external"), Cast::Bool);
    casts.insert(p("networks.*.internal"), Cast::Bool);
    casts.insert(p("networks.*.attachable"), Cast::Bool);
    casts.insert(p("networks.*.enable_ipv6"), Cast::Bool);
    casts.insert(p("volumes.*.external"), Cast::Bool);
    casts.insert(p("secrets.*.external"), Cast::Bool);
    casts.insert(p("configs.*.external"), Cast::Bool);
    casts
}

/// The cast table for model paths, shared by every interpolation pass.
pub fn interpolate_cast_table() -> Rc<CastTable> {
    Rc::new(CAST_TABLE.clone())
}

/// Interpolate a single value as if it sat at `path` in a full model.
///
/// The value is wrapped into a nested mapping at `path` (so scoped mappings
/// and casts see the right address), interpolated, and unwrapped again.
/// Failures come back as mapping-level errors carrying the full nested
/// interpolation chain.
pub fn interpolate_with_path(
    path: &TreePath,
    value: &Value,
    opts: &InterpolateOptions,
) -> Result<Value, TemplateError> {
    let model = wrap_value_with_path(path, value.clone());
    let interpolated = interpolate(&model, opts).map_err(|e| e.into_resolve_error())?;
    Ok(unwrap_value_with_path(path, &interpolated).unwrap_or(Value::Null))
}
