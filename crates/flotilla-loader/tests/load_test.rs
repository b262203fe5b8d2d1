//! End-to-end scenarios through the full `load` pipeline.

use flotilla_loader::{
    load, CancelToken, ConfigDetails, ConfigFile, Environment, LoadError, LoadOptions,
};
use flotilla_tree::{TreePath, Value};
use std::fs;
use std::path::Path;

fn details_for(content: &str, env: &[(&str, &str)]) -> ConfigDetails {
    ConfigDetails {
        working_dir: std::env::temp_dir(),
        config_files: vec![ConfigFile::with_content("compose.yaml", content)],
        environment: env
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<Environment>(),
    }
}

fn load_str(content: &str, env: &[(&str, &str)]) -> Result<Value, LoadError> {
    let options = LoadOptions {
        project_name: Some("test-project".into()),
        ..Default::default()
    };
    load(&details_for(content, env), &options)
}

fn at<'m>(model: &'m Value, path: &str) -> &'m Value {
    model
        .value_at(&TreePath::from(path))
        .unwrap_or_else(|| panic!("missing {path}"))
}

#[test]
fn test_env_file_canonicalization() {
    let model = load_str("services:\n  web:\n    image: img\n    env_file: foo.env\n", &[]).unwrap();
    assert_eq!(
        at(&model, "services.web.env_file"),
        &Value::Sequence(vec![Value::mapping_from([
            ("path", Value::from("foo.env")),
            ("required", Value::Bool(true)),
        ])])
    );
}

#[test]
fn test_named_mapping_scale_from_replicas() {
    let model = load_str(
        "services:\n  web:\n    image: img\n    deploy:\n      replicas: 3\n    x-scale: \"${service[scale]}\"\n",
        &[],
    )
    .unwrap();
    assert_eq!(at(&model, "services.web.x-scale"), &Value::from("3"));
}

#[test]
fn test_named_mapping_scale_default() {
    let model = load_str(
        "services:\n  web:\n    image: img\n    x-scale: \"${service[scale]}\"\n",
        &[],
    )
    .unwrap();
    assert_eq!(at(&model, "services.web.x-scale"), &Value::from("1"));
}

#[test]
fn test_named_mapping_scale_explicit_field() {
    let model = load_str(
        "services:\n  web:\n    image: img\n    scale: 2\n    x-scale: \"${service[scale]}\"\n",
        &[],
    )
    .unwrap();
    assert_eq!(at(&model, "services.web.x-scale"), &Value::from("2"));
}

#[test]
fn test_container_env_via_label_indirection() {
    let model = load_str(
        r#"
services:
  svc:
    image: img
    container_name: "svc-${containerEnv[NUMBER]}"
    environment:
      NUMBER: "${labels[com.docker.compose.container-number]}"
      WHO: "${env[${labels[user]}]}"
    labels:
      com.docker.compose.container-number: "2"
      user: USER
"#,
        &[("USER", "jenny")],
    )
    .unwrap();
    assert_eq!(at(&model, "services.svc.container_name"), &Value::from("svc-2"));
    assert_eq!(at(&model, "services.svc.environment.NUMBER"), &Value::from("2"));
    assert_eq!(at(&model, "services.svc.environment.WHO"), &Value::from("jenny"));
}

#[test]
fn test_missing_environment_sections_resolve_to_defaults() {
    let model = load_str(
        "services:\n  svc:\n    image: img\n    container_name: \"svc-${containerEnv[NUMBER]:-0}${labels[com.docker.compose.container-number]}\"\n",
        &[],
    )
    .unwrap();
    assert_eq!(at(&model, "services.svc.container_name"), &Value::from("svc-0"));
}

#[test]
fn test_lookup_cycle_detected() {
    let err = load_str(
        "services:\n  svc:\n    image: img\n    environment:\n      TESTVAR: \"${containerEnv[TESTVAR]}\"\n",
        &[],
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "error while interpolating services.svc.environment.TESTVAR: \
         failed to interpolate model: \
         error while interpolating services.svc.environment.TESTVAR: \
         lookup cycle detected: containerEnv[TESTVAR]"
    );
}

#[test]
fn test_same_key_under_different_mappings_is_not_a_cycle() {
    let model = load_str(
        r#"
services:
  svc:
    image: img
    environment:
      TESTVAR: "${labels[TESTVAR]}"
    labels:
      TESTVAR: from-label
"#,
        &[],
    )
    .unwrap();
    assert_eq!(
        at(&model, "services.svc.environment.TESTVAR"),
        &Value::from("from-label")
    );
}

#[test]
fn test_image_and_service_mappings() {
    let model = load_str(
        r#"
services:
  service_1:
    image: "image:${service[name]}"
    container_name: "container.${service[name]}"
    x-test-field: "${image[name]} ${container[name]} ${service[scale]}"
"#,
        &[],
    )
    .unwrap();
    assert_eq!(
        at(&model, "services.service_1.x-test-field"),
        &Value::from("image:service_1 container.service_1 1")
    );
}

#[test]
fn test_resource_name_and_external_mappings() {
    let model = load_str(
        r#"
name: test-project
networks:
  network_1:
    name: "${network[driver]}-network"
    external: "${TRUE}"
    driver: bridge
    x-test-field: "${network[name]} ${network[external]}"
  network_2:
    external: "${TRUE}"
    x-test-field: "${network[name]} ${network[external]}"
  network_3:
    x-test-field: "${network[name]} ${network[external]}"
"#,
        &[("TRUE", "true")],
    )
    .unwrap();
    assert_eq!(
        at(&model, "networks.network_1.x-test-field"),
        &Value::from("bridge-network true")
    );
    assert_eq!(at(&model, "networks.network_1.external"), &Value::Bool(true));
    assert_eq!(
        at(&model, "networks.network_2.x-test-field"),
        &Value::from("network_2 true")
    );
    assert_eq!(
        at(&model, "networks.network_3.x-test-field"),
        &Value::from("test-project_network_3 false")
    );
}

#[test]
fn test_config_data_mappings() {
    let model = load_str(
        r#"
name: test-project
configs:
  config_1:
    name: "${config[content]}-config"
    content: test
    x-test-field: "${config[name]} ${config[content]} ${config[data]}"
  config_2:
    environment: USER
    x-test-field: "${config[name]} ${config[environment]} ${config[data]}"
"#,
        &[("USER", "test-user")],
    )
    .unwrap();
    assert_eq!(
        at(&model, "configs.config_1.x-test-field"),
        &Value::from("test-config test test")
    );
    assert_eq!(
        at(&model, "configs.config_2.x-test-field"),
        &Value::from("test-project_config_2 USER test-user")
    );
}

#[test]
fn test_cross_reference_mappings() {
    let model = load_str(
        r#"
services:
  db:
    image: postgres
    user: postgres
  web:
    image: app
    x-db-user: "${services[db].user}"
"#,
        &[],
    )
    .unwrap();
    assert_eq!(at(&model, "services.web.x-db-user"), &Value::from("postgres"));
}

#[test]
fn test_project_mapping() {
    let model = load_str(
        "services:\n  web:\n    image: img\n    x-project: \"${project[name]}\"\n",
        &[],
    )
    .unwrap();
    assert_eq!(at(&model, "services.web.x-project"), &Value::from("test-project"));
}

#[test]
fn test_type_casts_on_substituted_fields() {
    let model = load_str(
        r#"
services:
  web:
    image: img
    scale: "${REPLICAS}"
    privileged: "${PRIV}"
networks:
  front:
    external: "${EXT}"
"#,
        &[("REPLICAS", "4"), ("PRIV", "true"), ("EXT", "true")],
    )
    .unwrap();
    assert_eq!(at(&model, "services.web.scale"), &Value::Integer(4));
    assert_eq!(at(&model, "services.web.privileged"), &Value::Bool(true));
    assert_eq!(at(&model, "networks.front.external"), &Value::Bool(true));
}

#[test]
fn test_interpolation_idempotence() {
    let content = "services:\n  web:\n    image: \"app:${TAG}\"\n    command: echo done\n";
    let env = [("TAG", "v1")];
    let once = load_str(content, &env).unwrap();
    // Re-loading the already-interpolated tree must be a no-op.
    let details = ConfigDetails {
        working_dir: std::env::temp_dir(),
        config_files: vec![ConfigFile::with_content("compose.yaml", content)],
        environment: env
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
    };
    let twice = load(
        &details,
        &LoadOptions {
            project_name: Some("test-project".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(once, twice);
    assert_eq!(at(&once, "services.web.image"), &Value::from("app:v1"));
}

#[test]
fn test_multi_file_override_merge() {
    let details = ConfigDetails {
        working_dir: std::env::temp_dir(),
        config_files: vec![
            ConfigFile::with_content(
                "compose.yaml",
                "services:\n  web:\n    image: base\n    environment:\n      FOO: base\n",
            ),
            ConfigFile::with_content(
                "compose.override.yaml",
                "services:\n  web:\n    image: override\n    environment:\n      FOO: override\n      BAR: added\n",
            ),
        ],
        environment: Environment::new(),
    };
    let options = LoadOptions {
        project_name: Some("test-project".into()),
        ..Default::default()
    };
    let model = load(&details, &options).unwrap();
    assert_eq!(at(&model, "services.web.image"), &Value::from("override"));
    assert_eq!(
        at(&model, "services.web.environment"),
        &Value::Sequence(vec![Value::from("FOO=override"), Value::from("BAR=added")])
    );
}

#[test]
fn test_provenance_retention() {
    let details = ConfigDetails {
        working_dir: std::env::temp_dir(),
        config_files: vec![
            ConfigFile::with_content("base.yaml", "services:\n  web:\n    image: base\n"),
            ConfigFile::with_content("override.yaml", "services:\n  web:\n    image: override\n"),
        ],
        environment: Environment::new(),
    };
    let options = LoadOptions {
        project_name: Some("test-project".into()),
        retain_provenance: true,
        ..Default::default()
    };
    let model = load(&details, &options).unwrap();
    let (_, tags) = flotilla_tree::strip_sources_with(model);
    assert_eq!(
        tags.get(&TreePath::from("services.web.image"))
            .map(|t| t.as_str()),
        Some("override.yaml")
    );
}

#[test]
fn test_cancellation_surfaces() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let options = LoadOptions {
        project_name: Some("p".into()),
        cancel,
        ..Default::default()
    };
    let err = load(&details_for("services: {}\n", &[]), &options).unwrap_err();
    assert_eq!(err, LoadError::Cancelled);
}

// ---- fixture-based scenarios: include and extends across files ----

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn load_dir(dir: &Path, main: &str, env: &[(&str, &str)]) -> Result<Value, LoadError> {
    let details = ConfigDetails {
        working_dir: dir.to_path_buf(),
        config_files: vec![ConfigFile::new(dir.join(main).display().to_string())],
        environment: env
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<Environment>(),
    };
    let options = LoadOptions {
        project_name: Some("test-project".into()),
        ..Default::default()
    };
    load(&details, &options)
}

#[test]
fn test_include_merges_fragment() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("compose.yaml"),
        "include:\n  - other/compose.yaml\nservices:\n  web:\n    image: app\n",
    );
    write(
        &dir.path().join("other/compose.yaml"),
        "services:\n  db:\n    image: postgres\nvolumes:\n  data: {}\n",
    );
    let model = load_dir(dir.path(), "compose.yaml", &[]).unwrap();
    assert_eq!(at(&model, "services.web.image"), &Value::from("app"));
    assert_eq!(at(&model, "services.db.image"), &Value::from("postgres"));
    assert!(model.value_at(&TreePath::from("volumes.data")).is_some());
    assert!(model.get("include").is_none());
}

#[test]
fn test_include_conflict() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("compose.yaml"),
        "include:\n  - other/compose.yaml\nservices:\n  api:\n    image: a\n",
    );
    write(
        &dir.path().join("other/compose.yaml"),
        "services:\n  api:\n    image: b\n",
    );
    let err = load_dir(dir.path(), "compose.yaml", &[]).unwrap_err();
    assert_eq!(err.to_string(), "services.api conflicts with imported resource");
}

#[test]
fn test_include_picks_up_dotenv() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("compose.yaml"),
        "include:\n  - other/compose.yaml\n",
    );
    write(&dir.path().join("other/.env"), "TAG=v9\n");
    write(
        &dir.path().join("other/compose.yaml"),
        "services:\n  db:\n    image: \"postgres:${TAG}\"\n",
    );
    let model = load_dir(dir.path(), "compose.yaml", &[]).unwrap();
    assert_eq!(at(&model, "services.db.image"), &Value::from("postgres:v9"));
}

#[test]
fn test_include_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("a/compose.yaml"),
        "include:\n  - ../b/compose.yaml\nservices:\n  a:\n    image: a\n",
    );
    write(
        &dir.path().join("b/compose.yaml"),
        "include:\n  - ../a/compose.yaml\nservices:\n  b:\n    image: b\n",
    );
    let err = load_dir(&dir.path().join("a"), "compose.yaml", &[]).unwrap_err();
    assert!(matches!(err, LoadError::IncludeCycle { .. }));
    assert!(err.to_string().starts_with("include cycle detected:"));
}

#[test]
fn test_extends_across_files_applies_exclusion_set() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("compose.yaml"),
        "services:\n  web:\n    extends:\n      service: base\n      file: shared/base.yaml\n",
    );
    write(
        &dir.path().join("shared/base.yaml"),
        "services:\n  base:\n    image: foo\n    depends_on:\n      - db\n  db:\n    image: postgres\n",
    );
    let model = load_dir(dir.path(), "compose.yaml", &[]).unwrap();
    let web = at(&model, "services.web");
    assert_eq!(web.get("image"), Some(&Value::from("foo")));
    assert!(web.get("depends_on").is_none());
    assert!(web.get("extends").is_none());
}

#[test]
fn test_extends_reference_is_interpolable() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("compose.yaml"),
        "services:\n  base:\n    image: foo\n  web:\n    extends: \"${BASE}\"\n",
    );
    let model = load_dir(dir.path(), "compose.yaml", &[("BASE", "base")]).unwrap();
    assert_eq!(at(&model, "services.web.image"), &Value::from("foo"));
}
