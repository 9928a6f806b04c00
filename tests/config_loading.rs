use std::io::Write;
use std::path::PathBuf;

use stepgraph_core::config::AppConfig;
use stepgraph_core::error::StepGraphError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_depth = 8
max_steps = 500

[store]
path = "/var/lib/stepgraph/flows.db"

[log]
filter = "stepgraph=debug"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_depth, 8);
    assert_eq!(config.engine.max_steps, 500);
    assert_eq!(config.engine.step_limit(), Some(500));
    assert_eq!(config.store_path(), PathBuf::from("/var/lib/stepgraph/flows.db"));
    assert_eq!(config.log.filter, "stepgraph=debug");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("STEPGRAPH_TEST_DB_DIR", "/tmp/stepgraph-env");

    let toml_content = r#"
[store]
path = "${STEPGRAPH_TEST_DB_DIR}/runs.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.store.path, "/tmp/stepgraph-env/runs.db");

    std::env::remove_var("STEPGRAPH_TEST_DB_DIR");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let (_dir, path) = stepgraph_test_utils::temp_config("[engine]\nmax_depth = 3\n");

    let config = AppConfig::load(&path).expect("load config");

    assert_eq!(config.engine.max_depth, 3);
    assert_eq!(config.engine.max_steps, 10_000);
    assert_eq!(config.log.filter, "stepgraph=info,warn");
    assert!(config.store.path.ends_with("stepgraph.db"));
}

#[test]
fn test_home_relative_store_path_is_expanded() {
    let (_dir, path) = stepgraph_test_utils::temp_config("[store]\npath = \"~/flows/x.db\"\n");
    let config = AppConfig::load(&path).expect("load config");

    if let Ok(home) = std::env::var("HOME") {
        assert_eq!(config.store_path(), PathBuf::from(home).join("flows/x.db"));
    }
}

#[test]
fn test_missing_file() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/stepgraph.toml")).unwrap_err();
    assert!(matches!(err, StepGraphError::ConfigNotFound(_)));

    let config =
        AppConfig::load_or_default(std::path::Path::new("/nonexistent/stepgraph.toml")).unwrap();
    assert_eq!(config.engine.max_depth, 64);
}

#[test]
fn test_invalid_config_is_reported() {
    let (_dir, path) = stepgraph_test_utils::temp_config("[engine]\nmax_depth = \"deep\"\n");
    let err = AppConfig::load(&path).unwrap_err();
    assert!(matches!(err, StepGraphError::Config(_)));
}
