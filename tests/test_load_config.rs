use extension_registry::load_config::{load_config, DocumentStoreConfig, DEFAULT_HOURLY_RATE_LIMIT};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

/// A static config plus the secrets from the environment produces the merged config.
#[tokio::test]
#[serial]
async fn test_load_config_success_merges_env_and_overrides() {
    let file = config_file(
        r#"
stage: staging
document_store:
  endpoint: "https://docs.example.test"
snapshot_store:
  root_dir: ./tmp/snapshots
github:
  hourly_rate_limit: 1200
  ops_repo: acme/registry-ops
registry:
  extension_size_limit_mb: 10
  processing_timeout_secs: 90
  trim:
    description: 128
schedule:
  sync_interval: 30
"#,
    );
    env::set_var("GITHUB_API_TOKEN", "ghp-test-token");
    env::set_var("DOC_STORE_AUTH_KEY", "doc-secret");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.registry.stage, "staging");
    assert_eq!(config.registry.bucket, "phcode-extensions-staging");
    assert_eq!(config.registry.extension_size_limit_bytes, 10 * 1024 * 1024);
    assert_eq!(config.registry.processing_timeout, Duration::from_secs(90));
    assert_eq!(config.registry.trim.description, 128);
    assert_eq!(config.registry.trim.title, 64);
    assert_eq!(config.snapshot_root, PathBuf::from("./tmp/snapshots"));
    assert_eq!(config.github.token, "ghp-test-token");
    assert_eq!(config.github.hourly_rate_limit, 1200);
    assert_eq!(config.github.ops_repo.as_deref(), Some("acme/registry-ops"));
    assert_eq!(config.schedule.sync_interval, Duration::from_secs(30));
    assert_eq!(config.schedule.stars_interval, Duration::from_secs(3600));
    assert_eq!(
        config.document_store,
        DocumentStoreConfig::Http {
            endpoint: "https://docs.example.test".to_string(),
            auth_key: "doc-secret".to_string(),
        }
    );
}

/// Without an endpoint the loader falls back to the process-local store and needs no store key.
#[tokio::test]
#[serial]
async fn test_load_config_without_endpoint_uses_in_memory_store() {
    let file = config_file("stage: dev\nsnapshot_store:\n  root_dir: ./tmp/snapshots\n");
    env::set_var("GITHUB_API_TOKEN", "ghp-test-token");
    env::remove_var("DOC_STORE_AUTH_KEY");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.document_store, DocumentStoreConfig::InMemory);
    assert_eq!(config.github.hourly_rate_limit, DEFAULT_HOURLY_RATE_LIMIT);
    assert_eq!(config.registry.processing_timeout, Duration::from_secs(60));
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_on_missing_github_token() {
    let file = config_file("stage: dev\nsnapshot_store:\n  root_dir: ./tmp/snapshots\n");
    env::remove_var("GITHUB_API_TOKEN");

    let msg = load_config(file.path()).unwrap_err().to_string();

    assert!(msg.contains("GITHUB_API_TOKEN"), "Must error for missing env var, got: {msg}");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_on_missing_store_key_when_endpoint_set() {
    let file = config_file(
        "stage: dev\ndocument_store:\n  endpoint: \"https://docs.example.test\"\nsnapshot_store:\n  root_dir: ./tmp\n",
    );
    env::set_var("GITHUB_API_TOKEN", "ghp-test-token");
    env::remove_var("DOC_STORE_AUTH_KEY");

    let msg = load_config(file.path()).unwrap_err().to_string();

    assert!(msg.contains("DOC_STORE_AUTH_KEY"), "got: {msg}");
}

/// If the config file is not valid YAML, load_config errors and reports as such.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    let file = config_file("stage: [unterminated\n  : :");
    env::set_var("GITHUB_API_TOKEN", "ghp-test-token");

    let msg = load_config(file.path()).unwrap_err().to_string();

    assert!(msg.contains("parse"), "Must report a parse failure, got: {msg}");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_empty_stage() {
    let file = config_file("stage: \"\"\nsnapshot_store:\n  root_dir: ./tmp\n");
    env::set_var("GITHUB_API_TOKEN", "ghp-test-token");

    let msg = load_config(file.path()).unwrap_err().to_string();

    assert!(msg.contains("stage"), "got: {msg}");
}
