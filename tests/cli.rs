use assert_cmd::Command;
use extension_registry_core::release::RELEASE_REF_FORMAT_ERROR;
use predicates::prelude::*;
use std::fs::write;
use tempfile::{NamedTempFile, TempDir};

/// Minimal config: process-local document store and a snapshot root inside `snapshots`.
fn create_minimal_config(snapshots: &TempDir) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        format!(
            "stage: test\nsnapshot_store:\n  root_dir: {:?}\n",
            snapshots.path().display().to_string()
        ),
    )
    .expect("Writing temp config failed");
    config
}

fn registry_cmd() -> Command {
    let mut cmd = Command::cargo_bin("extension-registry").expect("Binary exists");
    cmd.env("GITHUB_API_TOKEN", "ghp-cli-test")
        .env_remove("DOC_STORE_AUTH_KEY")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn help_lists_the_publish_and_serve_commands() {
    registry_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("publish").and(predicate::str::contains("serve")));
}

#[test]
fn publish_rejects_a_malformed_release_ref() {
    let snapshots = TempDir::new().unwrap();
    let config = create_minimal_config(&snapshots);

    registry_cmd()
        .arg("publish")
        .arg("--config")
        .arg(config.path())
        .arg("--release-ref")
        .arg("org/repo:refs/tags/")
        .assert()
        .failure()
        .stderr(predicate::str::contains(RELEASE_REF_FORMAT_ERROR));
}

#[test]
fn missing_config_file_fails() {
    registry_cmd()
        .arg("sync")
        .arg("--config")
        .arg("/definitely/not/here.yaml")
        .assert()
        .failure();
}

#[test]
fn sync_with_nothing_pending_succeeds() {
    let snapshots = TempDir::new().unwrap();
    let config = create_minimal_config(&snapshots);

    registry_cmd()
        .arg("sync")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Synchronise complete"));
}

#[test]
fn count_download_of_unknown_extension_reports_not_found() {
    let snapshots = TempDir::new().unwrap();
    let config = create_minimal_config(&snapshots);

    registry_cmd()
        .arg("count-download")
        .arg("--config")
        .arg(config.path())
        .arg("--name")
        .arg("acme.nothing")
        .arg("--version")
        .arg("1.0.0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("(404): No such extension: acme.nothing"));
}

#[test]
fn setup_stack_on_an_empty_stage_succeeds() {
    let snapshots = TempDir::new().unwrap();
    let config = create_minimal_config(&snapshots);

    registry_cmd()
        .arg("setup-stack")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("SetupReport"));
}
