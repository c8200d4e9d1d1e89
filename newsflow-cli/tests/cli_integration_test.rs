//! ABOUTME: Integration tests for the newsflow operator CLI
//! ABOUTME: Exercises config and workflow inspection subcommands end-to-end against a real binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("newsflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Operator CLI for the newsflow workflow-orchestration services"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("newsflow").unwrap();
    cmd.arg("--version").assert().success();
}

#[test]
fn test_config_show_prints_defaults() {
    let mut cmd = Command::cargo_bin("newsflow").unwrap();
    cmd.arg("config")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("orchestration.exchange"));
}

#[test]
fn test_config_validate_rejects_zero_max_attempts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("newsflow.toml");
    std::fs::write(&path, "max_attempts = 0\n").unwrap();

    let mut cmd = Command::cargo_bin("newsflow").unwrap();
    cmd.arg("--config")
        .arg(&path)
        .arg("config")
        .arg("validate")
        .assert()
        .failure();
}

#[test]
fn test_workflow_show_reports_unknown_id() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("store");
    let config_path = dir.path().join("newsflow.toml");
    std::fs::write(
        &config_path,
        format!("workflow_store_url = \"{}\"\n", store_path.display()),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("newsflow").unwrap();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("workflow")
        .arg("show")
        .arg("00000000-0000-0000-0000-000000000000")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_workflow_stuck_reports_none_for_empty_store() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("store");
    let config_path = dir.path().join("newsflow.toml");
    std::fs::write(
        &config_path,
        format!("workflow_store_url = \"{}\"\n", store_path.display()),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("newsflow").unwrap();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("workflow")
        .arg("stuck")
        .assert()
        .success()
        .stdout(predicate::str::contains("no stuck workflows"));
}
