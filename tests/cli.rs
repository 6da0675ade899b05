// ABOUTME: Integration tests for the mikrocloud CLI commands.
// ABOUTME: Covers help, init, defaults, and failures that need no container engine.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn mikrocloud_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("mikrocloud"))
}

#[test]
fn help_shows_commands() {
    mikrocloud_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("defaults"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("mikrocloud.yml");

    mikrocloud_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    assert!(config_path.exists(), "mikrocloud.yml should be created");
    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("name_prefix:"), "template should set the name prefix");
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("mikrocloud.yml");

    fs::write(&config_path, "existing: config").unwrap();

    mikrocloud_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    mikrocloud_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
    assert!(fs::read_to_string(&config_path).unwrap().contains("reconcile:"));
}

#[test]
fn defaults_prints_json() {
    mikrocloud_cmd()
        .args(["--json", "defaults", "postgres"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"port\":5432"))
        .stdout(predicate::str::contains("\"type\":\"postgresql\""))
        .stdout(predicate::str::contains("postgresql://postgres:"));
}

#[test]
fn defaults_rejects_unknown_kind() {
    mikrocloud_cmd()
        .args(["defaults", "oracle"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported database type"));
}

#[test]
fn check_rejects_invalid_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(
        temp_dir.path().join("mikrocloud.yml"),
        "containers:\n  name_prefix: Not Valid\n",
    )
    .unwrap();

    mikrocloud_cmd()
        .current_dir(temp_dir.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn build_rejects_malformed_request() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(
        temp_dir.path().join("request.yml"),
        "id: x\nsource:\n  url: https://git.example.com/a.git\nimage: acme/a:1\nstrategy: static\n",
    )
    .unwrap();

    mikrocloud_cmd()
        .current_dir(temp_dir.path())
        .args(["build", "request.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("static-site strategy requires its configuration block"));
}
