//! Integration tests for the `teleboard` CLI binary.
//!
//! These cover argument parsing, config management and catalog listing,
//! all without a live broker.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

const CATALOG: &str = r#"
default_profile = "lab"

[profiles.lab]
broker = "mqtt://127.0.0.1:1"
namespace = "plant"
username = "viewer"
password = "hunter2"

[[profiles.lab.channels]]
device = "pump-1"
channel = "speed"
stale_after_ms = 2000
control = { min = 0.0, max = 100.0 }

[[profiles.lab.channels]]
device = "pump-1"
channel = "running"
kind = "bool"
"#;

/// Build a [`Command`] for the `teleboard` binary with env isolation.
///
/// Clears all `TELEBOARD_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn teleboard_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("teleboard");
    cmd.env("HOME", "/tmp/teleboard-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/teleboard-cli-test-nonexistent")
        .env_remove("RUST_LOG")
        .env_remove("TELEBOARD_CONFIG")
        .env_remove("TELEBOARD_PROFILE")
        .env_remove("TELEBOARD_OUTPUT")
        .env_remove("TELEBOARD_USERNAME")
        .env_remove("TELEBOARD_PASSWORD");
    cmd
}

/// A temp dir holding `config.toml` with the sample catalog.
fn catalog_config() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CATALOG).unwrap();
    (dir, path)
}

fn with_config(path: &Path) -> assert_cmd::Command {
    let mut cmd = teleboard_cmd();
    cmd.arg("--config").arg(path);
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = teleboard_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    teleboard_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("telemetry")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("set"))
            .and(predicate::str::contains("channels"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    teleboard_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("teleboard"));
}

#[test]
fn test_completions_zsh() {
    teleboard_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_invalid_subcommand() {
    let output = teleboard_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_invalid_watch_duration() {
    teleboard_cmd()
        .args(["watch", "--duration", "soon"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("soon"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag_and_env() {
    teleboard_cmd()
        .args(["--config", "/tmp/tb/custom.toml", "config", "path"])
        .assert()
        .success()
        .stdout("/tmp/tb/custom.toml\n");

    teleboard_cmd()
        .env("TELEBOARD_CONFIG", "/tmp/tb/from-env.toml")
        .args(["config", "path"])
        .assert()
        .success()
        .stdout("/tmp/tb/from-env.toml\n");
}

#[test]
fn test_watch_without_config_suggests_init() {
    let dir = tempfile::tempdir().unwrap();
    with_config(&dir.path().join("missing.toml"))
        .arg("watch")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("config init"));
}

#[test]
fn test_config_init_then_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    with_config(&path)
        .args(["--profile", "lab", "config", "init"])
        .args(["--broker", "mqtts://broker.example:8883", "--namespace", "plant"])
        .assert()
        .success();
    assert!(path.exists());

    with_config(&path)
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout("lab *\n");

    // A second init of the same profile needs --force.
    with_config(&path)
        .args(["--profile", "lab", "config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--force"));

    let output = with_config(&path)
        .args(["-o", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        shown["profiles"]["lab"]["broker"],
        "mqtts://broker.example:8883"
    );
    assert_eq!(shown["profiles"]["lab"]["namespace"], "plant");
}

#[test]
fn test_config_init_rejects_bad_url() {
    let dir = tempfile::tempdir().unwrap();
    with_config(&dir.path().join("config.toml"))
        .args(["config", "init", "--broker", "not a url"])
        .assert()
        .code(2);
}

#[test]
fn test_config_show_redacts_password() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("********").and(predicate::str::contains("hunter2").not()));
}

#[test]
fn test_config_use_unknown_profile() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .args(["config", "use", "prod"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("lab"));
}

#[test]
fn test_environment_overrides_profile_fields() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .env("TELEBOARD_PROFILES__LAB__NAMESPACE", "factory")
        .args(["-o", "plain", "config", "show"])
        .assert()
        .success()
        .stdout("lab\n");

    let output = with_config(&path)
        .env("TELEBOARD_PROFILES__LAB__NAMESPACE", "factory")
        .args(["-o", "json", "channels"])
        .output()
        .unwrap();
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listed[0]["topic"], "factory/pump-1/speed");
}

// ── Channels ────────────────────────────────────────────────────────

#[test]
fn test_channels_table() {
    let (_dir, path) = catalog_config();
    with_config(&path).arg("channels").assert().success().stdout(
        predicate::str::contains("pump-1/speed")
            .and(predicate::str::contains("plant/pump-1/running"))
            .and(predicate::str::contains("0..100"))
            .and(predicate::str::contains("2s")),
    );
}

#[test]
fn test_channels_plain_and_json() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .args(["-o", "plain", "channels"])
        .assert()
        .success()
        .stdout("pump-1/speed\npump-1/running\n");

    let output = with_config(&path)
        .args(["-o", "json", "channels"])
        .output()
        .unwrap();
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listed[0]["command_topic"], "plant/pump-1/cmd/speed");
    assert_eq!(listed[1]["kind"], "bool");
    assert!(listed[1]["command_topic"].is_null());
}

#[test]
fn test_channels_unknown_profile() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .args(["--profile", "prod", "channels"])
        .assert()
        .code(4);
}

// ── Set (fails before connecting) ───────────────────────────────────

#[test]
fn test_set_unknown_channel() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .args(["set", "pump-9/speed", "10"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("teleboard channels"));
}

#[test]
fn test_set_read_only_channel() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .args(["set", "pump-1/running", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not accept commands"));
}

#[test]
fn test_set_rejects_non_numeric_value() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .args(["set", "pump-1/speed", "fast"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not a number"));
}

#[test]
fn test_set_times_out_without_broker() {
    let (_dir, path) = catalog_config();
    with_config(&path)
        .args(["set", "pump-1/speed", "10", "--timeout", "300ms"])
        .assert()
        .code(8);
}
