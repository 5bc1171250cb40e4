//! Integration tests for the `arlo` CLI binary.
//!
//! These cover argument parsing, help output, shell completions and
//! config handling without an Arlo account.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `arlo` binary with env isolation.
///
/// Clears the `ARLO_*` variables and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn arlo_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("arlo");
    cmd.env("HOME", "/tmp/arlo-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/arlo-cli-test-nonexistent")
        .env("XDG_DATA_HOME", "/tmp/arlo-cli-test-nonexistent")
        .env_remove("ARLO_PROFILE")
        .env_remove("ARLO_OUTPUT")
        .env_remove("ARLO_TIMEOUT")
        .env_remove("ARLO_PASSWORD")
        .env_remove("ARLO_MAILBOX_PASSWORD");
    cmd
}

/// Same isolation, but rooted in a writable temp directory.
fn arlo_cmd_in(dir: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = arlo_cmd();
    cmd.env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("config"))
        .env("XDG_DATA_HOME", dir.path().join("data"));
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = arlo_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    arlo_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("Arlo")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("snapshot")),
    );
}

#[test]
fn test_version_flag() {
    arlo_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("arlo"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    arlo_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("arlo"));
}

#[test]
fn test_completions_zsh() {
    arlo_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_fish() {
    arlo_cmd()
        .args(["completions", "fish"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Argument errors ─────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    arlo_cmd()
        .arg("teleport")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_invalid_output_format() {
    arlo_cmd()
        .args(["--output", "xml", "devices", "list"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_privacy_requires_state() {
    arlo_cmd().args(["privacy", "CAM1"]).assert().failure().code(2);
}

#[test]
fn test_privacy_rejects_unknown_state() {
    arlo_cmd()
        .args(["privacy", "CAM1", "maybe"])
        .assert()
        .failure()
        .code(2);
}

// ── Config handling ─────────────────────────────────────────────────

#[test]
fn test_devices_without_config_points_at_init() {
    let output = arlo_cmd().args(["devices", "list"]).output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("config init"), "Expected init hint in output:\n{text}");
}

#[test]
fn test_config_show_without_file() {
    arlo_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[defaults]"));
}

#[test]
fn test_config_set_then_show() {
    let dir = tempfile::tempdir().unwrap();

    arlo_cmd_in(&dir)
        .args(["config", "set", "email", "me@example.com"])
        .assert()
        .success();
    arlo_cmd_in(&dir)
        .args(["config", "set", "keepalive", "45"])
        .assert()
        .success();

    arlo_cmd_in(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.default]")
                .and(predicate::str::contains("me@example.com"))
                .and(predicate::str::contains("keepalive = 45")),
        );
}

#[test]
fn test_config_set_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    arlo_cmd_in(&dir)
        .args(["config", "set", "colour", "red"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_config_use_missing_profile() {
    let dir = tempfile::tempdir().unwrap();
    let output = arlo_cmd_in(&dir)
        .args(["config", "use", "garage"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("garage"));
}

// ── Subcommand help ─────────────────────────────────────────────────

#[test]
fn test_subcommand_help() {
    for sub in ["devices", "stream", "local", "config", "watch"] {
        arlo_cmd()
            .args([sub, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Usage"));
    }
}
