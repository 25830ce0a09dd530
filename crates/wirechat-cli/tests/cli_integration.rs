//! CLI Integration Tests
//!
//! These tests verify the CLI argument surface without needing a chat
//! server; connected behavior is covered by the core engine tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn cli_cmd() -> Command {
    Command::cargo_bin("wirechat").expect("Failed to find wirechat binary")
}

#[test]
fn test_help_lists_commands() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn test_chat_requires_user() {
    cli_cmd()
        .arg("chat")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--user"));
}

#[test]
fn test_version_flag() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_unknown_command_fails() {
    cli_cmd().arg("teleport").assert().failure();
}
