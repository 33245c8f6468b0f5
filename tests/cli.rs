//! CLI integration tests for the pre-spawn error surface.
//!
//! Everything here runs in an empty temp directory and must fail (or
//! answer) before any test runner would be spawned, so no runner
//! toolchains are required.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn threepio(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("3pio").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn no_command_is_a_usage_error() {
    let temp = TempDir::new().unwrap();
    threepio(&temp)
        .assert()
        .failure()
        .stderr(predicate::str::contains("TEST_COMMAND"));
}

#[test]
fn unknown_runner_exits_2() {
    let temp = TempDir::new().unwrap();
    threepio(&temp)
        .args(["make", "lint"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("could not detect a supported test runner"));
}

#[test]
fn watch_mode_is_refused_before_spawn() {
    let temp = TempDir::new().unwrap();
    threepio(&temp)
        .args(["jest", "--watchAll"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("watch mode is not supported"));

    // Refusal happens before the run directory is allocated.
    assert!(!temp.path().join(".3pio/runs").exists());
}

#[test]
fn coverage_mode_is_refused_before_spawn() {
    let temp = TempDir::new().unwrap();
    threepio(&temp)
        .args(["pytest", "--cov=src"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("coverage mode is not supported"));
}

#[test]
fn version_flag_works() {
    let temp = TempDir::new().unwrap();
    threepio(&temp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("3pio"));
}

#[test]
fn help_describes_the_wrapper() {
    let temp = TempDir::new().unwrap();
    threepio(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("test command"));
}
