//! Integration tests for the `retrace` binary's offline commands

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn retrace(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("retrace").expect("binary built");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

/// Inspect reconstructs the scope at the payload's selected step
#[test]
fn test_inspect_uses_selected_step() {
    let dir = TempDir::new().unwrap();
    retrace(&dir)
        .arg("inspect")
        .arg(fixture("sync.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"y\": 4"))
        .stdout(predicate::str::contains("\"x\"").not())
        .stdout(predicate::str::contains("\"return_value\": 4"))
        .stdout(predicate::str::contains("\"line_number\": 5"));
}

/// Inspect can reconstruct any earlier step
#[test]
fn test_inspect_at_earlier_step() {
    let dir = TempDir::new().unwrap();
    retrace(&dir)
        .args(["inspect", "--at", "2"])
        .arg(fixture("sync.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"x\": 1"))
        .stdout(predicate::str::contains("\"a\": 2"))
        .stdout(predicate::str::contains("\"function\": \"f\""));
}

/// The return policy flag changes how return values carry over
#[test]
fn test_inspect_with_clearing_policy() {
    let dir = TempDir::new().unwrap();
    retrace(&dir)
        .args(["inspect", "--policy", "explicit-null-clears"])
        .arg(fixture("sync.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"return_value\": null"));
}

/// Steps folded away by a small capacity cannot be inspected
#[test]
fn test_inspect_before_eviction_horizon_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "[timeline]\ncapacity = 2\n").unwrap();
    retrace(&dir)
        .args(["inspect", "--at", "1"])
        .arg(fixture("sync.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("step 1 was evicted"));

    retrace(&dir)
        .args(["inspect", "--at", "2"])
        .arg(fixture("sync.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"a\": 2"));
}

/// Missing input fails with a readable error
#[test]
fn test_inspect_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    retrace(&dir)
        .arg("inspect")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

/// First run writes the bundled config into the data directory
#[test]
fn test_first_run_writes_default_config() {
    let dir = TempDir::new().unwrap();
    retrace(&dir)
        .arg("inspect")
        .arg(fixture("sync.json"))
        .assert()
        .success();
    let config = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(config.contains("[timeline]"));
    assert!(dir.path().join("logs").join("retrace.log").exists());
}
