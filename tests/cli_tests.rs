//! CLI integration tests

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn bin() -> Command {
    Command::cargo_bin("neurobridge").unwrap()
}

#[test]
fn test_help() {
    bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bidirectional RPC bridge"));
}

#[test]
fn test_version() {
    bin()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("neurobridge"));
}

#[test]
fn test_missing_subcommand_fails() {
    bin().assert().failure();
}

#[test]
fn test_unknown_role_rejected() {
    bin()
        .args(["run", "--role", "FOO"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("FOO"));
}

#[test]
fn test_config_show_prints_defaults() {
    bin()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[neuron]"))
        .stdout(predicate::str::contains("[blender]"))
        .stdout(predicate::str::contains("poll_interval_ms"));
}

#[test]
fn test_config_init_writes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("neurobridge.toml");

    bin()
        .args(["config", "init", path.to_str().unwrap()])
        .assert()
        .success();
    assert!(path.exists());

    // Refuses to overwrite
    bin()
        .args(["config", "init", path.to_str().unwrap()])
        .assert()
        .failure()
        .code(10);
}

#[test]
fn test_config_show_honors_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[neuron]\nport = 7123\n").unwrap();

    bin()
        .args(["--config", path.to_str().unwrap(), "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("7123"));
}

#[test]
fn test_malformed_config_fails_with_parse_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "this is not toml [[[").unwrap();

    bin()
        .args(["--config", path.to_str().unwrap(), "config", "show"])
        .assert()
        .failure()
        .code(10);
}

#[test]
fn test_exec_against_unreachable_end() {
    // A registry dir with no address files means no end is discoverable
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!("[registry]\ndir = \"{}\"\n", dir.path().display()),
    )
    .unwrap();

    bin()
        .args([
            "--config",
            config.to_str().unwrap(),
            "exec",
            "--end",
            "NEURON",
            "return_value = 1",
        ])
        .assert()
        .failure()
        .code(30)
        .stderr(predicate::str::contains("not reachable"));
}
