use std::fs;

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use predicates::prelude::{PredicateBooleanExt, predicate};
use tempfile::TempDir;

/// A `zap` command whose config lives in `home`.
fn zap(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("zap");
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("HOME", home.path())
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    zap(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    zap(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Zap peer-to-peer file transfer tool"))
        .stdout(predicate::str::contains("demo"))
        .stdout(predicate::str::contains("id"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_demo_missing_file() {
    let home = TempDir::new().unwrap();
    zap(&home)
        .args(["demo", "nonexistent.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("File does not exist"));
}

#[test]
fn test_demo_missing_args() {
    let home = TempDir::new().unwrap();
    zap(&home)
        .arg("demo")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_demo_transfers_files() {
    let home = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let small = src.path().join("small.txt");
    let large = src.path().join("large.bin");
    let large_bytes: Vec<u8> =
        (0..300_000u32).map(|i| (i % 253) as u8).collect();
    fs::write(&small, b"zap!").unwrap();
    fs::write(&large, &large_bytes).unwrap();

    zap(&home)
        .arg("demo")
        .arg(&small)
        .arg(&large)
        .arg("--out")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Sender:"))
        .stdout(predicate::str::contains("All files transferred successfully"));

    let sessions: Vec<_> = fs::read_dir(out.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(sessions.len(), 1);
    assert_eq!(fs::read(sessions[0].join("small.txt")).unwrap(), b"zap!");
    assert_eq!(fs::read(sessions[0].join("large.bin")).unwrap(), large_bytes);
}

#[test]
fn test_id_command() {
    let home = TempDir::new().unwrap();
    zap(&home)
        .args(["id", " ab12 "])
        .assert()
        .success()
        .stdout(predicate::str::diff("AB12\n"));

    zap(&home)
        .args(["id", "TOOLONG"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid endpoint id"));

    zap(&home)
        .arg("id")
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[A-Z0-9]{4}\n$").unwrap());
}

#[test]
fn test_config_commands() {
    let home = TempDir::new().unwrap();
    zap(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No default"));

    let target = TempDir::new().unwrap();
    let target_path = target.path().to_str().unwrap();

    zap(&home)
        .args(["config", "set-output", target_path])
        .assert()
        .success();

    zap(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(target_path));

    zap(&home)
        .args(["config", "clear-output"])
        .assert()
        .success();

    zap(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("No default")
                .and(predicate::str::contains(target_path).not()),
        );
}
