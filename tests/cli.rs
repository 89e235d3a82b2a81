//! Drives the compiled binary's `--test`/`--retest` entry points (§4.11, §6).

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

#[test]
fn test_mode_accepts_a_valid_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("a.log");
    std::fs::write(&log_path, b"").unwrap();
    let conf_path = dir.path().join("logwarden.conf");
    std::fs::write(
        &conf_path,
        format!(
            "[x]\npath={}\nregex=^ERR\nupbound_freq=2/60\nupbound_action=echo hit\n",
            log_path.display()
        ),
    )
    .unwrap();

    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("--test")
        .arg(&conf_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration OK"));
}

#[test]
fn test_mode_rejects_an_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let conf_path = dir.path().join("logwarden.conf");
    std::fs::write(&conf_path, "[x]\npath=/tmp/a\nbogus=1\n").unwrap();

    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("--test")
        .arg(&conf_path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("configuration invalid"));
}

/// E6-adjacent: `--retest` prints capture groups for each stdin line, joined by " | ".
#[test]
fn retest_mode_prints_captures_per_line() {
    let mut cmd = Command::cargo_bin("logwarden").unwrap();
    cmd.arg("--retest").arg("^ERR (.*)");
    let mut child = cmd
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"ERR boom\nall good\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut lines = stdout.lines();
    assert_eq!(lines.next().unwrap(), "ERR boom | boom");
    assert_eq!(lines.next().unwrap(), "(no match)");
}
