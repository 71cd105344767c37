//! Basic tests for the sami command-line interface.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("sami").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("sample-config"))
        .stdout(predicate::str::contains("events"));
}

#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("sami").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_sample_config_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sami.toml");

    let output = Command::cargo_bin("sami")
        .unwrap()
        .arg("sample-config")
        .output()
        .unwrap();
    assert!(output.status.success());
    std::fs::write(&path, &output.stdout).unwrap();

    Command::cargo_bin("sami")
        .unwrap()
        .env_remove("SAMI_GPS_UPDATE_INTERVAL")
        .args(["validate", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 devices"))
        .stdout(predicate::str::contains("reader_1"));
}

#[test]
fn test_validate_rejects_unknown_vehicle_device() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        r#"
[[vehicles]]
vehicle_id = "truck_1"
name = "Truck 1"
gps_device_id = "gps_404"
"#,
    )
    .unwrap();

    Command::cargo_bin("sami")
        .unwrap()
        .args(["validate", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("gps_404"));
}

#[test]
fn test_events_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("sami")
        .unwrap()
        .args(["events", "--data-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
