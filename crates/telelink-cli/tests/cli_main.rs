//! Basic CLI tests for the telelink command-line interface.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn telelink() -> Command {
    Command::cargo_bin("telelink").unwrap()
}

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    telelink()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check-metadata"))
        .stdout(predicate::str::contains("device-types"));
}

#[test]
fn test_cli_version() {
    telelink()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("telelink"));
}

#[test]
fn test_no_subcommand_shows_error() {
    telelink().assert().failure();
}

#[test]
fn test_device_types() {
    telelink()
        .arg("device-types")
        .assert()
        .success()
        .stdout(predicate::str::contains("radio"));
}

#[test]
fn test_check_valid_metadata() {
    let file = write_temp(r#"{"frequency":435,"status":"OK","long_status":"nominal"}"#);

    telelink()
        .arg("--verbose")
        .arg("check-metadata")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::starts_with("valid"));
}

#[test]
fn test_check_invalid_metadata() {
    let file = write_temp(r#"{"frequency":435,"status":"OK"}"#);

    telelink()
        .arg("check-metadata")
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid:"))
        .stdout(predicate::str::contains("long_status"));
}

#[test]
fn test_check_metadata_from_stdin() {
    telelink()
        .args(["check-metadata", "-"])
        .write_stdin("[1, 2, 3]")
        .assert()
        .failure()
        .stdout(predicate::str::contains("not a JSON object"));
}

#[test]
fn test_check_missing_file() {
    telelink()
        .args(["check-metadata", "/nonexistent/metadata.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_run_missing_config() {
    telelink()
        .args(["run", "--config", "/nonexistent/telelink.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load"));
}

#[test]
fn test_run_fails_without_broker() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = write_temp(&format!(
        "[mqtt]\nbroker = \"127.0.0.1\"\nport = {}\nconnect_timeout_secs = 2\n",
        port
    ));

    telelink()
        .arg("run")
        .arg("--config")
        .arg(config.path())
        .env_remove("TELELINK_MQTT_BROKER")
        .env_remove("TELELINK_MQTT_PORT")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to start link"));
}
