//! End-to-end checks of the `sigmahub` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

use sigmahub::TestDir;

const SIGMAHUB_ENV: [&str; 12] = [
    "SIGMAHUB_CONFIG",
    "SIGMAHUB_BASE_URL",
    "SIGMAHUB_CLIENT_ID",
    "SIGMAHUB_CLIENT_SECRET",
    "SIGMAHUB_ACCOUNT_ID",
    "SIGMAHUB_PAGE_SIZE",
    "SIGMAHUB_CACHE_PATH",
    "SIGMAHUB_BIND",
    "SIGMAHUB_ADMIN_KEY",
    "SIGMAHUB_LOG",
    "SIGMAHUB_LOG_FORMAT",
    "SIGMAHUB_LOG_FILE",
];

/// A command isolated from the caller's environment, pointed at an empty
/// config file and a cache inside `dir`.
fn sigmahub(dir: &TestDir) -> Command {
    let config = dir.create_file("config.toml", "");
    let mut cmd = Command::cargo_bin("sigmahub").unwrap();
    for key in SIGMAHUB_ENV {
        cmd.env_remove(key);
    }
    cmd.env("SIGMAHUB_CONFIG", config)
        .env("SIGMAHUB_CACHE_PATH", dir.join("cache.sqlite"))
        .env("RUST_LOG", "off");
    cmd
}

fn with_credentials(mut cmd: Command) -> Command {
    cmd.env("SIGMAHUB_CLIENT_ID", "cid")
        .env("SIGMAHUB_CLIENT_SECRET", "secret")
        .env("SIGMAHUB_BASE_URL", "http://127.0.0.1:9");
    cmd
}

fn last_json_line(stderr: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stderr);
    let line = text
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON on stderr: {text}"));
    serde_json::from_str(line).unwrap()
}

#[test]
fn help_lists_commands() {
    let dir = TestDir::new();
    sigmahub(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("doctor"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn version_flag() {
    let dir = TestDir::new();
    sigmahub(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_command_is_a_usage_error() {
    let dir = TestDir::new();
    sigmahub(&dir)
        .arg("frobnicate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn missing_credentials_exit_with_auth_code() {
    let dir = TestDir::new();
    sigmahub(&dir)
        .args(["sync", "--start", "2024-01-01", "--end", "2024-02-01"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("SHUB-A001"));
}

#[test]
fn unparsable_start_date_is_an_input_error() {
    let dir = TestDir::new();
    with_credentials(sigmahub(&dir))
        .args(["sync", "--start", "yesterday-ish"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("yesterday-ish"));
}

#[test]
fn fetch_sale_requires_an_id() {
    let dir = TestDir::new();
    with_credentials(sigmahub(&dir))
        .args(["fetch", "sale"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("requires an id"));
}

#[test]
fn json_errors_are_machine_readable() {
    let dir = TestDir::new();
    let output = with_credentials(sigmahub(&dir))
        .args(["--json", "doctor", "--start", "2024-03-01", "--end", "2024-01-01"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
    let body = last_json_line(&output.stderr);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "SHUB-C001");
    assert_eq!(body["error"]["exitCode"], 3);
    assert_eq!(body["error"]["retryable"], false);
}

#[test]
fn invalid_page_size_in_config_is_rejected() {
    let dir = TestDir::new();
    let mut cmd = with_credentials(sigmahub(&dir));
    cmd.env("SIGMAHUB_PAGE_SIZE", "ten")
        .args(["auth", "status"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("SIGMAHUB_PAGE_SIZE"));
}

#[test]
fn json_log_output_goes_to_stderr() {
    let dir = TestDir::new();
    let output = sigmahub(&dir)
        .env_remove("RUST_LOG")
        .args(["--json-output", "auth", "status"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let text = String::from_utf8_lossy(&output.stderr);
    let event: Value = text
        .lines()
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
        .unwrap_or_else(|| panic!("no JSON log line: {text}"));
    assert_eq!(event["level"], "ERROR");
    assert_eq!(event["fields"]["code"], "SHUB-A001");
}
