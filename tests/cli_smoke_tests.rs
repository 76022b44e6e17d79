//! CLI smoke tests - verify basic command-line interface functionality
//!
//! These tests run the actual compiled binary to ensure:
//! - Help and version flags work
//! - Local commands work against an explicit config file
//! - Error messages are helpful

use std::fs;
use std::process::Command;

fn policy_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_audio-policy"))
}

const MINIMAL_CONFIG: &str = r#"
[settings]
default_group = "othermedia"

[[groups]]
name = "othermedia"
flags = ["set_sink", "route_audio"]
sink = "ihf"

[[groups]]
name = "player"

[[devices]]
class = "sink"
type = "ihf"
method = "startswith"
pattern = "alsa_output"

[[streams]]
property = "application.name"
pattern = "mpv"
group = "player"
"#;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).expect("Failed to write config");
    (dir, path)
}

#[test]
fn cli_help_works() {
    let output = policy_bin()
        .arg("--help")
        .output()
        .expect("Failed to run audio-policy --help");

    assert!(output.status.success(), "--help should exit successfully");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"), "Help should show usage");
    assert!(stdout.contains("daemon"), "Help should list daemon command");
    assert!(stdout.contains("status"), "Help should list status command");
    assert!(stdout.contains("set-context"), "Help should list set-context command");
}

#[test]
fn cli_version_works() {
    let output = policy_bin()
        .arg("--version")
        .output()
        .expect("Failed to run audio-policy --version");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("audio-policy"));
    assert!(
        stdout.split_whitespace().count() >= 2,
        "Version should show name and version number"
    );
}

#[test]
fn cli_validate_explicit_config() {
    let (_dir, path) = write_config(MINIMAL_CONFIG);
    let output = policy_bin()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .output()
        .expect("Failed to run audio-policy validate");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "validate failed: {stdout}");
    assert!(stdout.contains("Configuration valid"));
    assert!(stdout.contains("othermedia [DEFAULT]"));
}

#[test]
fn cli_validate_reports_degraded_rule() {
    let config = format!(
        "{MINIMAL_CONFIG}\n[[devices]]\nclass = \"sink\"\ntype = \"broken\"\n\
         method = \"matches\"\npattern = \"(\"\n"
    );
    let (_dir, path) = write_config(&config);
    let output = policy_bin()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .output()
        .expect("Failed to run audio-policy validate");

    assert!(!output.status.success(), "degraded rule should fail validation");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("degraded"), "unexpected stderr: {stderr}");
}

#[test]
fn cli_validate_rejects_unknown_group() {
    let config = MINIMAL_CONFIG.replace("group = \"player\"", "group = \"nowhere\"");
    let (_dir, path) = write_config(&config);
    let output = policy_bin()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .output()
        .expect("Failed to run audio-policy validate");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nowhere"), "error should name the group: {stderr}");
}

#[test]
fn cli_classify_stream_and_device() {
    let (_dir, path) = write_config(MINIMAL_CONFIG);

    let output = policy_bin()
        .arg("--config")
        .arg(&path)
        .args(["classify", "sink-input", "music", "-p", "application.name=mpv", "--json"])
        .output()
        .expect("Failed to run audio-policy classify");
    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("classify --json should print JSON");
    assert_eq!(json["group"], "player");

    let output = policy_bin()
        .arg("--config")
        .arg(&path)
        .args(["classify", "sink", "alsa_output.pci-0000", "--json"])
        .output()
        .expect("Failed to run audio-policy classify");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["labels"], serde_json::json!(["ihf"]));
}

#[test]
fn cli_invalid_command_shows_error() {
    let output = policy_bin()
        .arg("nonexistent-command")
        .output()
        .expect("Failed to run audio-policy with invalid command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("unrecognized")
            || stderr.contains("unexpected")
            || stderr.contains("error"),
        "Should show error for invalid command"
    );
}

#[test]
fn cli_ipc_command_without_daemon_fails_clearly() {
    let runtime = tempfile::tempdir().unwrap();
    let output = policy_bin()
        .env("XDG_RUNTIME_DIR", runtime.path())
        .args(["set-context", "active_profile", "car"])
        .output()
        .expect("Failed to run audio-policy set-context");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not running"), "unexpected stderr: {stderr}");
}
