use std::process::Command;
use tempfile::TempDir;

/// Integration tests for MediaSentry CLI commands
/// These tests run the actual binary and verify its behavior

fn mediasentry() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_mediasentry"));
    command.env_remove("RUST_LOG");
    command
}

#[test]
fn test_cli_help() {
    let output = mediasentry()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    for command in ["serve", "sync", "releases", "store", "doctor", "init"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_cli_version() {
    let output = mediasentry()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("mediasentry"));
}

#[test]
fn test_init_writes_config_once() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested").join("config.yml");

    let output = mediasentry()
        .args(["--config", config_path.to_str().unwrap(), "init"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(config_path.exists());
    assert!(String::from_utf8_lossy(&output.stdout).contains("initialized"));

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("port: 3001"));

    let output = mediasentry()
        .args(["--config", config_path.to_str().unwrap(), "init"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("already exists"));
}

#[test]
fn test_store_command_prints_releases() {
    let temp_dir = TempDir::new().unwrap();
    let db_file = temp_dir.path().join("releases.json");
    std::fs::write(
        &db_file,
        r#"{"releases": {"acme/tool": "1.2.0", "other/lib": "0.9.1"}}"#,
    )
    .unwrap();

    let config_path = temp_dir.path().join("config.yml");
    std::fs::write(
        &config_path,
        format!(
            r#"
release_watcher:
  ntfy_url: "https://ntfy.example/releases"
  check_interval: "1h"
  repo_file: "{repo}"
  db_file: "{db}"
"#,
            repo = temp_dir.path().join("repos.txt").display(),
            db = db_file.display()
        ),
    )
    .unwrap();

    let output = mediasentry()
        .args(["--config", config_path.to_str().unwrap(), "store", "releases"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Repositories (2)"));
    assert!(stdout.contains("acme/tool  1.2.0"));
}

#[test]
fn test_sync_without_section_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    std::fs::write(&config_path, "server:\n  port: 4000\n").unwrap();

    let output = mediasentry()
        .args(["--config", config_path.to_str().unwrap(), "sync"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("import_saver"));
}
