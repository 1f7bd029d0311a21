use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sda_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sda");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/sda.sqlite"

[server]
bind = "127.0.0.1:7341"

[[llms]]
name = "gpt-4o"

[[embedding_models]]
name = "e5-small"
"#,
        root.display()
    );

    let config_path = config_dir.join("sda.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sda(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sda_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sda binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sda(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/sda.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_sda(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, stderr, success2) = run_sda(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent): {}", stderr);
}

#[test]
fn test_client_add_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_sda(&config_path, &["init"]);

    let (first, stderr, success) = run_sda(&config_path, &["client", "add", "alice"]);
    assert!(success, "client add failed: {}", stderr);
    assert!(first.starts_with("client alice id="), "unexpected output: {}", first);

    let (second, _, success) = run_sda(&config_path, &["client", "add", "alice"]);
    assert!(success);
    assert_eq!(first, second);

    let (bob, _, _) = run_sda(&config_path, &["client", "add", "bob"]);
    assert_ne!(first.trim_start_matches("client alice "), bob.trim_start_matches("client bob "));
}

#[test]
fn test_client_add_rejects_invalid_sub() {
    let (_tmp, config_path) = setup_test_env();
    run_sda(&config_path, &["init"]);

    let (_, stderr, success) = run_sda(&config_path, &["client", "add", ""]);
    assert!(!success);
    assert!(stderr.contains("invalid"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_sda(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}
