//! governd as a config checker

use std::path::PathBuf;
use std::process::Command;
use uuid::Uuid;

fn write_config(content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("governd-{}.toml", Uuid::new_v4()));
    std::fs::write(&path, content).unwrap();
    path
}

fn governd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_governd"));
    cmd.env_remove("GOVERND_CONFIG").env("RUST_LOG", "error");
    cmd
}

#[test]
fn test_prints_effective_config() {
    let path = write_config("[idempotency]\ntimeout_secs = 30\n");
    let output = governd().arg("--config").arg(&path).output().unwrap();
    std::fs::remove_file(&path).ok();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("timeout_secs = 30"));
    assert!(stdout.contains("usage_cache_ttl_secs = 60"));
}

#[test]
fn test_invalid_config_exits_non_zero() {
    let path = write_config("[quota]\nusage_cache_ttl_secs = 0\n");
    let output = governd().arg("--config").arg(&path).output().unwrap();
    std::fs::remove_file(&path).ok();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_missing_file_exits_non_zero() {
    let output = governd()
        .args(["--config", "/nonexistent/governd.toml", "--quiet"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
