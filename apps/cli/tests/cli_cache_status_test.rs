//! Integration tests for `seqmix cache-status`.

use assert_cmd::Command;
use predicates::prelude::*;
use seqmix_data::cache::COMPLETED_FILENAME;
use std::path::Path;
use tempfile::TempDir;

fn write_cache(root: &Path, task: &str) {
    let dir = root.join(task);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(COMPLETED_FILENAME), b"").unwrap();
    std::fs::write(dir.join("stats.train.json"), r#"{"examples": 42}"#).unwrap();
}

#[test]
fn test_cache_status_reports_cached_and_missing_tasks() {
    let temp_dir = TempDir::new().unwrap();
    write_cache(temp_dir.path(), "cached_task");

    let output = Command::cargo_bin("seqmix")
        .unwrap()
        .env("SEQMIX_CACHE_DIRS", temp_dir.path())
        .args(["cache-status", "cached_task", "missing_task", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports[0]["cached"], true);
    assert_eq!(reports[0]["stats"]["examples"], 42);
    assert_eq!(reports[0]["shards"], serde_json::Value::Null);
    assert_eq!(reports[1]["cached"], false);
}

#[test]
fn test_cache_status_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let caches = temp_dir.path().join("caches");
    write_cache(&caches, "cached_task");

    let config = temp_dir.path().join("seqmix.toml");
    std::fs::write(&config, format!("cache_dirs = [{:?}]\n", caches.display().to_string())).unwrap();

    Command::cargo_bin("seqmix")
        .unwrap()
        .env_remove("SEQMIX_CACHE_DIRS")
        .arg("--config")
        .arg(&config)
        .args(["cache-status", "cached_task"])
        .assert()
        .success()
        .stdout(predicate::str::contains("examples: 42"));
}

#[test]
fn test_cache_status_requires_task_names() {
    Command::cargo_bin("seqmix").unwrap().arg("cache-status").assert().failure();
}
