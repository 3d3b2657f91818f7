//! Integration tests for `seqmix info` and `seqmix inspect-shard`.

use assert_cmd::Command;
use predicates::prelude::*;
use seqmix_data::backend::{shard_file_name, DATASET_INFO_FILENAME};
use seqmix_data::tfrecord::write_shard;
use seqmix_data::{DType, DatasetInfo, Example, Feature, FeatureSchema, FeatureSpec, SplitInfo};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;

/// Writes `lines:1.0.0` with two train examples in one shard.
fn write_lines_dataset(temp_dir: &TempDir) -> PathBuf {
    let dir = temp_dir.path().join("lines").join("1.0.0");
    std::fs::create_dir_all(&dir).unwrap();
    let info = DatasetInfo {
        features: FeatureSchema::from([("text".to_string(), FeatureSpec::scalar(DType::String))]),
        splits: BTreeMap::from([("train".to_string(), SplitInfo { num_examples: 2, num_shards: 1 })]),
        configs: Vec::new(),
    };
    std::fs::write(dir.join(DATASET_INFO_FILENAME), serde_json::to_vec(&info).unwrap()).unwrap();

    let shard = dir.join(shard_file_name("lines", "train", 0, 1));
    let examples: Vec<Example> =
        ["first line", "second line"].iter().map(|t| Example::from([("text".to_string(), Feature::from(*t))])).collect();
    write_shard(&shard, &examples).unwrap();
    shard
}

#[test]
fn test_info_lists_splits() {
    let temp_dir = TempDir::new().unwrap();
    write_lines_dataset(&temp_dir);

    let mut cmd = Command::cargo_bin("seqmix").unwrap();
    cmd.arg("info")
        .arg("lines:1.0.0")
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("train"))
        .stdout(predicate::str::contains("text"));
}

#[test]
fn test_info_json() {
    let temp_dir = TempDir::new().unwrap();
    write_lines_dataset(&temp_dir);

    let output = Command::cargo_bin("seqmix")
        .unwrap()
        .args(["info", "lines:1.0.0", "--json", "--data-dir"])
        .arg(temp_dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["dataset"], "lines:1.0.0");
    assert_eq!(value["splits"][0]["examples"], 2);
    assert_eq!(value["splits"][0]["shards"], 1);
}

#[test]
fn test_info_requires_version() {
    let temp_dir = TempDir::new().unwrap();
    Command::cargo_bin("seqmix")
        .unwrap()
        .args(["info", "lines", "--data-dir"])
        .arg(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("version"));
}

#[test]
fn test_inspect_shard_prints_json_lines() {
    let temp_dir = TempDir::new().unwrap();
    let shard = write_lines_dataset(&temp_dir);

    Command::cargo_bin("seqmix")
        .unwrap()
        .args(["inspect-shard", "lines:1.0.0"])
        .arg(&shard)
        .arg("--data-dir")
        .arg(temp_dir.path())
        .args(["--limit", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"text":"first line"}"#))
        .stdout(predicate::str::contains("second line").not());
}
