//! Shared fixtures: raw datasets under a `LocalBackend` root and completed
//! task caches, both written with the bundled TFRecord writer.

#![allow(dead_code)]

use seqmix_data::backend::{shard_file_name, DATASET_INFO_FILENAME};
use seqmix_data::cache::{CacheLayout, SplitCacheInfo, COMPLETED_FILENAME};
use seqmix_data::tfrecord::write_shard;
use seqmix_data::{
    Catalog, DType, DataConfig, DataResult, Dataset, DatasetInfo, Example, Feature, FeatureSchema, FeatureSpec,
    LocalBackend, SequenceLength, SplitInfo,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Fixture {
    pub temp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self { temp: TempDir::new().unwrap() }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.temp.path().join("cache")
    }

    pub fn config(&self) -> DataConfig {
        DataConfig::default().set_cache_dirs([self.cache_dir()]).with_seed(7)
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog_with(self.config())
    }

    pub fn catalog_with(&self, config: DataConfig) -> Catalog {
        Catalog::new(config, Arc::new(LocalBackend::new(self.data_dir())))
    }
}

pub fn text_pair(inputs: &str, targets: &str) -> Example {
    Example::from([
        ("inputs".to_string(), Feature::from(inputs)),
        ("targets".to_string(), Feature::from(targets)),
    ])
}

pub fn token_pair(inputs: Vec<i64>, targets: Vec<i64>) -> Example {
    Example::from([
        ("inputs".to_string(), Feature::Ints(inputs)),
        ("targets".to_string(), Feature::Ints(targets)),
    ])
}

pub fn lengths(inputs: usize, targets: usize) -> SequenceLength {
    SequenceLength::from([("inputs".to_string(), inputs), ("targets".to_string(), targets)])
}

pub fn collect(dataset: &Dataset) -> Vec<Example> {
    dataset.iter().collect::<DataResult<Vec<_>>>().unwrap()
}

/// Writes `<data_dir>/<name>/1.0.0` with one shard per split holding
/// string `inputs`/`targets` pairs.
pub fn write_text_dataset(data_dir: &Path, name: &str, splits: &[(&str, Vec<Example>)]) {
    let dir = data_dir.join(name).join("1.0.0");
    std::fs::create_dir_all(&dir).unwrap();

    let features = FeatureSchema::from([
        ("inputs".to_string(), FeatureSpec::scalar(DType::String)),
        ("targets".to_string(), FeatureSpec::scalar(DType::String)),
    ]);
    let mut split_infos = BTreeMap::new();
    for (split, examples) in splits {
        write_shard(&dir.join(shard_file_name(name, split, 0, 1)), examples).unwrap();
        split_infos.insert((*split).to_string(), SplitInfo { num_examples: examples.len() as i64, num_shards: 1 });
    }
    let info = DatasetInfo { features, splits: split_infos, configs: Vec::new() };
    std::fs::write(dir.join(DATASET_INFO_FILENAME), serde_json::to_vec(&info).unwrap()).unwrap();
}

/// Writes a completed cache for `task` with int `inputs`/`targets` spread
/// round-robin over `num_shards` shards.
pub fn write_task_cache(cache_root: &Path, task: &str, split: &str, examples: &[Example], num_shards: usize) {
    let layout = CacheLayout::for_task(cache_root, task);
    std::fs::create_dir_all(layout.dir()).unwrap();

    for shard in 0..num_shards {
        let records: Vec<Example> = examples.iter().skip(shard).step_by(num_shards).cloned().collect();
        write_shard(&layout.shard_path(split, shard, num_shards), &records).unwrap();
    }

    let info = SplitCacheInfo {
        features: FeatureSchema::from([
            ("inputs".to_string(), FeatureSpec::variable(DType::Int64)),
            ("targets".to_string(), FeatureSpec::variable(DType::Int64)),
        ]),
        num_shards,
    };
    std::fs::write(layout.info_path(split), serde_json::to_vec(&info).unwrap()).unwrap();

    let token_count = |key: &str| -> usize { examples.iter().map(|ex| ex[key].len()).sum() };
    let stats = serde_json::json!({
        "examples": examples.len(),
        "inputs_tokens": token_count("inputs"),
        "targets_tokens": token_count("targets"),
    });
    std::fs::write(layout.stats_path(split), serde_json::to_vec(&stats).unwrap()).unwrap();
    std::fs::write(layout.completed_marker(), b"").unwrap();
}

/// Marks a cache directory complete without writing any split.
pub fn write_completed_marker(cache_root: &Path, task: &str) {
    let dir = cache_root.join(task);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(COMPLETED_FILENAME), b"").unwrap();
}

/// Deletes the shard files of a cache, leaving its sidecars in place.
pub fn remove_cached_shards(cache_root: &Path, task: &str) {
    for entry in std::fs::read_dir(cache_root.join(task)).unwrap() {
        let path = entry.unwrap().path();
        if path.to_string_lossy().contains(".tfrecord") {
            std::fs::remove_file(path).unwrap();
        }
    }
}
