//! Filesystem dataset backend.
//!
//! Layout under a data directory:
//!
//! ```text
//! <data_dir>/<name>[/<config>]/<version>/dataset_info.json
//! <data_dir>/<name>[/<config>]/<version>/<name>-<split>.tfrecord-00000-of-00002
//! ```
//!
//! `dataset_info.json` is a serialized [`DatasetInfo`].

use crate::dataset::Dataset;
use crate::error::{DataError, DataResult};
use crate::loader::{DatasetBackend, DatasetId, DatasetInfo};
use crate::tfrecord::read_shard;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DATASET_INFO_FILENAME: &str = "dataset_info.json";

#[derive(Debug, Clone)]
pub struct LocalBackend {
    default_root: PathBuf,
}

impl LocalBackend {
    /// `default_root` is used for datasets that name no data directory.
    pub fn new(default_root: impl Into<PathBuf>) -> Self {
        Self { default_root: default_root.into() }
    }

    #[must_use]
    pub fn dataset_dir(&self, id: &DatasetId, data_dir: Option<&Path>) -> PathBuf {
        let mut dir = data_dir.unwrap_or(self.default_root.as_path()).join(&id.name);
        if let Some(config) = &id.config {
            dir.push(config);
        }
        dir.join(&id.version)
    }

    #[must_use]
    pub fn shard_path(&self, id: &DatasetId, data_dir: Option<&Path>, split: &str, index: usize, num_shards: usize) -> PathBuf {
        self.dataset_dir(id, data_dir).join(shard_file_name(&id.name, split, index, num_shards))
    }
}

#[must_use]
pub fn shard_file_name(name: &str, split: &str, index: usize, num_shards: usize) -> String {
    format!("{name}-{split}.tfrecord-{index:05}-of-{num_shards:05}")
}

impl DatasetBackend for LocalBackend {
    fn info(&self, id: &DatasetId, data_dir: Option<&Path>) -> DataResult<DatasetInfo> {
        let path = self.dataset_dir(id, data_dir).join(DATASET_INFO_FILENAME);
        let bytes = std::fs::read(&path).map_err(|e| {
            DataError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn shard_files(
        &self,
        id: &DatasetId,
        data_dir: Option<&Path>,
        info: &DatasetInfo,
        split: &str,
    ) -> DataResult<Vec<PathBuf>> {
        let num_shards = info.splits.get(split).map_or(0, |s| s.num_shards);
        Ok((0..num_shards).map(|i| self.shard_path(id, data_dir, split, i, num_shards)).collect())
    }

    fn load(
        &self,
        id: &DatasetId,
        data_dir: Option<&Path>,
        info: &DatasetInfo,
        split: &str,
        shuffle_files: bool,
        seed: Option<u64>,
    ) -> DataResult<Dataset> {
        let schema = Arc::new(info.features.clone());
        let shards = self
            .shard_files(id, data_dir, info, split)?
            .into_iter()
            .map(|path| read_shard(path, Arc::clone(&schema)))
            .collect();
        Ok(Dataset::interleave_shuffled(shards, shuffle_files, seed, 1, 1))
    }

    fn load_shard(&self, info: &DatasetInfo, path: &Path) -> DataResult<Dataset> {
        Ok(read_shard(path.to_path_buf(), Arc::new(info.features.clone())))
    }
}
