use crate::error::{DataError, DataResult};
use crate::schema::FeatureSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const COMPLETED_FILENAME: &str = "COMPLETED";

/// Filesystem layout of one task's pre-materialized cache.
///
/// ```text
/// <cache_root>/<task_name>/COMPLETED
/// <cache_root>/<task_name>/info.<split>.json
/// <cache_root>/<task_name>/stats.<split>.json
/// <cache_root>/<task_name>/<split>.tfrecord-00000-of-00004
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    dir: PathBuf,
}

impl CacheLayout {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn for_task(cache_root: &Path, task_name: &str) -> Self {
        Self::new(cache_root.join(task_name))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn completed_marker(&self) -> PathBuf {
        self.dir.join(COMPLETED_FILENAME)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed_marker().exists()
    }

    #[must_use]
    pub fn info_path(&self, split: &str) -> PathBuf {
        self.dir.join(format!("info.{split}.json"))
    }

    #[must_use]
    pub fn stats_path(&self, split: &str) -> PathBuf {
        self.dir.join(format!("stats.{split}.json"))
    }

    #[must_use]
    pub fn tfrecord_prefix(&self, split: &str) -> PathBuf {
        self.dir.join(format!("{split}.tfrecord"))
    }

    #[must_use]
    pub fn shard_path(&self, split: &str, index: usize, num_shards: usize) -> PathBuf {
        self.dir.join(format!("{split}.tfrecord-{index:05}-of-{num_shards:05}"))
    }

    pub fn read_split_info(&self, split: &str) -> DataResult<SplitCacheInfo> {
        let bytes = std::fs::read(self.info_path(split))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns `None` when the split has no stats file.
    pub fn read_stats(&self, split: &str) -> DataResult<Option<CachedStats>> {
        let path = self.stats_path(split);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Sorted shard files matching `<split>.tfrecord-*-of-*<num_shards>`.
    pub fn shard_files(&self, split: &str, num_shards: usize) -> DataResult<Vec<PathBuf>> {
        let prefix = glob::Pattern::escape(&self.tfrecord_prefix(split).to_string_lossy());
        let pattern = format!("{prefix}-*-of-*{num_shards}");
        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            files.push(entry.map_err(|e| DataError::Io(e.into()))?);
        }
        files.sort();
        Ok(files)
    }
}

/// `info.<split>.json`: how the cached records of a split are laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCacheInfo {
    pub features: FeatureSchema,
    pub num_shards: usize,
}

/// `stats.<split>.json`: `{"examples": n, "<feature>_tokens": m, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedStats {
    pub examples: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CachedStats {
    /// Total token count recorded for `feature`.
    #[must_use]
    pub fn tokens(&self, feature: &str) -> Option<f64> {
        self.extra.get(&format!("{feature}_tokens")).and_then(serde_json::Value::as_f64)
    }
}

/// The first `<root>/<task_name>` holding a `COMPLETED` marker, searching
/// `roots` in order.
#[must_use]
pub fn find_cache_dir(roots: &[PathBuf], task_name: &str) -> Option<CacheLayout> {
    let candidates: Vec<CacheLayout> = roots.iter().map(|root| CacheLayout::for_task(root, task_name)).collect();
    if let Some(found) = candidates.iter().find(|layout| layout.is_completed()) {
        info!(task = task_name, cache_dir = %found.dir().display(), "Task is cached");
        return Some(found.clone());
    }
    let searched: Vec<String> = candidates.iter().map(|c| c.dir().display().to_string()).collect();
    info!(task = task_name, searched = ?searched, "Task does not exist in any task cache directories");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = CacheLayout::for_task(Path::new("/cache"), "my_task");
        assert_eq!(layout.dir(), Path::new("/cache/my_task"));
        assert_eq!(layout.info_path("train"), PathBuf::from("/cache/my_task/info.train.json"));
        assert_eq!(layout.stats_path("validation"), PathBuf::from("/cache/my_task/stats.validation.json"));
        assert_eq!(layout.shard_path("train", 1, 4), PathBuf::from("/cache/my_task/train.tfrecord-00001-of-00004"));
    }

    #[test]
    fn test_find_cache_dir_respects_priority_and_marker() {
        let temp = TempDir::new().unwrap();
        let roots: Vec<PathBuf> = ["a", "b", "c"].iter().map(|r| temp.path().join(r)).collect();
        for root in &roots[1..] {
            std::fs::create_dir_all(root.join("t")).unwrap();
            std::fs::write(root.join("t").join(COMPLETED_FILENAME), b"").unwrap();
        }
        // A directory without a marker does not count.
        std::fs::create_dir_all(roots[0].join("t")).unwrap();

        let found = find_cache_dir(&roots, "t").unwrap();
        assert_eq!(found.dir(), roots[1].join("t"));
        assert!(find_cache_dir(&roots, "other").is_none());
    }

    #[test]
    fn test_shard_glob_filters_by_split_and_count() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().to_path_buf());
        for name in [
            "train.tfrecord-00001-of-00002",
            "train.tfrecord-00000-of-00002",
            "validation.tfrecord-00000-of-00002",
            "train.tfrecord-00000-of-00003",
        ] {
            std::fs::write(temp.path().join(name), b"").unwrap();
        }
        let files = layout.shard_files("train", 2).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["train.tfrecord-00000-of-00002", "train.tfrecord-00001-of-00002"]);
    }

    #[test]
    fn test_stats_token_lookup() {
        let stats: CachedStats =
            serde_json::from_str(r#"{"examples": 10, "inputs_tokens": 250, "targets_tokens": 40}"#).unwrap();
        assert_eq!(stats.examples, 10);
        assert_eq!(stats.tokens("inputs"), Some(250.0));
        assert_eq!(stats.tokens("missing"), None);
    }

    #[test]
    fn test_missing_stats_file_is_none() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().to_path_buf());
        assert!(layout.read_stats("train").unwrap().is_none());
    }
}
