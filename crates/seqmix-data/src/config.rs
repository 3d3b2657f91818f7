//! Data pipeline configuration.

use crate::error::{DataError, DataResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "SEQMIX_DATA_DIR";
pub const CACHE_DIRS_ENV: &str = "SEQMIX_CACHE_DIRS";

/// Settings shared by dataset handles, tasks and mixtures.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DataConfig {
    /// When set, replaces every dataset's own data directory.
    #[serde(default)]
    pub data_dir_override: Option<PathBuf>,
    /// Cache roots, searched in order.
    #[serde(default)]
    pub cache_dirs: Vec<PathBuf>,
    #[serde(default = "default_shuffle_buffer_size")]
    pub shuffle_buffer_size: usize,
    /// Cached splits with at most this many examples are held in memory.
    #[serde(default = "default_max_examples_to_mem_cache")]
    pub max_examples_to_mem_cache: u64,
    #[serde(default = "default_interleave_length")]
    pub interleave_cycle_length: usize,
    #[serde(default = "default_interleave_length")]
    pub interleave_block_length: usize,
    /// Examples sampled per task for empirical mixing statistics.
    #[serde(default = "default_stats_examples")]
    pub stats_examples: usize,
    /// Seed for shuffles and mixture sampling; entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_shuffle_buffer_size() -> usize {
    1000
}

fn default_max_examples_to_mem_cache() -> u64 {
    1000
}

fn default_interleave_length() -> usize {
    16
}

fn default_stats_examples() -> usize {
    100
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir_override: None,
            cache_dirs: Vec::new(),
            shuffle_buffer_size: default_shuffle_buffer_size(),
            max_examples_to_mem_cache: default_max_examples_to_mem_cache(),
            interleave_cycle_length: default_interleave_length(),
            interleave_block_length: default_interleave_length(),
            stats_examples: default_stats_examples(),
            seed: None,
        }
    }
}

impl DataConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(contents: &str) -> DataResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML config file.
    pub fn load(path: &Path) -> DataResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Applies `SEQMIX_DATA_DIR` and `SEQMIX_CACHE_DIRS` when present.
    /// Cache dirs from the environment are appended after configured ones.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            self.data_dir_override = Some(PathBuf::from(dir));
        }
        if let Some(dirs) = std::env::var_os(CACHE_DIRS_ENV) {
            self.cache_dirs.extend(std::env::split_paths(&dirs).filter(|p| !p.as_os_str().is_empty()));
        }
        self
    }

    #[must_use]
    pub fn set_data_dir_override(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir_override = Some(dir.into());
        self
    }

    #[must_use]
    pub fn set_cache_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.cache_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn add_cache_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.cache_dirs.extend(dirs.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> DataResult<()> {
        if self.shuffle_buffer_size == 0 {
            return Err(DataError::Config("shuffle_buffer_size must be >= 1".to_string()));
        }
        if self.interleave_cycle_length == 0 || self.interleave_block_length == 0 {
            return Err(DataError::Config("interleave lengths must be >= 1".to_string()));
        }
        Ok(())
    }
}
