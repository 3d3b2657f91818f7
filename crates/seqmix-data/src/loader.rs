//! Memoized handles onto externally stored datasets.
//!
//! A [`DatasetHandle`] wraps one `(dataset id, data dir)` pair. Handles are
//! handed out by [`DatasetLoaders`], which keeps exactly one instance per
//! identity so the (possibly expensive) metadata probe runs once.

use crate::config::DataConfig;
use crate::dataset::Dataset;
use crate::error::{DataError, DataResult};
use crate::schema::FeatureSchema;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, error, warn};

/// `name[/config]:version`. A config is pinned iff the id contains `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetId {
    pub name: String,
    pub config: Option<String>,
    pub version: String,
}

impl DatasetId {
    #[must_use]
    pub fn with_config(&self, config: &str) -> Self {
        Self { name: self.name.clone(), config: Some(config.to_string()), version: self.version.clone() }
    }
}

impl FromStr for DatasetId {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DataError::InvalidDatasetId(s.to_string());
        let (base, version) = s.rsplit_once(':').ok_or_else(invalid)?;
        if version.is_empty() || base.is_empty() {
            return Err(invalid());
        }
        let (name, config) = match base.split_once('/') {
            Some((name, config)) if !name.is_empty() && !config.is_empty() => (name, Some(config.to_string())),
            Some(_) => return Err(invalid()),
            None => (base, None),
        };
        Ok(Self { name: name.to_string(), config, version: version.to_string() })
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.config {
            Some(config) => write!(f, "{}/{}:{}", self.name, config, self.version),
            None => write!(f, "{}:{}", self.name, self.version),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitInfo {
    /// Zero or negative means unknown (very large datasets).
    #[serde(default)]
    pub num_examples: i64,
    #[serde(default)]
    pub num_shards: usize,
}

/// Metadata reported by a backend for one dataset (or one config of it).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    #[serde(default)]
    pub features: FeatureSchema,
    #[serde(default)]
    pub splits: BTreeMap<String, SplitInfo>,
    /// Sub-configurations, if the dataset has several.
    #[serde(default)]
    pub configs: Vec<String>,
}

/// Example count of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSize {
    Finite(u64),
    /// The backend does not know (or will not say) how large the split is.
    Infinite,
}

impl SplitSize {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Finite(n) => n as f64,
            Self::Infinite => f64::INFINITY,
        }
    }
}

/// Storage layer that actually knows where datasets live.
pub trait DatasetBackend: Send + Sync + fmt::Debug {
    fn info(&self, id: &DatasetId, data_dir: Option<&Path>) -> DataResult<DatasetInfo>;

    /// Physical shard paths of `split` for exactly this id (no config fan-out).
    fn shard_files(
        &self,
        id: &DatasetId,
        data_dir: Option<&Path>,
        info: &DatasetInfo,
        split: &str,
    ) -> DataResult<Vec<PathBuf>>;

    /// Raw examples of `split`; file order is shuffled per pass if asked.
    fn load(
        &self,
        id: &DatasetId,
        data_dir: Option<&Path>,
        info: &DatasetInfo,
        split: &str,
        shuffle_files: bool,
        seed: Option<u64>,
    ) -> DataResult<Dataset>;

    fn load_shard(&self, info: &DatasetInfo, path: &Path) -> DataResult<Dataset>;
}

pub struct DatasetHandle {
    id: DatasetId,
    data_dir: Option<PathBuf>,
    backend: Arc<dyn DatasetBackend>,
    seed: Option<u64>,
    info: OnceCell<DatasetInfo>,
    shard_files: RwLock<HashMap<String, Arc<BTreeSet<PathBuf>>>>,
}

impl fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("id", &self.id.to_string())
            .field("data_dir", &self.data_dir)
            .field("info_loaded", &self.info.get().is_some())
            .finish_non_exhaustive()
    }
}

impl DatasetHandle {
    fn new(id: DatasetId, data_dir: Option<PathBuf>, backend: Arc<dyn DatasetBackend>, config: &DataConfig) -> Self {
        let data_dir = match (&config.data_dir_override, data_dir) {
            (Some(over), own) => {
                if let Some(own) = own {
                    warn!(
                        dataset = %id,
                        own = %own.display(),
                        override_dir = %over.display(),
                        "Overriding dataset data directory"
                    );
                }
                Some(over.clone())
            }
            (None, own) => own,
        };
        Self { id, data_dir, backend, seed: config.seed, info: OnceCell::new(), shard_files: RwLock::default() }
    }

    #[must_use]
    pub fn id(&self) -> &DatasetId {
        &self.id
    }

    /// The effective data directory, after applying any override.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Split and feature metadata, fetched from the backend on first use.
    pub fn info(&self) -> DataResult<&DatasetInfo> {
        self.info.get_or_try_init(|| {
            debug!(dataset = %self.id, "Loading dataset info");
            self.backend.info(&self.id, self.data_dir())
        })
    }

    pub fn splits(&self) -> DataResult<Vec<String>> {
        Ok(self.info()?.splits.keys().cloned().collect())
    }

    pub fn verify_split(&self, split: &str) -> DataResult<()> {
        if self.info()?.splits.contains_key(split) {
            Ok(())
        } else {
            Err(DataError::InvalidSplit { dataset: self.id.to_string(), split: split.to_string() })
        }
    }

    pub fn size(&self, split: &str) -> DataResult<SplitSize> {
        self.verify_split(split)?;
        let num_examples = self.info()?.splits[split].num_examples;
        Ok(u64::try_from(num_examples).ok().filter(|n| *n > 0).map_or(SplitSize::Infinite, SplitSize::Finite))
    }

    /// Every shard file of `split`. Datasets with several configs and none
    /// pinned aggregate the shards of all configs.
    pub fn shard_files(&self, split: &str) -> DataResult<Arc<BTreeSet<PathBuf>>> {
        self.verify_split(split)?;
        if let Some(files) = self.shard_files.read().unwrap_or_else(PoisonError::into_inner).get(split) {
            return Ok(Arc::clone(files));
        }

        let info = self.info()?;
        let mut files = BTreeSet::new();
        if self.id.config.is_none() && !info.configs.is_empty() {
            for config in &info.configs {
                let config_id = self.id.with_config(config);
                let config_info = self.backend.info(&config_id, self.data_dir())?;
                if !config_info.splits.contains_key(split) {
                    debug!(dataset = %config_id, split, "Config has no such split, skipping");
                    continue;
                }
                files.extend(self.backend.shard_files(&config_id, self.data_dir(), &config_info, split)?);
            }
        } else {
            files.extend(self.backend.shard_files(&self.id, self.data_dir(), info, split)?);
        }

        if files.is_empty() {
            error!(dataset = %self.id, split, "No shard files found for dataset");
            return Err(DataError::NoShardsFound(self.id.to_string()));
        }

        let files = Arc::new(files);
        self.shard_files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(split.to_string())
            .or_insert_with(|| Arc::clone(&files));
        Ok(files)
    }

    /// Raw examples of `split`.
    pub fn stream(&self, split: &str, shuffle_files: bool) -> DataResult<Dataset> {
        self.verify_split(split)?;
        self.backend.load(&self.id, self.data_dir(), self.info()?, split, shuffle_files, self.seed)
    }

    /// Decoded examples of a single shard file, for low-level inspection.
    pub fn load_shard(&self, path: &Path) -> DataResult<Dataset> {
        self.backend.load_shard(self.info()?, path)
    }
}

type HandleKey = (String, Option<PathBuf>);

/// Process-lifetime factory of shared [`DatasetHandle`]s.
pub struct DatasetLoaders {
    backend: Arc<dyn DatasetBackend>,
    config: Arc<DataConfig>,
    handles: Mutex<HashMap<HandleKey, Arc<DatasetHandle>>>,
}

impl fmt::Debug for DatasetLoaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.handles.lock().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("DatasetLoaders").field("backend", &self.backend).field("handle_count", &count).finish()
    }
}

impl DatasetLoaders {
    pub fn new(backend: Arc<dyn DatasetBackend>, config: Arc<DataConfig>) -> Self {
        Self { backend, config, handles: Mutex::new(HashMap::new()) }
    }

    /// Returns the handle for `(dataset_id, data_dir)`, creating it once.
    pub fn get(&self, dataset_id: &str, data_dir: Option<&Path>) -> DataResult<Arc<DatasetHandle>> {
        let key = (dataset_id.to_string(), data_dir.map(Path::to_path_buf));
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = handles.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let id: DatasetId = dataset_id.parse()?;
        debug!(dataset = %id, "Creating dataset handle");
        let handle =
            Arc::new(DatasetHandle::new(id, key.1.clone(), Arc::clone(&self.backend), &self.config));
        handles.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn config(&self) -> &Arc<DataConfig> {
        &self.config
    }
}
