//! Command implementations for the SeqMix CLI.

pub mod cache;
pub mod info;
pub mod inspect;

use seqmix_data::{DataConfig, DatasetLoaders, LocalBackend};
use std::path::PathBuf;
use std::sync::Arc;

/// Dataset handles backed by the local filesystem, rooted at `data_dir` or
/// the current directory.
pub(crate) fn local_loaders(config: DataConfig, data_dir: Option<PathBuf>) -> DatasetLoaders {
    let root = data_dir.unwrap_or_else(|| PathBuf::from("."));
    DatasetLoaders::new(Arc::new(LocalBackend::new(root)), Arc::new(config))
}
