//! `seqmix inspect-shard`: decode records of one shard file.

use super::local_loaders;
use anyhow::{Context, Result};
use seqmix_data::DataConfig;
use std::path::{Path, PathBuf};

pub fn execute(
    config: DataConfig,
    dataset_id: &str,
    path: &Path,
    data_dir: Option<PathBuf>,
    limit: usize,
) -> Result<()> {
    let loaders = local_loaders(config, data_dir.clone());
    let handle = loaders.get(dataset_id, data_dir.as_deref()).context("Invalid dataset id")?;
    let shard = handle.load_shard(path).with_context(|| format!("Failed to open shard {}", path.display()))?;

    for example in shard.iter().take(limit) {
        let example = example.with_context(|| format!("Failed to decode a record of {}", path.display()))?;
        println!("{}", serde_json::to_string(&example)?);
    }
    Ok(())
}
