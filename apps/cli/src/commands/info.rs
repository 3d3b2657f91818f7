//! `seqmix info`: dataset metadata.

use super::local_loaders;
use anyhow::{Context, Result};
use colored::Colorize;
use seqmix_data::{DataConfig, SplitSize};
use serde_json::json;
use std::path::PathBuf;

pub fn execute(config: DataConfig, dataset_id: &str, data_dir: Option<PathBuf>, json_output: bool) -> Result<()> {
    let loaders = local_loaders(config, data_dir.clone());
    let handle = loaders.get(dataset_id, data_dir.as_deref()).context("Invalid dataset id")?;
    let info = handle.info().with_context(|| format!("Failed to read dataset info for {dataset_id}"))?;

    let mut splits = Vec::new();
    for split in info.splits.keys() {
        let size = handle.size(split)?;
        let shards = handle.shard_files(split).map_or(0, |files| files.len());
        splits.push((split.as_str(), size, shards));
    }

    if json_output {
        let out = json!({
            "dataset": handle.id().to_string(),
            "data_dir": handle.data_dir(),
            "features": info.features,
            "splits": splits
                .iter()
                .map(|(split, size, shards)| json!({
                    "split": split,
                    "examples": match size {
                        SplitSize::Finite(n) => json!(n),
                        SplitSize::Infinite => serde_json::Value::Null,
                    },
                    "shards": shards,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Dataset {}", handle.id()).bold().cyan());
    if let Some(dir) = handle.data_dir() {
        println!("  {}", dir.display().to_string().dimmed());
    }
    println!();
    println!("{:<16} {:>12} {:>8}", "Split", "Examples", "Shards");
    println!("{}", "─".repeat(38));
    for (split, size, shards) in &splits {
        let examples = match size {
            SplitSize::Finite(n) => n.to_string(),
            SplitSize::Infinite => "unknown".to_string(),
        };
        println!("{:<16} {:>12} {:>8}", split.cyan(), examples, shards);
    }
    println!();
    println!("{:<16} {:<8} {}", "Feature", "Dtype", "Shape");
    println!("{}", "─".repeat(38));
    for (name, spec) in &info.features {
        println!("{:<16} {:<8} {:?}", name, spec.dtype.to_string(), spec.shape);
    }
    println!();
    Ok(())
}
