//! SeqMix CLI - inspect datasets, shards and task caches
//!
//! The `seqmix` command answers operational questions about the data a
//! task or mixture will read: which splits a dataset reports, what a shard
//! decodes to, and whether a task has a usable cache.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use seqmix_data::{logging, DataConfig};
use std::path::PathBuf;

/// SeqMix CLI - dataset and task cache inspection
#[derive(Parser, Debug)]
#[command(name = "seqmix", author, version, about = "SeqMix - inspect training data pipelines")]
struct Args {
    /// Log level (trace, debug, info, warn, error); defaults to SEQMIX_LOG / RUST_LOG
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// TOML data configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the splits, sizes and shard counts of a dataset
    Info {
        /// Dataset id (name[/config]:version)
        dataset_id: String,

        /// Directory holding the dataset (defaults to the current directory)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode one shard of a dataset and print its examples as JSON lines
    InspectShard {
        /// Dataset id (name[/config]:version) whose schema decodes the shard
        dataset_id: String,

        /// Shard file
        path: PathBuf,

        /// Directory holding the dataset (defaults to the current directory)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Maximum number of examples to print
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Report where each task's cache lives and what it holds
    CacheStatus {
        /// Task names
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Split whose sidecars to read
        #[arg(long, default_value = "train")]
        split: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<DataConfig> {
    let config = match path {
        Some(path) => DataConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DataConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_tracing(args.log_level.as_deref());
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Info { dataset_id, data_dir, json } => commands::info::execute(config, &dataset_id, data_dir, json),
        Command::InspectShard { dataset_id, path, data_dir, limit } => {
            commands::inspect::execute(config, &dataset_id, &path, data_dir, limit)
        }
        Command::CacheStatus { tasks, split, json } => commands::cache::execute(&config, &tasks, &split, json),
    }
}
