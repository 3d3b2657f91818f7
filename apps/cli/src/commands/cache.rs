//! `seqmix cache-status`: where each task's cache lives and what it holds.

use anyhow::Result;
use colored::Colorize;
use seqmix_data::cache::find_cache_dir;
use seqmix_data::DataConfig;
use serde_json::json;

pub fn execute(config: &DataConfig, tasks: &[String], split: &str, json_output: bool) -> Result<()> {
    let mut reports = Vec::with_capacity(tasks.len());
    for task in tasks {
        let report = match find_cache_dir(&config.cache_dirs, task) {
            Some(layout) => {
                let stats = layout.read_stats(split)?;
                let shards = match layout.read_split_info(split) {
                    Ok(info) => Some(layout.shard_files(split, info.num_shards)?.len()),
                    Err(_) => None,
                };
                json!({
                    "task": task,
                    "cached": true,
                    "cache_dir": layout.dir(),
                    "split": split,
                    "shards": shards,
                    "stats": stats,
                })
            }
            None => json!({ "task": task, "cached": false, "searched": config.cache_dirs }),
        };
        reports.push(report);
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!();
    for report in &reports {
        let task = report["task"].as_str().unwrap_or_default();
        if report["cached"].as_bool() == Some(true) {
            println!("{} {}", task.bold().cyan(), "cached".green());
            println!("  dir:    {}", report["cache_dir"].as_str().unwrap_or_default());
            match report["shards"].as_u64() {
                Some(n) => println!("  {split}: {n} shard(s)"),
                None => println!("  {split}: {}", "no split info".yellow()),
            }
            match report["stats"].get("examples").and_then(serde_json::Value::as_u64) {
                Some(n) => println!("  examples: {n}"),
                None => println!("  examples: {}", "no stats".yellow()),
            }
        } else {
            println!("{} {}", task.bold().cyan(), "not cached".yellow());
        }
    }
    println!();
    Ok(())
}
