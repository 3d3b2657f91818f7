//! Mixing diagnostics: how examples and tokens are expected to split
//! across the tasks of a mixture.

use crate::dataset::{Dataset, SequenceLength};
use crate::error::{DataError, DataResult};
use crate::task::{Task, TRAIN_SPLIT};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// One row of the mixing table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMixingStats {
    pub task: String,
    pub rate: f64,
    pub example_fraction: f64,
    /// Share of all tokens of each output feature.
    pub token_fraction: BTreeMap<String, f64>,
    pub mean_length: BTreeMap<String, f64>,
}

fn normalize(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    values.iter().map(|v| if total > 0.0 { v / total } else { 0.0 }).collect()
}

/// Builds the mixing table.
///
/// `datasets[i]` is task `i`'s projected, repeated stream. They are only
/// read when `empirical` is set, in which case `stats_examples` examples
/// per task are averaged. Otherwise mean lengths are the requested length
/// for tasks with token preprocessors, and the cached train token count per
/// example (capped at the requested length) for the rest.
pub fn mixing_proportions(
    tasks: &[Arc<Task>],
    datasets: &[Dataset],
    rates: &[f64],
    features: &[String],
    sequence_length: &SequenceLength,
    empirical: bool,
    stats_examples: usize,
) -> DataResult<Vec<TaskMixingStats>> {
    let mut mean_lengths = Vec::with_capacity(tasks.len());
    for (task, dataset) in tasks.iter().zip(datasets) {
        let means = if empirical {
            empirical_mean_lengths(dataset, features, stats_examples)?
        } else {
            estimated_mean_lengths(task, features, sequence_length)?
        };
        mean_lengths.push(means);
    }

    let example_fraction = normalize(rates);
    let mut token_fraction: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); tasks.len()];
    for feature in features {
        let weighted: Vec<f64> = mean_lengths.iter().zip(rates).map(|(m, r)| m[feature] * r).collect();
        for (row, fraction) in token_fraction.iter_mut().zip(normalize(&weighted)) {
            row.insert(feature.clone(), fraction);
        }
    }

    Ok(tasks
        .iter()
        .zip(rates)
        .zip(example_fraction)
        .zip(token_fraction)
        .zip(mean_lengths)
        .map(|((((task, rate), example_fraction), token_fraction), mean_length)| TaskMixingStats {
            task: task.name().to_string(),
            rate: *rate,
            example_fraction,
            token_fraction,
            mean_length,
        })
        .collect())
}

fn empirical_mean_lengths(
    dataset: &Dataset,
    features: &[String],
    stats_examples: usize,
) -> DataResult<BTreeMap<String, f64>> {
    let mut sums: BTreeMap<String, f64> = features.iter().map(|f| (f.clone(), 0.0)).collect();
    let mut seen = 0usize;
    for example in dataset.iter().take(stats_examples) {
        let example = example?;
        for (feature, sum) in &mut sums {
            *sum += example.get(feature).map_or(0, |v| v.len()) as f64;
        }
        seen += 1;
    }
    Ok(sums.into_iter().map(|(f, sum)| (f, if seen == 0 { 0.0 } else { sum / seen as f64 })).collect())
}

fn estimated_mean_lengths(
    task: &Task,
    features: &[String],
    sequence_length: &SequenceLength,
) -> DataResult<BTreeMap<String, f64>> {
    let mut means = BTreeMap::new();
    for feature in features {
        let limit = *sequence_length
            .get(feature)
            .ok_or_else(|| DataError::MissingSequenceLength(feature.clone()))? as f64;
        let mean = if task.token_preprocessors().is_empty() {
            let stats = task.get_cached_stats(TRAIN_SPLIT)?;
            let tokens = stats.tokens(feature).ok_or_else(|| DataError::MissingStats {
                task: task.name().to_string(),
                split: format!("{TRAIN_SPLIT} ({feature}_tokens)"),
            })?;
            if stats.examples == 0 { 0.0 } else { limit.min(tokens / stats.examples as f64) }
        } else {
            limit
        };
        means.insert(feature.clone(), mean);
    }
    Ok(means)
}

/// Mean of `1 - len / limit` per feature over the first `num_examples`
/// examples of `dataset`.
pub fn padding_fractions(
    dataset: &Dataset,
    sequence_length: &SequenceLength,
    num_examples: usize,
) -> DataResult<BTreeMap<String, f64>> {
    let mut sums: BTreeMap<String, f64> = sequence_length.keys().map(|k| (k.clone(), 0.0)).collect();
    let mut seen = 0usize;
    for example in dataset.iter().take(num_examples) {
        let example = example?;
        for (feature, sum) in &mut sums {
            let limit = sequence_length[feature.as_str()] as f64;
            let len = example.get(feature).map_or(0, |v| v.len()) as f64;
            *sum += 1.0 - len / limit;
        }
        seen += 1;
    }
    Ok(sums.into_iter().map(|(k, sum)| (k, if seen == 0 { 0.0 } else { sum / seen as f64 })).collect())
}

fn fraction_cell(row: &BTreeMap<String, f64>, feature: &str) -> String {
    row.get(feature).map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

/// Logs the mixing table, plus padding fractions of `mixed` when
/// `empirical` is set.
#[allow(clippy::too_many_arguments)]
pub fn log_mixing_proportions(
    tasks: &[Arc<Task>],
    datasets: &[Dataset],
    rates: &[f64],
    mixed: &Dataset,
    features: &[String],
    sequence_length: &SequenceLength,
    empirical: bool,
    stats_examples: usize,
) -> DataResult<()> {
    let rows = mixing_proportions(tasks, datasets, rates, features, sequence_length, empirical, stats_examples)?;

    let mut header = format!("{:>12} {:>12}", "rate", "ex.frac.");
    for feature in features {
        header.push_str(&format!(" {:>14} {:>14}", format!("{feature}.frac."), format!("{feature}.len.")));
    }
    info!("{header} task");
    for row in &rows {
        let mut line = format!("{:>12.4} {:>12.4}", row.rate, row.example_fraction);
        for feature in features {
            line.push_str(&format!(
                " {:>14} {:>14}",
                fraction_cell(&row.token_fraction, feature),
                fraction_cell(&row.mean_length, feature)
            ));
        }
        info!("{line} {}", row.task);
    }

    if empirical {
        info!("Computing padding fractions");
        for (feature, fraction) in padding_fractions(mixed, sequence_length, stats_examples)? {
            info!(feature = %feature, fraction, "Padding fraction");
        }
    }
    Ok(())
}
