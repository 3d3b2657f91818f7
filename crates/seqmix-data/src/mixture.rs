//! Weighted combinations of tasks.

use crate::config::DataConfig;
use crate::dataset::{Dataset, SequenceLength};
use crate::error::{DataError, DataResult};
use crate::rates::Rate;
use crate::registry::{DatasetProvider, TaskRegistry};
use crate::stats::log_mixing_proportions;
use crate::task::{Task, TRAIN_SPLIT};
use crate::vocabulary::{Vocabulary, VocabularySource};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A task name with an optional rate; entries without one use the
/// mixture's default rate.
#[derive(Debug, Clone)]
pub struct MixtureEntry {
    pub task: String,
    pub rate: Option<Rate>,
}

impl From<&str> for MixtureEntry {
    fn from(task: &str) -> Self {
        Self { task: task.to_string(), rate: None }
    }
}

impl From<String> for MixtureEntry {
    fn from(task: String) -> Self {
        Self { task, rate: None }
    }
}

impl From<(&str, f64)> for MixtureEntry {
    fn from((task, rate): (&str, f64)) -> Self {
        Self { task: task.to_string(), rate: Some(Rate::from(rate)) }
    }
}

impl From<(&str, Rate)> for MixtureEntry {
    fn from((task, rate): (&str, Rate)) -> Self {
        Self { task: task.to_string(), rate: Some(rate) }
    }
}

pub struct Mixture {
    name: String,
    tasks: Vec<Arc<Task>>,
    rates: HashMap<String, Rate>,
    config: Arc<DataConfig>,
}

impl fmt::Debug for Mixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks: Vec<&str> = self.tasks.iter().map(|t| t.name()).collect();
        f.debug_struct("Mixture").field("name", &self.name).field("tasks", &tasks).finish_non_exhaustive()
    }
}

impl Mixture {
    /// Resolves `entries` against `tasks`.
    ///
    /// # Errors
    /// - `NotFound` for an unregistered task.
    /// - `MissingRate` when an entry has no rate and `default_rate` is `None`.
    /// - `IncompatibleMixture` when the entry list is empty, names a task
    ///   twice, or the tasks disagree on output features or vocabulary.
    pub fn new<I, E>(
        name: impl Into<String>,
        entries: I,
        default_rate: Option<Rate>,
        tasks: &TaskRegistry,
        config: Arc<DataConfig>,
    ) -> DataResult<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<MixtureEntry>,
    {
        let name = name.into();
        let mut members = Vec::new();
        let mut rates = HashMap::new();
        for entry in entries {
            let MixtureEntry { task, rate } = entry.into();
            let rate = rate.or_else(|| default_rate.clone()).ok_or_else(|| DataError::MissingRate(task.clone()))?;
            if rates.insert(task.clone(), rate).is_some() {
                return Err(DataError::IncompatibleMixture(format!("'{name}' lists task '{task}' more than once")));
            }
            members.push(tasks.get(&task)?);
        }

        let Some(first) = members.first() else {
            return Err(DataError::IncompatibleMixture(format!("'{name}' has no tasks")));
        };
        for task in &members[1..] {
            if task.output_features() != first.output_features() {
                return Err(DataError::IncompatibleMixture(format!(
                    "all tasks in a mixture must have the same output features: '{}' has {:?}, '{}' has {:?}",
                    first.name(),
                    first.output_features(),
                    task.name(),
                    task.output_features()
                )));
            }
            if task.vocabulary_source() != first.vocabulary_source() {
                return Err(DataError::IncompatibleMixture(format!(
                    "all tasks in a mixture must share a vocabulary: '{}' uses {}, '{}' uses {}",
                    first.name(),
                    first.vocabulary_source(),
                    task.name(),
                    task.vocabulary_source()
                )));
            }
        }

        debug!(mixture = %name, tasks = members.len(), "Created mixture");
        Ok(Self { name, tasks: members, rates, config })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    /// Resolved rate of a member task.
    pub fn get_rate(&self, task: &Task) -> DataResult<f64> {
        self.rates
            .get(task.name())
            .ok_or_else(|| DataError::NotFound(format!("task '{}' in mixture '{}'", task.name(), self.name)))?
            .evaluate(task)
    }

    // Members are checked to agree at construction, so the first speaks
    // for all of them.
    fn lead(&self) -> &Task {
        &self.tasks[0]
    }

    pub fn output_features(&self) -> &[String] {
        self.lead().output_features()
    }

    pub fn vocabulary_source(&self) -> &VocabularySource {
        self.lead().vocabulary_source()
    }

    pub fn get_vocabulary(&self) -> DataResult<Arc<dyn Vocabulary>> {
        self.lead().get_vocabulary()
    }

    /// An infinite stream drawing from every member task with the requested
    /// split, each with probability proportional to its rate.
    pub fn get_dataset(
        &self,
        sequence_length: &SequenceLength,
        split: &str,
        use_cached: bool,
        shuffle: bool,
    ) -> DataResult<Dataset> {
        self.get_dataset_with_stats(sequence_length, split, use_cached, shuffle, false)
    }

    /// Like [`Mixture::get_dataset`]. On the cached training split it also
    /// logs the mixing table, sampling real examples when
    /// `compute_stats_empirically` is set.
    pub fn get_dataset_with_stats(
        &self,
        sequence_length: &SequenceLength,
        split: &str,
        use_cached: bool,
        shuffle: bool,
        compute_stats_empirically: bool,
    ) -> DataResult<Dataset> {
        let mut tasks = Vec::new();
        for task in &self.tasks {
            if task.has_split(split)? {
                tasks.push(Arc::clone(task));
            } else {
                info!(task = task.name(), split, "Task has no such split, skipping");
            }
        }
        if tasks.is_empty() {
            return Err(DataError::NoAvailableTasks(split.to_string()));
        }

        let features = self.output_features().to_vec();
        let mut datasets = Vec::with_capacity(tasks.len());
        let mut rates = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let dataset = task.get_dataset(sequence_length, split, use_cached, shuffle)?;
            datasets.push(dataset.repeat().select_features(features.clone()));
            rates.push(self.get_rate(task)?);
        }

        let mixed = Dataset::sample_from(datasets.clone(), rates.clone(), self.config.seed)?;

        if split == TRAIN_SPLIT && use_cached {
            if let Err(e) = log_mixing_proportions(
                &tasks,
                &datasets,
                &rates,
                &mixed,
                &features,
                sequence_length,
                compute_stats_empirically,
                self.config.stats_examples,
            ) {
                warn!(mixture = %self.name, error = %e, "Failed to compute mixing proportions");
            }
        }
        Ok(mixed)
    }
}

impl DatasetProvider for Mixture {
    fn name(&self) -> &str {
        &self.name
    }

    fn vocabulary_source(&self) -> &VocabularySource {
        Self::vocabulary_source(self)
    }

    fn output_features(&self) -> &[String] {
        Self::output_features(self)
    }

    fn get_vocabulary(&self) -> DataResult<Arc<dyn Vocabulary>> {
        Self::get_vocabulary(self)
    }

    fn get_dataset(
        &self,
        sequence_length: &SequenceLength,
        split: &str,
        use_cached: bool,
        shuffle: bool,
    ) -> DataResult<Dataset> {
        Self::get_dataset(self, sequence_length, split, use_cached, shuffle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::loader::DatasetLoaders;
    use crate::task::TaskBuilder;
    use std::path::PathBuf;

    fn registry_with(builders: Vec<TaskBuilder>) -> (TaskRegistry, Arc<DataConfig>) {
        let config = Arc::new(DataConfig::default());
        let loaders = DatasetLoaders::new(Arc::new(LocalBackend::new("/nonexistent")), Arc::clone(&config));
        let registry = TaskRegistry::new("task");
        for builder in builders {
            registry.add(builder.build(&loaders).unwrap()).unwrap();
        }
        (registry, config)
    }

    fn task(name: &str) -> TaskBuilder {
        TaskBuilder::new(name, "toy:1.0.0", VocabularySource::Byte)
    }

    #[test]
    fn test_compatible_tasks_mix() {
        let (registry, config) = registry_with(vec![task("a"), task("b")]);
        let mixture = Mixture::new("ab", [("a", 3.0), ("b", 1.0)], None, &registry, config).unwrap();
        assert_eq!(mixture.get_rate(&mixture.tasks()[0]).unwrap(), 3.0);
        assert_eq!(mixture.output_features(), ["inputs", "targets"]);
    }

    #[test]
    fn test_different_output_features_are_incompatible() {
        let (registry, config) = registry_with(vec![task("a"), task("b").output_features(["targets"])]);
        let result = Mixture::new("ab", ["a", "b"], Some(Rate::from(1.0)), &registry, config);
        assert!(matches!(result, Err(DataError::IncompatibleMixture(_))));
    }

    #[test]
    fn test_different_vocabularies_are_incompatible() {
        let other = TaskBuilder::new("b", "toy:1.0.0", VocabularySource::Tokenizer(PathBuf::from("spm.json")));
        let (registry, config) = registry_with(vec![task("a"), other]);
        let result = Mixture::new("ab", ["a", "b"], Some(Rate::from(1.0)), &registry, config);
        assert!(matches!(result, Err(DataError::IncompatibleMixture(_))));
    }

    #[test]
    fn test_missing_rate_without_default() {
        let (registry, config) = registry_with(vec![task("a"), task("b")]);
        let entries = vec![MixtureEntry::from(("a", 1.0)), MixtureEntry::from("b")];
        let result = Mixture::new("ab", entries, None, &registry, config);
        assert!(matches!(result, Err(DataError::MissingRate(t)) if t == "b"));
    }

    #[test]
    fn test_default_rate_fills_gaps() {
        let (registry, config) = registry_with(vec![task("a"), task("b")]);
        let entries = vec![MixtureEntry::from(("a", 5.0)), MixtureEntry::from("b")];
        let mixture = Mixture::new("ab", entries, Some(Rate::from(2.0)), &registry, config).unwrap();
        assert_eq!(mixture.get_rate(&mixture.tasks()[1]).unwrap(), 2.0);
    }

    #[test]
    fn test_empty_duplicate_and_unknown_entries() {
        let (registry, config) = registry_with(vec![task("a")]);
        let empty: Vec<MixtureEntry> = Vec::new();
        assert!(matches!(
            Mixture::new("none", empty, None, &registry, Arc::clone(&config)),
            Err(DataError::IncompatibleMixture(_))
        ));
        assert!(matches!(
            Mixture::new("twice", [("a", 1.0), ("a", 2.0)], None, &registry, Arc::clone(&config)),
            Err(DataError::IncompatibleMixture(_))
        ));
        assert!(matches!(
            Mixture::new("ghost", [("ghost", 1.0)], None, &registry, config),
            Err(DataError::NotFound(_))
        ));
    }

    #[test]
    fn test_no_task_has_split() {
        let (registry, config) =
            registry_with(vec![task("a").splits(["train"]), task("b").splits(["train", "validation"])]);
        let mixture = Mixture::new("ab", [("a", 1.0), ("b", 1.0)], None, &registry, config).unwrap();
        let lengths = SequenceLength::from([("inputs".to_string(), 4), ("targets".to_string(), 4)]);
        let result = mixture.get_dataset(&lengths, "test", false, false);
        assert!(matches!(result, Err(DataError::NoAvailableTasks(s)) if s == "test"));
    }
}
