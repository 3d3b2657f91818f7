use crate::config::DataConfig;
use crate::dataset::{Dataset, SequenceLength};
use crate::error::DataResult;
use crate::loader::{DatasetBackend, DatasetLoaders};
use crate::mixture::{Mixture, MixtureEntry};
use crate::rates::Rate;
use crate::registry::{MixtureRegistry, TaskRegistry};
use crate::task::{Task, TaskBuilder};
use std::sync::Arc;

/// Everything a training job needs to resolve datasets by name: the
/// configuration, the shared dataset handles, and the task and mixture
/// registries.
#[derive(Debug)]
pub struct Catalog {
    config: Arc<DataConfig>,
    loaders: DatasetLoaders,
    tasks: TaskRegistry,
    mixtures: MixtureRegistry,
}

impl Catalog {
    pub fn new(config: DataConfig, backend: Arc<dyn DatasetBackend>) -> Self {
        let config = Arc::new(config);
        Self {
            loaders: DatasetLoaders::new(backend, Arc::clone(&config)),
            config,
            tasks: TaskRegistry::new("task"),
            mixtures: MixtureRegistry::new("mixture"),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<DataConfig> {
        &self.config
    }

    #[must_use]
    pub fn loaders(&self) -> &DatasetLoaders {
        &self.loaders
    }

    #[must_use]
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    #[must_use]
    pub fn mixtures(&self) -> &MixtureRegistry {
        &self.mixtures
    }

    /// Builds and registers a task.
    pub fn add_task(&self, builder: TaskBuilder) -> DataResult<Arc<Task>> {
        let name = builder.name().to_string();
        self.tasks.add_with(&name, || builder.build(&self.loaders))
    }

    /// Builds and registers a mixture over already registered tasks.
    pub fn add_mixture<I, E>(&self, name: &str, entries: I, default_rate: Option<Rate>) -> DataResult<Arc<Mixture>>
    where
        I: IntoIterator<Item = E>,
        E: Into<MixtureEntry>,
    {
        self.mixtures
            .add_with(name, || Mixture::new(name, entries, default_rate, &self.tasks, Arc::clone(&self.config)))
    }

    pub fn get_task(&self, name: &str) -> DataResult<Arc<Task>> {
        self.tasks.get(name)
    }

    pub fn get_mixture(&self, name: &str) -> DataResult<Arc<Mixture>> {
        self.mixtures.get(name)
    }

    /// Dataset of the task or mixture called `name`; tasks are looked up
    /// first.
    pub fn get_dataset(
        &self,
        name: &str,
        sequence_length: &SequenceLength,
        split: &str,
        use_cached: bool,
        shuffle: bool,
    ) -> DataResult<Dataset> {
        if self.tasks.contains(name) {
            self.tasks.get_dataset(name, sequence_length, split, use_cached, shuffle)
        } else {
            self.mixtures.get_dataset(name, sequence_length, split, use_cached, shuffle)
        }
    }
}
