//! Name-keyed registries of dataset providers.
//!
//! Both tasks and mixtures are stored behind the same [`DatasetProvider`]
//! capability, so callers can fetch a dataset by name without caring which
//! kind of provider answers.

use crate::dataset::{Dataset, SequenceLength};
use crate::error::{DataError, DataResult};
use crate::mixture::Mixture;
use crate::task::Task;
use crate::vocabulary::{Vocabulary, VocabularySource};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// What a registry entry must offer.
pub trait DatasetProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Locator of the tokenizer model; equal for every mixable provider.
    fn vocabulary_source(&self) -> &VocabularySource;

    /// Sorted output feature names.
    fn output_features(&self) -> &[String];

    fn get_vocabulary(&self) -> DataResult<Arc<dyn Vocabulary>>;

    fn get_dataset(
        &self,
        sequence_length: &SequenceLength,
        split: &str,
        use_cached: bool,
        shuffle: bool,
    ) -> DataResult<Dataset>;
}

/// Write-once registry of providers.
pub struct ProviderRegistry<P> {
    kind: &'static str,
    providers: RwLock<HashMap<String, Arc<P>>>,
}

pub type TaskRegistry = ProviderRegistry<Task>;
pub type MixtureRegistry = ProviderRegistry<Mixture>;

impl<P> fmt::Debug for ProviderRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kind", &self.kind)
            .field("provider_count", &self.providers.read().unwrap_or_else(PoisonError::into_inner).len())
            .finish_non_exhaustive()
    }
}

impl<P: DatasetProvider> ProviderRegistry<P> {
    /// `kind` labels log lines and errors, e.g. "task" or "mixture".
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self { kind, providers: RwLock::new(HashMap::new()) }
    }

    /// Registers `provider` under its own name.
    ///
    /// # Errors
    /// Returns `DuplicateRegistration` if the name is already taken.
    pub fn add(&self, provider: P) -> DataResult<Arc<P>> {
        let name = provider.name().to_string();
        self.add_with(&name, || Ok(provider))
    }

    /// Registers the provider built by `make` under `name`.
    ///
    /// `make` only runs once `name` is known to be free, so a rejected
    /// registration never pays for construction. The constructed provider
    /// must report `name` as its own.
    pub fn add_with<F>(&self, name: &str, make: F) -> DataResult<Arc<P>>
    where
        F: FnOnce() -> DataResult<P>,
    {
        if self.contains(name) {
            return Err(DataError::DuplicateRegistration(format!("{} '{name}'", self.kind)));
        }

        let provider = make()?;
        if provider.name() != name {
            return Err(DataError::Config(format!(
                "{} registered as '{name}' reports name '{}'",
                self.kind,
                provider.name()
            )));
        }

        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(name) {
            return Err(DataError::DuplicateRegistration(format!("{} '{name}'", self.kind)));
        }
        debug!(kind = self.kind, name, "Registering provider");
        let provider = Arc::new(provider);
        providers.insert(name.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// # Errors
    /// Returns `NotFound` for an unknown name.
    pub fn get(&self, name: &str) -> DataResult<Arc<P>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| DataError::NotFound(format!("{} '{name}'", self.kind)))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.providers.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dataset of the provider registered as `name`.
    pub fn get_dataset(
        &self,
        name: &str,
        sequence_length: &SequenceLength,
        split: &str,
        use_cached: bool,
        shuffle: bool,
    ) -> DataResult<Dataset> {
        self.get(name)?.get_dataset(sequence_length, split, use_cached, shuffle)
    }
}
