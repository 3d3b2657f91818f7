//! SeqMix data
//!
//! Named, reproducible training-data pipelines for sequence-to-sequence
//! models:
//! - Tasks: one dataset, text and token preprocessing, trimming to the
//!   requested lengths, and transparent use of pre-tokenized caches
//! - Mixtures: tasks sampled into one infinite stream at relative rates
//! - Registries and a `Catalog` that resolve either by name
//! - Restartable example streams, TFRecord shards, and vocabularies

pub mod backend;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod error;
pub mod loader;
pub mod logging;
pub mod mixture;
pub mod preprocessors;
pub mod rates;
pub mod registry;
pub mod schema;
pub mod stats;
pub mod task;
pub mod tfrecord;
pub mod vocabulary;

pub use backend::LocalBackend;
pub use cache::{CacheLayout, CachedStats, SplitCacheInfo};
pub use catalog::Catalog;
pub use config::DataConfig;
pub use dataset::{DType, Dataset, Example, ExampleIter, Feature, SequenceLength};
pub use error::{DataError, DataResult};
pub use loader::{DatasetBackend, DatasetHandle, DatasetId, DatasetInfo, DatasetLoaders, SplitInfo, SplitSize};
pub use mixture::{Mixture, MixtureEntry};
pub use preprocessors::{encode_string_features, inverse_dataset};
pub use rates::{rate_num_examples, rate_unsupervised, Rate};
pub use registry::{DatasetProvider, MixtureRegistry, ProviderRegistry, TaskRegistry};
pub use schema::{FeatureSchema, FeatureSpec};
pub use stats::{mixing_proportions, TaskMixingStats};
pub use task::{trim_and_append_eos, Task, TaskBuilder, TRAIN_SPLIT};
pub use vocabulary::{ByteVocabulary, HfVocabulary, Vocabulary, VocabularySource, EOS_ID};
