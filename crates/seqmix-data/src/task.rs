//! Tasks: one dataset plus the pipeline that turns its raw text into
//! trimmed, EOS-terminated token sequences.
//!
//! Retrieval runs `raw -> text preprocessing -> tokenization -> token
//! preprocessing -> trim + EOS -> (shuffle)`, or starts from pre-tokenized
//! cache shards when the task has a completed cache directory.

use crate::cache::{find_cache_dir, CacheLayout, CachedStats};
use crate::config::DataConfig;
use crate::dataset::{DType, Dataset, Example, Feature, SequenceLength};
use crate::error::{DataError, DataResult};
use crate::loader::{DatasetHandle, DatasetLoaders};
use crate::preprocessors::encode_string_features;
use crate::registry::DatasetProvider;
use crate::tfrecord::read_shard;
use crate::vocabulary::{Vocabulary, VocabularySource, EOS_ID};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

pub const TRAIN_SPLIT: &str = "train";
pub const DEFAULT_OUTPUT_FEATURES: [&str; 2] = ["inputs", "targets"];

const TEXT_STAGE: &str = "text preprocessing";
const TOKEN_STAGE: &str = "token preprocessing";

pub(crate) const VALID_NAME_PATTERN: &str = r"^[A-Za-z0-9_.]+$";

static VALID_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(VALID_NAME_PATTERN).expect("VALID_NAME_PATTERN is a valid regex"));

/// Stage applied to string-valued examples before tokenization.
pub type TextPreprocessor = Arc<dyn Fn(Dataset) -> Dataset + Send + Sync>;

/// Stage applied to tokenized examples, given the requested lengths and the
/// task's vocabulary.
pub type TokenPreprocessor = Arc<dyn Fn(Dataset, &SequenceLength, Arc<dyn Vocabulary>) -> Dataset + Send + Sync>;

/// Turns a decoded model output into the string the metrics compare.
pub type PostprocessFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// `(targets, predictions) -> named scores`.
pub type MetricFn = Arc<dyn Fn(&[String], &[String]) -> BTreeMap<String, f64> + Send + Sync>;

pub fn validate_name(name: &str) -> DataResult<()> {
    if VALID_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(DataError::InvalidName { name: name.to_string(), pattern: VALID_NAME_PATTERN.to_string() })
    }
}

/// Constructor arguments for a [`Task`].
pub struct TaskBuilder {
    name: String,
    dataset_id: String,
    data_dir: Option<PathBuf>,
    vocabulary: VocabularySource,
    text_preprocessors: Vec<TextPreprocessor>,
    token_preprocessors: Vec<TokenPreprocessor>,
    metric_fns: Vec<MetricFn>,
    postprocess_fn: Option<PostprocessFn>,
    output_features: Vec<String>,
    splits: Option<Vec<String>>,
}

impl TaskBuilder {
    /// `dataset_id` is `name[/config]:version`.
    pub fn new(name: impl Into<String>, dataset_id: impl Into<String>, vocabulary: VocabularySource) -> Self {
        Self {
            name: name.into(),
            dataset_id: dataset_id.into(),
            data_dir: None,
            vocabulary,
            text_preprocessors: Vec::new(),
            token_preprocessors: Vec::new(),
            metric_fns: Vec::new(),
            postprocess_fn: None,
            output_features: Vec::new(),
            splits: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn text_preprocessor<F>(mut self, f: F) -> Self
    where
        F: Fn(Dataset) -> Dataset + Send + Sync + 'static,
    {
        self.text_preprocessors.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn token_preprocessor<F>(mut self, f: F) -> Self
    where
        F: Fn(Dataset, &SequenceLength, Arc<dyn Vocabulary>) -> Dataset + Send + Sync + 'static,
    {
        self.token_preprocessors.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn metric_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[String], &[String]) -> BTreeMap<String, f64> + Send + Sync + 'static,
    {
        self.metric_fns.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn postprocess_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.postprocess_fn = Some(Arc::new(f));
        self
    }

    /// Defaults to `inputs` and `targets` when never set or set empty.
    #[must_use]
    pub fn output_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts the splits the task offers; defaults to every split the
    /// dataset reports.
    #[must_use]
    pub fn splits<I, S>(mut self, splits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.splits = Some(splits.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self, loaders: &DatasetLoaders) -> DataResult<Task> {
        validate_name(&self.name)?;
        let dataset = loaders.get(&self.dataset_id, self.data_dir.as_deref())?;

        let output_features: BTreeSet<String> = if self.output_features.is_empty() {
            DEFAULT_OUTPUT_FEATURES.iter().map(|f| (*f).to_string()).collect()
        } else {
            self.output_features.into_iter().collect()
        };

        Ok(Task {
            name: self.name,
            dataset,
            vocabulary: self.vocabulary,
            text_preprocessors: self.text_preprocessors,
            token_preprocessors: self.token_preprocessors,
            metric_fns: self.metric_fns,
            postprocess_fn: self.postprocess_fn,
            output_features: output_features.into_iter().collect(),
            splits: self.splits,
            config: Arc::clone(loaders.config()),
            cache: OnceCell::new(),
            stats: RwLock::default(),
        })
    }
}

/// A named, tokenized pipeline over one dataset.
pub struct Task {
    name: String,
    dataset: Arc<DatasetHandle>,
    vocabulary: VocabularySource,
    text_preprocessors: Vec<TextPreprocessor>,
    token_preprocessors: Vec<TokenPreprocessor>,
    metric_fns: Vec<MetricFn>,
    postprocess_fn: Option<PostprocessFn>,
    /// Sorted and deduplicated.
    output_features: Vec<String>,
    splits: Option<Vec<String>>,
    config: Arc<DataConfig>,
    cache: OnceCell<CacheLayout>,
    stats: RwLock<HashMap<String, Arc<CachedStats>>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dataset", &self.dataset.id().to_string())
            .field("vocabulary", &self.vocabulary)
            .field("output_features", &self.output_features)
            .field("text_preprocessors", &self.text_preprocessors.len())
            .field("token_preprocessors", &self.token_preprocessors.len())
            .field("cache_dir", &self.cache.get().map(CacheLayout::dir))
            .finish_non_exhaustive()
    }
}

impl Task {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dataset(&self) -> &Arc<DatasetHandle> {
        &self.dataset
    }

    #[must_use]
    pub fn vocabulary_source(&self) -> &VocabularySource {
        &self.vocabulary
    }

    #[must_use]
    pub fn output_features(&self) -> &[String] {
        &self.output_features
    }

    #[must_use]
    pub fn token_preprocessors(&self) -> &[TokenPreprocessor] {
        &self.token_preprocessors
    }

    #[must_use]
    pub fn metric_fns(&self) -> &[MetricFn] {
        &self.metric_fns
    }

    /// Applies the postprocess function, or returns `output` unchanged.
    #[must_use]
    pub fn postprocess(&self, output: &str) -> String {
        self.postprocess_fn.as_ref().map_or_else(|| output.to_string(), |f| f(output))
    }

    /// Runs every metric over postprocessed targets and predictions.
    #[must_use]
    pub fn evaluate(&self, targets: &[String], predictions: &[String]) -> BTreeMap<String, f64> {
        let targets: Vec<String> = targets.iter().map(|t| self.postprocess(t)).collect();
        let predictions: Vec<String> = predictions.iter().map(|p| self.postprocess(p)).collect();
        self.metric_fns.iter().flat_map(|metric| metric(&targets, &predictions)).collect()
    }

    /// Splits this task offers.
    pub fn splits(&self) -> DataResult<Vec<String>> {
        match &self.splits {
            Some(splits) => Ok(splits.clone()),
            None => self.dataset.splits(),
        }
    }

    pub fn has_split(&self, split: &str) -> DataResult<bool> {
        Ok(self.splits()?.iter().any(|s| s == split))
    }

    /// Builds a vocabulary from the task's source. Not memoized.
    pub fn get_vocabulary(&self) -> DataResult<Arc<dyn Vocabulary>> {
        self.vocabulary.load()
    }

    /// Runs the text stage and checks that every output feature is a
    /// string scalar afterwards.
    #[must_use]
    pub fn preprocess_text(&self, dataset: Dataset) -> Dataset {
        let dataset = self.text_preprocessors.iter().fold(dataset, |ds, prep| prep(ds));
        let features = Arc::new(self.output_features.clone());
        dataset.try_map(move |ex| {
            validate_example(&ex, &features, DType::String, 0, TEXT_STAGE)?;
            Ok(ex)
        })
    }

    /// Runs the token stage, checks every output feature is a flat int
    /// sequence free of premature EOS, then trims it to
    /// `sequence_length[feature] - 1` tokens and appends EOS.
    pub fn preprocess_tokens(&self, dataset: Dataset, sequence_length: &SequenceLength) -> DataResult<Dataset> {
        let mut lengths = BTreeMap::new();
        for feature in &self.output_features {
            let len = *sequence_length
                .get(feature)
                .ok_or_else(|| DataError::MissingSequenceLength(feature.clone()))?;
            if len == 0 {
                return Err(DataError::schema(feature, TOKEN_STAGE, "sequence length must be at least 1"));
            }
            lengths.insert(feature.clone(), len);
        }

        let vocabulary = self.get_vocabulary()?;
        let dataset = self
            .token_preprocessors
            .iter()
            .fold(dataset, |ds, prep| prep(ds, sequence_length, Arc::clone(&vocabulary)));

        let features = Arc::new(self.output_features.clone());
        Ok(dataset.try_map(move |mut ex| {
            validate_example(&ex, &features, DType::Int64, 1, TOKEN_STAGE)?;
            for feature in features.iter() {
                if let Some(Feature::Ints(tokens)) = ex.get_mut(feature) {
                    ensure_no_premature_eos(feature, tokens, TOKEN_STAGE)?;
                    trim_and_append_eos(tokens, lengths[feature]);
                }
            }
            Ok(ex)
        }))
    }

    /// Looks for a completed cache directory. Idempotent once one is found;
    /// a miss is logged and retried on the next call.
    pub fn initialize(&self) {
        if self.cache.get().is_some() {
            return;
        }
        if let Some(layout) = find_cache_dir(&self.config.cache_dirs, &self.name) {
            let _ = self.cache.set(layout);
        }
    }

    pub fn cached(&self) -> bool {
        self.initialize();
        self.cache.get().is_some()
    }

    fn cache_layout(&self) -> DataResult<&CacheLayout> {
        self.initialize();
        self.cache.get().ok_or_else(|| DataError::NotCached(self.name.clone()))
    }

    pub fn cache_dir(&self) -> DataResult<&Path> {
        self.cache_layout().map(CacheLayout::dir)
    }

    /// Statistics sidecar of a cached split, loaded once per split.
    pub fn get_cached_stats(&self, split: &str) -> DataResult<Arc<CachedStats>> {
        let layout = self.cache_layout()?;
        if let Some(stats) = self.stats.read().unwrap_or_else(PoisonError::into_inner).get(split) {
            return Ok(Arc::clone(stats));
        }

        let stats = layout
            .read_stats(split)?
            .ok_or_else(|| DataError::MissingStats { task: self.name.clone(), split: split.to_string() })?;
        debug!(task = %self.name, split, examples = stats.examples, "Loaded cached stats");
        let stats = Arc::new(stats);
        let mut memo = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(memo.entry(split.to_string()).or_insert(stats)))
    }

    /// The task's example stream, shuffled with the configured buffer size.
    pub fn get_dataset(
        &self,
        sequence_length: &SequenceLength,
        split: &str,
        use_cached: bool,
        shuffle: bool,
    ) -> DataResult<Dataset> {
        self.get_dataset_with_buffer(sequence_length, split, use_cached, shuffle, self.config.shuffle_buffer_size)
    }

    pub fn get_dataset_with_buffer(
        &self,
        sequence_length: &SequenceLength,
        split: &str,
        use_cached: bool,
        shuffle: bool,
        shuffle_buffer_size: usize,
    ) -> DataResult<Dataset> {
        let dataset = if use_cached {
            self.get_cached_dataset(split, shuffle)?
        } else {
            let raw = self.dataset.stream(split, shuffle)?;
            let text = self.preprocess_text(raw);
            encode_string_features(text, self.get_vocabulary()?, &self.output_features, true)
        };

        let dataset = self.preprocess_tokens(dataset, sequence_length)?;

        // Token preprocessors may turn one input into several correlated
        // outputs, so shuffle here rather than relying on upstream order.
        Ok(if shuffle { dataset.shuffle(shuffle_buffer_size, self.config.seed) } else { dataset })
    }

    fn get_cached_dataset(&self, split: &str, shuffle: bool) -> DataResult<Dataset> {
        let layout = self.cache_layout()?;
        let split_info = layout.read_split_info(split)?;
        let files = layout.shard_files(split, split_info.num_shards)?;
        if files.is_empty() {
            error!(task = %self.name, split, cache_dir = %layout.dir().display(), "No cached shard files found");
            return Err(DataError::NoShardsFound(format!("{} ({split}, cached)", self.name)));
        }

        let schema = Arc::new(split_info.features);
        let shards = files.into_iter().map(|path| read_shard(path, Arc::clone(&schema))).collect();
        let dataset = Dataset::interleave_shuffled(
            shards,
            shuffle,
            self.config.seed,
            self.config.interleave_cycle_length,
            self.config.interleave_block_length,
        );

        if self.get_cached_stats(split)?.examples <= self.config.max_examples_to_mem_cache {
            debug!(task = %self.name, split, "Holding cached split in memory");
            Ok(dataset.cache())
        } else {
            Ok(dataset)
        }
    }
}

impl DatasetProvider for Task {
    fn name(&self) -> &str {
        &self.name
    }

    fn vocabulary_source(&self) -> &VocabularySource {
        &self.vocabulary
    }

    fn output_features(&self) -> &[String] {
        &self.output_features
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

fn validate_example(
    example: &Example,
    output_features: &[String],
    dtype: DType,
    rank: usize,
    stage: &str,
) -> DataResult<()> {
    for feature in output_features {
        let value = example
            .get(feature)
            .ok_or_else(|| DataError::schema(feature, stage, "missing expected output feature"))?;
        if value.dtype() != dtype {
            return Err(DataError::schema(
                feature,
                stage,
                format!("incorrect type: got {}, expected {dtype}", value.dtype()),
            ));
        }
        if value.rank() != rank {
            return Err(DataError::schema(
                feature,
                stage,
                format!("incorrect rank: got {}, expected {rank}", value.rank()),
            ));
        }
    }
    Ok(())
}

/// EOS may only appear as the very last token.
fn ensure_no_premature_eos(feature: &str, tokens: &[i64], stage: &str) -> DataResult<()> {
    let body = tokens.strip_suffix(&[EOS_ID]).unwrap_or(tokens);
    if body.contains(&EOS_ID) {
        return Err(DataError::UnexpectedEos { feature: feature.to_string(), stage: stage.to_string() });
    }
    Ok(())
}

/// Truncates to `max_len - 1` tokens and appends EOS. A sequence already
/// ending in EOS is not terminated twice.
pub fn trim_and_append_eos(tokens: &mut Vec<i64>, max_len: usize) {
    if tokens.last() == Some(&EOS_ID) {
        tokens.pop();
    }
    tokens.truncate(max_len.saturating_sub(1));
    tokens.push(EOS_ID);
}
