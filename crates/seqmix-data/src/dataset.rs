//! Lazy, restartable example streams.
//!
//! A [`Dataset`] is a description of a stream rather than the stream itself:
//! every call to [`Dataset::iter`] starts a fresh pass from the beginning.
//! Combinators wrap the description, so nothing is read until a consumer
//! pulls from an iterator.

use crate::error::{DataError, DataResult};
use once_cell::sync::OnceCell;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Element type of a feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    String,
    #[serde(alias = "int32")]
    Int64,
    #[serde(alias = "float")]
    Float32,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
        };
        f.write_str(name)
    }
}

/// A single feature value: a scalar or a flat (rank-1) sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Feature {
    Text(String),
    Int(i64),
    Float(f32),
    TextList(Vec<String>),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

impl Feature {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Text(_) | Self::TextList(_) => DType::String,
            Self::Int(_) | Self::Ints(_) => DType::Int64,
            Self::Float(_) | Self::Floats(_) => DType::Float32,
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Self::Text(_) | Self::Int(_) | Self::Float(_) => 0,
            Self::TextList(_) | Self::Ints(_) | Self::Floats(_) => 1,
        }
    }

    /// Number of elements; scalars count as one.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(_) | Self::Int(_) | Self::Float(_) => 1,
            Self::TextList(v) => v.len(),
            Self::Ints(v) => v.len(),
            Self::Floats(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Self::Ints(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Feature {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Feature {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<i64>> for Feature {
    fn from(value: Vec<i64>) -> Self {
        Self::Ints(value)
    }
}

/// One example: feature name to value.
pub type Example = BTreeMap<String, Feature>;

/// Requested maximum length per output feature.
pub type SequenceLength = BTreeMap<String, usize>;

pub type ExampleIter = Box<dyn Iterator<Item = DataResult<Example>> + Send>;

type Source = dyn Fn() -> ExampleIter + Send + Sync;

/// A restartable stream of examples.
#[derive(Clone)]
pub struct Dataset {
    source: Arc<Source>,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset").finish_non_exhaustive()
    }
}

impl Dataset {
    pub fn from_fn<F>(make: F) -> Self
    where
        F: Fn() -> ExampleIter + Send + Sync + 'static,
    {
        Self { source: Arc::new(make) }
    }

    #[must_use]
    pub fn from_examples(examples: Vec<Example>) -> Self {
        let examples = Arc::new(examples);
        Self::from_fn(move || replay(Arc::clone(&examples)))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_fn(|| Box::new(std::iter::empty()))
    }

    /// Starts a new pass over the stream.
    #[must_use]
    pub fn iter(&self) -> ExampleIter {
        (self.source)()
    }

    #[must_use]
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(Example) -> Example + Send + Sync + 'static,
    {
        self.try_map(move |ex| Ok(f(ex)))
    }

    #[must_use]
    pub fn try_map<F>(self, f: F) -> Self
    where
        F: Fn(Example) -> DataResult<Example> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move || {
            let f = Arc::clone(&f);
            Box::new(self.iter().map(move |item| item.and_then(|ex| f(ex))))
        })
    }

    /// Maps each example to zero or more examples.
    #[must_use]
    pub fn flat_map<F>(self, f: F) -> Self
    where
        F: Fn(Example) -> DataResult<Vec<Example>> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move || {
            let f = Arc::clone(&f);
            Box::new(self.iter().flat_map(move |item| match item.and_then(|ex| f(ex)) {
                Ok(examples) => examples.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }))
        })
    }

    /// Keeps examples matching `predicate`; errors always pass through.
    #[must_use]
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&Example) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Self::from_fn(move || {
            let predicate = Arc::clone(&predicate);
            Box::new(self.iter().filter(move |item| item.as_ref().map_or(true, |ex| predicate(ex))))
        })
    }

    #[must_use]
    pub fn take(self, n: usize) -> Self {
        Self::from_fn(move || Box::new(self.iter().take(n)))
    }

    /// Drops every feature not named in `keep`.
    #[must_use]
    pub fn select_features(self, keep: Vec<String>) -> Self {
        self.map(move |mut ex| {
            ex.retain(|k, _| keep.contains(k));
            ex
        })
    }

    /// Restarts the stream each time it ends.
    ///
    /// A pass that yields nothing ends the repetition, and the stream stops
    /// after yielding an error.
    #[must_use]
    pub fn repeat(self) -> Self {
        Self::from_fn(move || {
            Box::new(Repeat { current: self.iter(), dataset: self.clone(), yielded_in_pass: false, done: false })
        })
    }

    /// Bounded-buffer shuffle. With a seed, the first pass uses `seed` and
    /// every later pass a seed derived from it, so each pass is reproducible
    /// but ordered differently.
    #[must_use]
    pub fn shuffle(self, buffer_size: usize, seed: Option<u64>) -> Self {
        let capacity = buffer_size.max(1);
        let seeds = PassSeeds::new(seed);
        Self::from_fn(move || {
            Box::new(Shuffle {
                inner: self.iter(),
                buffer: Vec::with_capacity(capacity),
                capacity,
                rng: seeds.next_rng(),
                exhausted: false,
            })
        })
    }

    /// Materializes the whole stream in memory on the first pass and replays
    /// it on later passes. A pass that fails is not cached.
    #[must_use]
    pub fn cache(self) -> Self {
        let memo: Arc<OnceCell<Arc<Vec<Example>>>> = Arc::new(OnceCell::new());
        Self::from_fn(move || {
            if let Some(examples) = memo.get() {
                return replay(Arc::clone(examples));
            }
            let mut collected = Vec::new();
            for item in self.iter() {
                match item {
                    Ok(ex) => collected.push(ex),
                    Err(e) => return Box::new(std::iter::once(Err(e))),
                }
            }
            replay(Arc::clone(memo.get_or_init(|| Arc::new(collected))))
        })
    }

    /// Round-robin over up to `cycle_length` sources at a time, pulling
    /// `block_length` consecutive examples from each before moving on.
    #[must_use]
    pub fn interleave(sources: Vec<Self>, cycle_length: usize, block_length: usize) -> Self {
        let sources = Arc::new(sources);
        let cycle_length = cycle_length.max(1);
        let block_length = block_length.max(1);
        Self::from_fn(move || {
            let sources = Arc::clone(&sources);
            let opened = cycle_length.min(sources.len());
            let active = sources[..opened].iter().map(Self::iter).collect();
            Box::new(Interleave { sources, next_source: opened, active, slot: 0, taken_in_block: 0, block_length })
        })
    }

    /// Plays `sources` back to back.
    #[must_use]
    pub fn concatenate(sources: Vec<Self>) -> Self {
        Self::interleave(sources, 1, 1)
    }

    /// Like [`Dataset::interleave`], but when `shuffle` is set the source
    /// order is reshuffled at the start of every pass, seeded as in
    /// [`Dataset::shuffle`].
    #[must_use]
    pub fn interleave_shuffled(
        sources: Vec<Self>,
        shuffle: bool,
        seed: Option<u64>,
        cycle_length: usize,
        block_length: usize,
    ) -> Self {
        if !shuffle {
            return Self::interleave(sources, cycle_length, block_length);
        }
        let sources = Arc::new(sources);
        let seeds = PassSeeds::new(seed);
        Self::from_fn(move || {
            let mut order = sources.as_ref().clone();
            order.shuffle(&mut seeds.next_rng());
            Self::interleave(order, cycle_length, block_length).iter()
        })
    }

    /// Draws each example from one of `datasets`, chosen with probability
    /// proportional to its weight. Exhausted inputs drop out of the draw.
    pub fn sample_from(datasets: Vec<Self>, weights: Vec<f64>, seed: Option<u64>) -> DataResult<Self> {
        if datasets.len() != weights.len() {
            return Err(DataError::InvalidWeights(format!(
                "{} datasets but {} weights",
                datasets.len(),
                weights.len()
            )));
        }
        WeightedIndex::new(&weights).map_err(|e| DataError::InvalidWeights(e.to_string()))?;

        let datasets = Arc::new(datasets);
        Ok(Self::from_fn(move || {
            let inputs = datasets.iter().map(Self::iter).collect();
            Box::new(Sample {
                inputs,
                weights: weights.clone(),
                dist: WeightedIndex::new(&weights).ok(),
                rng: make_rng(seed),
            })
        }))
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

/// Per-pass seeds shared by every clone of one dataset description.
struct PassSeeds {
    seed: Option<u64>,
    passes: Arc<AtomicU64>,
}

impl PassSeeds {
    fn new(seed: Option<u64>) -> Self {
        Self { seed, passes: Arc::new(AtomicU64::new(0)) }
    }

    fn next_rng(&self) -> StdRng {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        make_rng(self.seed.map(|seed| seed.wrapping_add(pass)))
    }
}

fn replay(examples: Arc<Vec<Example>>) -> ExampleIter {
    Box::new((0..examples.len()).map(move |i| Ok(examples[i].clone())))
}

struct Repeat {
    dataset: Dataset,
    current: ExampleIter,
    yielded_in_pass: bool,
    done: bool,
}

impl Iterator for Repeat {
    type Item = DataResult<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.current.next() {
                Some(Ok(ex)) => {
                    self.yielded_in_pass = true;
                    return Some(Ok(ex));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None if !self.yielded_in_pass => {
                    self.done = true;
                    return None;
                }
                None => {
                    self.yielded_in_pass = false;
                    self.current = self.dataset.iter();
                }
            }
        }
    }
}

struct Shuffle {
    inner: ExampleIter,
    buffer: Vec<Example>,
    capacity: usize,
    rng: StdRng,
    exhausted: bool,
}

impl Iterator for Shuffle {
    type Item = DataResult<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.exhausted && self.buffer.len() < self.capacity {
            match self.inner.next() {
                Some(Ok(ex)) => self.buffer.push(ex),
                Some(Err(e)) => return Some(Err(e)),
                None => self.exhausted = true,
            }
        }
        if self.buffer.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.buffer.len());
        Some(Ok(self.buffer.swap_remove(idx)))
    }
}

struct Interleave {
    sources: Arc<Vec<Dataset>>,
    next_source: usize,
    active: Vec<ExampleIter>,
    slot: usize,
    taken_in_block: usize,
    block_length: usize,
}

impl Iterator for Interleave {
    type Item = DataResult<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.active.is_empty() {
                return None;
            }
            if self.slot >= self.active.len() {
                self.slot = 0;
            }
            if let Some(item) = self.active[self.slot].next() {
                self.taken_in_block += 1;
                if self.taken_in_block >= self.block_length {
                    self.taken_in_block = 0;
                    self.slot += 1;
                }
                return Some(item);
            }
            // Exhausted: the next unopened source takes over this slot.
            self.taken_in_block = 0;
            if self.next_source < self.sources.len() {
                self.active[self.slot] = self.sources[self.next_source].iter();
                self.next_source += 1;
            } else {
                drop(self.active.remove(self.slot));
            }
        }
    }
}

struct Sample {
    inputs: Vec<ExampleIter>,
    weights: Vec<f64>,
    dist: Option<WeightedIndex<f64>>,
    rng: StdRng,
}

impl Iterator for Sample {
    type Item = DataResult<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let idx = self.dist.as_ref()?.sample(&mut self.rng);
            if let Some(item) = self.inputs[idx].next() {
                return Some(item);
            }
            self.weights[idx] = 0.0;
            self.dist = WeightedIndex::new(&self.weights).ok();
        }
    }
}
