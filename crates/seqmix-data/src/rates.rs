//! Mixing rates.

use crate::error::DataResult;
use crate::task::{Task, TRAIN_SPLIT};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_UNSUPERVISED_RATE: f64 = 1e6;

type RateFn = dyn Fn(&Task) -> DataResult<f64> + Send + Sync;

/// Relative sampling weight of a task inside a mixture.
///
/// Deserializes from `{"type": "fixed", "value": 2.0}`,
/// `{"type": "num_examples", "maximum": 1e5}` and
/// `{"type": "unsupervised"}`. Missing fields take the defaults of
/// [`Rate::num_examples`] and [`Rate::unsupervised`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rate {
    Fixed {
        value: f64,
    },
    NumExamples {
        #[serde(default)]
        maximum: Option<f64>,
        #[serde(default = "one")]
        temperature: f64,
        #[serde(default = "one")]
        scale: f64,
    },
    Unsupervised {
        #[serde(default = "default_unsupervised")]
        value: f64,
    },
    #[serde(skip)]
    Custom(CustomRate),
}

fn one() -> f64 {
    1.0
}

fn default_unsupervised() -> f64 {
    DEFAULT_UNSUPERVISED_RATE
}

/// A named rate function over the task.
#[derive(Clone)]
pub struct CustomRate {
    name: String,
    func: Arc<RateFn>,
}

impl fmt::Debug for CustomRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRate").field("name", &self.name).finish_non_exhaustive()
    }
}

impl CustomRate {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<f64> for Rate {
    fn from(value: f64) -> Self {
        Self::Fixed { value }
    }
}

impl Rate {
    /// Proportional to the cached training size, uncapped and unscaled.
    #[must_use]
    pub fn num_examples() -> Self {
        Self::NumExamples { maximum: None, temperature: 1.0, scale: 1.0 }
    }

    #[must_use]
    pub fn unsupervised() -> Self {
        Self::Unsupervised { value: DEFAULT_UNSUPERVISED_RATE }
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Task) -> DataResult<f64> + Send + Sync + 'static,
    {
        Self::Custom(CustomRate { name: name.into(), func: Arc::new(func) })
    }

    pub fn evaluate(&self, task: &Task) -> DataResult<f64> {
        match self {
            Self::Fixed { value } => Ok(*value),
            Self::NumExamples { maximum, temperature, scale } => {
                rate_num_examples(task, *maximum, *temperature, *scale)
            }
            Self::Unsupervised { value } => Ok(rate_unsupervised(task, *value)),
            Self::Custom(custom) => (custom.func)(task),
        }
    }
}

/// `(examples * scale).min(maximum) ^ (1 / temperature)`, over the task's
/// cached training split.
pub fn rate_num_examples(task: &Task, maximum: Option<f64>, temperature: f64, scale: f64) -> DataResult<f64> {
    let mut rate = task.get_cached_stats(TRAIN_SPLIT)?.examples as f64 * scale;
    if let Some(maximum) = maximum {
        rate = rate.min(maximum);
    }
    if (temperature - 1.0).abs() > f64::EPSILON {
        rate = rate.powf(1.0 / temperature);
    }
    Ok(rate)
}

/// Constant weight for auxiliary objectives.
#[must_use]
pub fn rate_unsupervised(_task: &Task, value: f64) -> f64 {
    value
}
