use thiserror::Error;

pub type DataResult<T> = std::result::Result<T, DataError>;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid name '{name}': must match {pattern}")]
    InvalidName { name: String, pattern: String },

    #[error("dataset id must contain a version number (name[/config]:version), got: {0}")]
    InvalidDatasetId(String),

    #[error("attempting to register duplicate provider: {0}")]
    DuplicateRegistration(String),

    #[error("provider name not registered: {0}")]
    NotFound(String),

    #[error("{dataset} has no '{split}' split")]
    InvalidSplit { dataset: String, split: String },

    #[error("feature '{feature}' after {stage}: {detail}")]
    Schema { feature: String, stage: String, detail: String },

    #[error("feature '{feature}' unexpectedly contains EOS=1 token after {stage}")]
    UnexpectedEos { feature: String, stage: String },

    #[error("no sequence length requested for output feature '{0}'")]
    MissingSequenceLength(String),

    #[error("'{0}' does not exist in any of the task cache directories")]
    NotCached(String),

    #[error("stats do not exist for '{task}' split: {split}")]
    MissingStats { task: String, split: String },

    #[error("incompatible mixture: {0}")]
    IncompatibleMixture(String),

    #[error("need a rate for task '{0}' (no default rate given)")]
    MissingRate(String),

    #[error("no tasks have a '{0}' split")]
    NoAvailableTasks(String),

    #[error("invalid sampling weights: {0}")]
    InvalidWeights(String),

    #[error("no shard files found for dataset: {0}")]
    NoShardsFound(String),

    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    #[error("corrupt record in {path}: {detail}")]
    Record { path: String, detail: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Glob(#[from] glob::PatternError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DataError {
    pub(crate) fn schema(feature: &str, stage: &str, detail: impl Into<String>) -> Self {
        Self::Schema { feature: feature.to_string(), stage: stage.to_string(), detail: detail.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_feature_and_stage() {
        let err = DataError::schema("targets", "text preprocessing", "missing");
        let msg = err.to_string();
        assert!(msg.contains("targets"));
        assert!(msg.contains("text preprocessing"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DataError = io_err.into();
        assert!(matches!(err, DataError::Io(_)));
    }
}
