//! Reusable dataset stages.

use crate::dataset::{Dataset, Example, Feature};
use crate::error::DataError;
use crate::vocabulary::Vocabulary;
use std::collections::BTreeSet;
use std::sync::Arc;

const INVERSE_STAGE: &str = "inverse_dataset";

/// Tokenizes the string scalars named in `keys`. Other features pass
/// through. With `copy_plaintext`, the original string is also kept under
/// `<key>_plaintext`.
pub fn encode_string_features(
    dataset: Dataset,
    vocabulary: Arc<dyn Vocabulary>,
    keys: &[String],
    copy_plaintext: bool,
) -> Dataset {
    let keys: Arc<BTreeSet<String>> = Arc::new(keys.iter().cloned().collect());
    dataset.try_map(move |example| {
        let mut encoded = Example::new();
        for (key, value) in example {
            match value {
                Feature::Text(text) if keys.contains(&key) => {
                    let ids = vocabulary.encode(&text)?;
                    if copy_plaintext {
                        encoded.insert(format!("{key}_plaintext"), Feature::Text(text));
                    }
                    encoded.insert(key, Feature::Ints(ids));
                }
                other => {
                    encoded.insert(key, other);
                }
            }
        }
        Ok(encoded)
    })
}

/// Turns each example into its inverse: `label` joined onto the old
/// `targets` becomes `inputs`, and the old `inputs` become `targets`.
/// Every other feature is dropped.
pub fn inverse_dataset(dataset: Dataset, label: impl Into<String>) -> Dataset {
    let label = label.into();
    dataset.try_map(move |mut example| {
        let inputs = example.remove("inputs").ok_or_else(|| DataError::schema("inputs", INVERSE_STAGE, "missing"))?;
        let targets = match example.remove("targets") {
            Some(Feature::Text(text)) => format!("{label}{text}"),
            Some(other) => {
                return Err(DataError::schema(
                    "targets",
                    INVERSE_STAGE,
                    format!("expected a string scalar, got {:?} of rank {}", other.dtype(), other.rank()),
                ));
            }
            None => return Err(DataError::schema("targets", INVERSE_STAGE, "missing")),
        };
        Ok(Example::from([
            ("inputs".to_string(), Feature::Text(targets)),
            ("targets".to_string(), inputs),
        ]))
    })
}
