//! Feature schemas used to decode serialized records.

use crate::dataset::{DType, Example, Feature};
use crate::error::{DataError, DataResult};
use crate::tfrecord::proto;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shape and dtype of one serialized feature.
///
/// `shape: []` is a scalar, `shape: [null]` a variable-length sequence, and
/// `shape: [n]` a fixed-length sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    #[serde(default)]
    pub shape: Vec<Option<usize>>,
    pub dtype: DType,
}

pub type FeatureSchema = BTreeMap<String, FeatureSpec>;

impl FeatureSpec {
    #[must_use]
    pub fn scalar(dtype: DType) -> Self {
        Self { shape: Vec::new(), dtype }
    }

    #[must_use]
    pub fn variable(dtype: DType) -> Self {
        Self { shape: vec![None], dtype }
    }

    #[must_use]
    pub fn fixed(dtype: DType, len: usize) -> Self {
        Self { shape: vec![Some(len)], dtype }
    }

    #[must_use]
    pub fn is_variable_length(&self) -> bool {
        self.shape.first().is_some_and(Option::is_none)
    }

    /// Decodes the serialized value of feature `name`; `value` is `None`
    /// when the record does not carry the feature.
    pub fn decode(&self, name: &str, value: Option<&proto::Feature>) -> DataResult<Feature> {
        use proto::feature::Kind;

        if self.shape.len() > 1 {
            return Err(DataError::Decode(format!(
                "feature '{name}' has rank {} but only scalars and flat sequences are supported",
                self.shape.len()
            )));
        }

        let kind = match value.and_then(|f| f.kind.as_ref()) {
            Some(kind) => kind,
            None if self.is_variable_length() => return Ok(empty_sequence(self.dtype)),
            None => return Err(DataError::Decode(format!("feature '{name}' is missing from record"))),
        };

        let decoded = match (self.dtype, kind) {
            (DType::String, Kind::BytesList(list)) => Feature::TextList(
                list.value
                    .iter()
                    .map(|b| {
                        String::from_utf8(b.clone())
                            .map_err(|e| DataError::Decode(format!("feature '{name}' is not utf-8: {e}")))
                    })
                    .collect::<DataResult<_>>()?,
            ),
            (DType::Int64, Kind::Int64List(list)) => Feature::Ints(list.value.clone()),
            (DType::Float32, Kind::FloatList(list)) => Feature::Floats(list.value.clone()),
            (expected, _) => {
                return Err(DataError::Decode(format!("feature '{name}' is not serialized as {expected}")));
            }
        };

        match self.shape.first() {
            None => into_scalar(name, decoded),
            Some(Some(len)) if decoded.len() != *len => Err(DataError::Decode(format!(
                "feature '{name}' expected {len} values, got {}",
                decoded.len()
            ))),
            Some(_) => Ok(decoded),
        }
    }
}

fn empty_sequence(dtype: DType) -> Feature {
    match dtype {
        DType::String => Feature::TextList(Vec::new()),
        DType::Int64 => Feature::Ints(Vec::new()),
        DType::Float32 => Feature::Floats(Vec::new()),
    }
}

fn into_scalar(name: &str, feature: Feature) -> DataResult<Feature> {
    if feature.len() != 1 {
        return Err(DataError::Decode(format!("feature '{name}' expected a scalar, got {} values", feature.len())));
    }
    Ok(match feature {
        Feature::TextList(mut v) => Feature::Text(v.remove(0)),
        Feature::Ints(v) => Feature::Int(v[0]),
        Feature::Floats(v) => Feature::Float(v[0]),
        scalar => scalar,
    })
}

/// Decodes every feature named in `schema`; unlisted features are dropped.
pub fn decode_example(example: &proto::Example, schema: &FeatureSchema) -> DataResult<Example> {
    let serialized = example.features.as_ref().map(|f| &f.feature);
    schema
        .iter()
        .map(|(name, spec)| {
            let value = serialized.and_then(|features| features.get(name));
            Ok((name.clone(), spec.decode(name, value)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tfrecord::example_to_proto;

    #[test]
    fn test_spec_deserializes_null_as_variable_length() {
        let spec: FeatureSpec = serde_json::from_str(r#"{"shape": [null], "dtype": "int64"}"#).unwrap();
        assert!(spec.is_variable_length());
        let spec: FeatureSpec = serde_json::from_str(r#"{"shape": [], "dtype": "string"}"#).unwrap();
        assert!(!spec.is_variable_length());
    }

    #[test]
    fn test_decode_scalar_and_sequences() {
        let ex = Example::from([
            ("text".to_string(), Feature::from("hi")),
            ("ids".to_string(), Feature::Ints(vec![3, 4])),
        ]);
        let proto = example_to_proto(&ex);
        let schema = FeatureSchema::from([
            ("text".to_string(), FeatureSpec::scalar(DType::String)),
            ("ids".to_string(), FeatureSpec::fixed(DType::Int64, 2)),
            ("absent".to_string(), FeatureSpec::variable(DType::Int64)),
        ]);
        let decoded = decode_example(&proto, &schema).unwrap();
        assert_eq!(decoded["text"], Feature::from("hi"));
        assert_eq!(decoded["ids"], Feature::Ints(vec![3, 4]));
        assert_eq!(decoded["absent"], Feature::Ints(vec![]));
    }

    #[test]
    fn test_decode_rejects_wrong_dtype_and_length() {
        let ex = Example::from([("ids".to_string(), Feature::Ints(vec![3, 4]))]);
        let proto = example_to_proto(&ex);

        let schema = FeatureSchema::from([("ids".to_string(), FeatureSpec::variable(DType::String))]);
        assert!(matches!(decode_example(&proto, &schema), Err(DataError::Decode(_))));

        let schema = FeatureSchema::from([("ids".to_string(), FeatureSpec::fixed(DType::Int64, 3))]);
        assert!(matches!(decode_example(&proto, &schema), Err(DataError::Decode(_))));
    }

    #[test]
    fn test_missing_fixed_feature_is_an_error() {
        let proto = example_to_proto(&Example::new());
        let schema = FeatureSchema::from([("x".to_string(), FeatureSpec::scalar(DType::Int64))]);
        assert!(decode_example(&proto, &schema).is_err());
    }
}
