//! Vocabularies map text to token ids and back.
//!
//! Id `1` is reserved program-wide as end-of-sequence.

use crate::error::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;

pub const PAD_ID: i64 = 0;
pub const EOS_ID: i64 = 1;
pub const UNK_ID: i64 = 2;

pub trait Vocabulary: Send + Sync + fmt::Debug {
    fn encode(&self, text: &str) -> DataResult<Vec<i64>>;

    fn decode(&self, ids: &[i64]) -> DataResult<String>;

    fn vocab_size(&self) -> usize;

    fn eos_id(&self) -> i64 {
        EOS_ID
    }
}

/// Where a vocabulary comes from. Two tasks are tokenizer-compatible exactly
/// when their sources are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "path", rename_all = "snake_case")]
pub enum VocabularySource {
    /// A HuggingFace `tokenizer.json` file.
    Tokenizer(PathBuf),
    /// Raw UTF-8 bytes, see [`ByteVocabulary`].
    Byte,
}

impl VocabularySource {
    pub fn load(&self) -> DataResult<Arc<dyn Vocabulary>> {
        match self {
            Self::Tokenizer(path) => Ok(Arc::new(HfVocabulary::from_file(path)?)),
            Self::Byte => Ok(Arc::new(ByteVocabulary)),
        }
    }
}

impl fmt::Display for VocabularySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tokenizer(path) => write!(f, "{}", path.display()),
            Self::Byte => f.write_str("<bytes>"),
        }
    }
}

/// Wrapper around a HuggingFace tokenizer.
pub struct HfVocabulary {
    tokenizer: Tokenizer,
    path: PathBuf,
}

impl fmt::Debug for HfVocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HfVocabulary").field("path", &self.path).finish_non_exhaustive()
    }
}

impl HfVocabulary {
    pub fn from_file(path: &Path) -> DataResult<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| DataError::Vocabulary(format!("failed to load tokenizer {}: {e}", path.display())))?;
        Ok(Self { tokenizer, path: path.to_path_buf() })
    }
}

impl Vocabulary for HfVocabulary {
    fn encode(&self, text: &str) -> DataResult<Vec<i64>> {
        let encoding =
            self.tokenizer.encode(text, false).map_err(|e| DataError::Vocabulary(format!("encode failed: {e}")))?;
        Ok(encoding.get_ids().iter().map(|&id| i64::from(id)).collect())
    }

    fn decode(&self, ids: &[i64]) -> DataResult<String> {
        let ids = ids
            .iter()
            .map(|&id| u32::try_from(id).map_err(|_| DataError::Vocabulary(format!("token id out of range: {id}"))))
            .collect::<DataResult<Vec<u32>>>()?;
        self.tokenizer.decode(&ids, true).map_err(|e| DataError::Vocabulary(format!("decode failed: {e}")))
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

/// Byte-level vocabulary: each UTF-8 byte `b` maps to id `b + 3`, leaving
/// 0, 1 and 2 for padding, EOS and unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteVocabulary;

const BYTE_OFFSET: i64 = 3;

impl Vocabulary for ByteVocabulary {
    fn encode(&self, text: &str) -> DataResult<Vec<i64>> {
        Ok(text.bytes().map(|b| i64::from(b) + BYTE_OFFSET).collect())
    }

    fn decode(&self, ids: &[i64]) -> DataResult<String> {
        let bytes: Vec<u8> = ids
            .iter()
            .take_while(|&&id| id != EOS_ID)
            .filter_map(|&id| u8::try_from(id - BYTE_OFFSET).ok())
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn vocab_size(&self) -> usize {
        256 + BYTE_OFFSET as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_vocabulary_never_emits_reserved_ids() {
        let ids = ByteVocabulary.encode("a\u{0}").unwrap();
        assert_eq!(ids, vec![100, 3]);
        assert!(ids.iter().all(|&id| id > UNK_ID));
    }

    #[test]
    fn test_byte_vocabulary_decode_stops_at_eos() {
        let mut ids = ByteVocabulary.encode("héllo").unwrap();
        ids.push(EOS_ID);
        ids.push(100);
        assert_eq!(ByteVocabulary.decode(&ids).unwrap(), "héllo");
    }

    #[test]
    fn test_source_equality_drives_compatibility() {
        let a = VocabularySource::Tokenizer(PathBuf::from("/models/a.json"));
        assert_eq!(a, VocabularySource::Tokenizer(PathBuf::from("/models/a.json")));
        assert_ne!(a, VocabularySource::Byte);
    }

    #[test]
    fn test_missing_tokenizer_file_is_a_vocabulary_error() {
        let err = VocabularySource::Tokenizer(PathBuf::from("/nonexistent/tokenizer.json")).load().unwrap_err();
        assert!(matches!(err, DataError::Vocabulary(_)));
    }
}
