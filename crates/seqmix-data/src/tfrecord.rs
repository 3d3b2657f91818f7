//! TFRecord shard codec.
//!
//! Each record is framed as: `u64` little-endian payload length, masked
//! CRC-32C of the length bytes, payload, masked CRC-32C of the payload.
//! Payloads are serialized `tf.train.Example` protos.

use crate::dataset::{Dataset, Example, Feature};
use crate::error::{DataError, DataResult};
use crate::schema::{decode_example, FeatureSchema};
use prost::Message;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MASK_DELTA: u32 = 0xa282_ead8;

/// `tf.train.Example` and friends, hand-declared for `prost`.
pub mod proto {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct BytesList {
        #[prost(bytes = "vec", repeated, tag = "1")]
        pub value: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct FloatList {
        #[prost(float, repeated, tag = "1")]
        pub value: Vec<f32>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Int64List {
        #[prost(int64, repeated, tag = "1")]
        pub value: Vec<i64>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Feature {
        #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
        pub kind: Option<feature::Kind>,
    }

    pub mod feature {
        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Kind {
            #[prost(message, tag = "1")]
            BytesList(super::BytesList),
            #[prost(message, tag = "2")]
            FloatList(super::FloatList),
            #[prost(message, tag = "3")]
            Int64List(super::Int64List),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Features {
        #[prost(map = "string, message", tag = "1")]
        pub feature: HashMap<String, Feature>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Example {
        #[prost(message, optional, tag = "1")]
        pub features: Option<Features>,
    }
}

fn masked_crc(bytes: &[u8]) -> u32 {
    let crc = crc32c::crc32c(bytes);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Converts an example into a proto. Scalars become single-element lists.
#[must_use]
pub fn example_to_proto(example: &Example) -> proto::Example {
    use proto::feature::Kind;

    let feature = example
        .iter()
        .map(|(name, value)| {
            let kind = match value {
                Feature::Text(s) => Kind::BytesList(proto::BytesList { value: vec![s.as_bytes().to_vec()] }),
                Feature::TextList(v) => {
                    Kind::BytesList(proto::BytesList { value: v.iter().map(|s| s.as_bytes().to_vec()).collect() })
                }
                Feature::Int(i) => Kind::Int64List(proto::Int64List { value: vec![*i] }),
                Feature::Ints(v) => Kind::Int64List(proto::Int64List { value: v.clone() }),
                Feature::Float(f) => Kind::FloatList(proto::FloatList { value: vec![*f] }),
                Feature::Floats(v) => Kind::FloatList(proto::FloatList { value: v.clone() }),
            };
            (name.clone(), proto::Feature { kind: Some(kind) })
        })
        .collect();
    proto::Example { features: Some(proto::Features { feature }) }
}

/// Streams raw record payloads out of a reader.
pub struct RecordReader<R> {
    inner: R,
    label: String,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R, label: impl Into<String>) -> Self {
        Self { inner, label: label.into(), failed: false }
    }

    fn corrupt(&self, detail: impl Into<String>) -> DataError {
        DataError::Record { path: self.label.clone(), detail: detail.into() }
    }

    fn read_record(&mut self) -> DataResult<Option<Vec<u8>>> {
        let mut header = [0u8; 8];
        match read_full(&mut self.inner, &mut header)? {
            0 => return Ok(None),
            8 => {}
            n => return Err(self.corrupt(format!("truncated length header ({n} of 8 bytes)"))),
        }
        let mut crc = [0u8; 4];
        self.inner.read_exact(&mut crc).map_err(|e| self.corrupt(e.to_string()))?;
        if u32::from_le_bytes(crc) != masked_crc(&header) {
            return Err(self.corrupt("length checksum mismatch"));
        }

        let len = usize::try_from(u64::from_le_bytes(header)).map_err(|_| self.corrupt("record too large"))?;
        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).map_err(|e| self.corrupt(e.to_string()))?;
        self.inner.read_exact(&mut crc).map_err(|e| self.corrupt(e.to_string()))?;
        if u32::from_le_bytes(crc) != masked_crc(&payload) {
            return Err(self.corrupt("payload checksum mismatch"));
        }
        Ok(Some(payload))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = DataResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> DataResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

pub struct RecordWriter<W: Write> {
    inner: W,
}

impl RecordWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> DataResult<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_record(&mut self, payload: &[u8]) -> DataResult<()> {
        let header = (payload.len() as u64).to_le_bytes();
        self.inner.write_all(&header)?;
        self.inner.write_all(&masked_crc(&header).to_le_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.write_all(&masked_crc(payload).to_le_bytes())?;
        Ok(())
    }

    pub fn write_example(&mut self, example: &Example) -> DataResult<()> {
        self.write_record(&example_to_proto(example).encode_to_vec())
    }

    pub fn finish(mut self) -> DataResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Writes `examples` as one shard file.
pub fn write_shard(path: &Path, examples: &[Example]) -> DataResult<()> {
    let mut writer = RecordWriter::create(path)?;
    for example in examples {
        writer.write_example(example)?;
    }
    writer.finish()?;
    Ok(())
}

/// Lazily decodes the records of one shard against `schema`. The file is
/// reopened on every pass.
#[must_use]
pub fn read_shard(path: PathBuf, schema: Arc<FeatureSchema>) -> Dataset {
    Dataset::from_fn(move || {
        let label = path.display().to_string();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => return Box::new(std::iter::once(Err(e.into()))),
        };
        let schema = Arc::clone(&schema);
        let records = RecordReader::new(BufReader::new(file), label.clone());
        Box::new(records.map(move |record| {
            let bytes = record?;
            let proto = proto::Example::decode(bytes.as_slice())
                .map_err(|e| DataError::Record { path: label.clone(), detail: e.to_string() })?;
            decode_example(&proto, &schema)
        }))
    })
}
