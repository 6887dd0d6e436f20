//! Shard container reader and writer
//!
//! A shard file is laid out as:
//!
//! ```text
//! [u64 LE header length][MessagePack header][data section]
//! ```
//!
//! The header lists every entry with its kind, its offset into the data
//! section and a BLAKE3 checksum of its bytes.

use std::collections::HashSet;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, LoadError, Result};
use crate::tensor::{TensorData, TensorDtype};
use crate::value::{ArrayValue, DistributedTensor, Placement, ShardValue};

/// Magic bytes at the start of every header
pub const MAGIC: [u8; 4] = *b"SFSH";

/// Current container version
pub const VERSION: u32 = 1;

/// Container header
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardHeader {
    /// Magic bytes
    magic: [u8; 4],
    /// Version
    version: u32,
    /// Entries in data-section order
    entries: Vec<ShardEntry>,
}

/// One named value in the container
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardEntry {
    name: String,
    kind: EntryKind,
    /// Offset in data section
    offset: u64,
    /// Size in bytes
    size: u64,
    checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum EntryKind {
    Tensor {
        dtype: TensorDtype,
        shape: Vec<usize>,
    },
    Distributed {
        dtype: TensorDtype,
        local_shape: Vec<usize>,
        global_shape: Vec<usize>,
        placement: Placement,
    },
    Opaque,
}

/// Serializes named values into a shard container
#[derive(Debug, Default)]
pub struct ShardWriter;

impl ShardWriter {
    /// Create a new writer
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encode entries, preserving their order
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be serialized.
    pub fn write(&self, entries: &[(String, ShardValue)]) -> Result<Bytes> {
        let mut header_entries = Vec::with_capacity(entries.len());
        let mut offset = 0u64;

        for (name, value) in entries {
            let (kind, data) = match value {
                ShardValue::Plain(ArrayValue::Tensor(t)) => (
                    EntryKind::Tensor {
                        dtype: t.dtype,
                        shape: t.shape.clone(),
                    },
                    &t.data,
                ),
                ShardValue::Plain(ArrayValue::Opaque(bytes)) => (EntryKind::Opaque, bytes),
                ShardValue::Distributed(handle) => (
                    EntryKind::Distributed {
                        dtype: handle.local.dtype,
                        local_shape: handle.local.shape.clone(),
                        global_shape: handle.global_shape.clone(),
                        placement: handle.placement,
                    },
                    &handle.local.data,
                ),
            };

            header_entries.push(ShardEntry {
                name: name.clone(),
                kind,
                offset,
                size: data.len() as u64,
                checksum: compute_checksum(data),
            });
            offset += data.len() as u64;
        }

        let header = ShardHeader {
            magic: MAGIC,
            version: VERSION,
            entries: header_entries,
        };
        let header_bytes =
            rmp_serde::to_vec(&header).map_err(|e| Error::Serialization(e.to_string()))?;

        let mut buffer = Vec::with_capacity(8 + header_bytes.len() + offset as usize);
        buffer.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        buffer.extend_from_slice(&header_bytes);

        for (_, value) in entries {
            let data = match value {
                ShardValue::Plain(plain) => plain.bytes(),
                ShardValue::Distributed(handle) => &handle.local.data,
            };
            buffer.extend_from_slice(data);
        }

        Ok(Bytes::from(buffer))
    }

    /// Encode entries and write them to `path`
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_file(&self, path: impl AsRef<Path>, entries: &[(String, ShardValue)]) -> Result<()> {
        let bytes = self.write(entries)?;
        std::fs::write(path, &bytes)?;
        Ok(())
    }
}

/// Decodes a shard container
#[derive(Debug, Clone)]
pub struct ShardReader {
    verify_checksums: bool,
}

impl ShardReader {
    /// Create a reader
    #[must_use]
    pub fn new(verify_checksums: bool) -> Self {
        Self { verify_checksums }
    }

    /// Decode every entry. Entry data shares `data`'s buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is malformed or an entry is corrupt.
    pub fn read(&self, data: &Bytes) -> std::result::Result<Vec<(String, ShardValue)>, LoadError> {
        let (header, header_size) = parse_header(data)?;

        let mut seen = HashSet::with_capacity(header.entries.len());
        let mut values = Vec::with_capacity(header.entries.len());

        for entry in header.entries {
            if !seen.insert(entry.name.clone()) {
                return Err(LoadError::DataCorrupted(format!(
                    "duplicate entry '{}'",
                    entry.name
                )));
            }

            let start = usize::try_from(entry.offset)
                .ok()
                .and_then(|o| o.checked_add(header_size));
            let end = start.and_then(|s| {
                usize::try_from(entry.size)
                    .ok()
                    .and_then(|size| s.checked_add(size))
            });
            let (start, end) = match (start, end) {
                (Some(start), Some(end)) if end <= data.len() => (start, end),
                _ => {
                    return Err(LoadError::DataCorrupted(format!(
                        "'{}' extends beyond file",
                        entry.name
                    )));
                }
            };

            let bytes = data.slice(start..end);
            if self.verify_checksums && compute_checksum(&bytes) != entry.checksum {
                return Err(LoadError::ChecksumMismatch(entry.name));
            }

            let value = match entry.kind {
                EntryKind::Tensor { dtype, shape } => {
                    let tensor = TensorData::new(entry.name.clone(), dtype, shape, bytes);
                    tensor.check_size().map_err(LoadError::DataCorrupted)?;
                    ShardValue::Plain(ArrayValue::Tensor(tensor))
                }
                EntryKind::Distributed {
                    dtype,
                    local_shape,
                    global_shape,
                    placement,
                } => {
                    let local = TensorData::new(entry.name.clone(), dtype, local_shape, bytes);
                    ShardValue::Distributed(DistributedTensor::new(local, global_shape, placement))
                }
                EntryKind::Opaque => ShardValue::Plain(ArrayValue::Opaque(bytes)),
            };

            values.push((entry.name, value));
        }

        Ok(values)
    }
}

impl Default for ShardReader {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Parse the header, returning it with the offset of the data section
fn parse_header(data: &[u8]) -> std::result::Result<(ShardHeader, usize), LoadError> {
    let Some(len_bytes) = data.get(0..8) else {
        return Err(LoadError::InvalidFormat(
            "file too small for header".to_string(),
        ));
    };
    let mut len = [0u8; 8];
    len.copy_from_slice(len_bytes);

    let header_len = usize::try_from(u64::from_le_bytes(len))
        .ok()
        .filter(|n| n.checked_add(8).is_some_and(|end| end <= data.len()))
        .ok_or_else(|| LoadError::InvalidFormat("file truncated before header end".to_string()))?;

    let header: ShardHeader = rmp_serde::from_slice(&data[8..8 + header_len])
        .map_err(|e| LoadError::Header(e.to_string()))?;

    if header.magic != MAGIC {
        return Err(LoadError::InvalidFormat("invalid magic bytes".to_string()));
    }
    if header.version != VERSION {
        return Err(LoadError::InvalidFormat(format!(
            "unsupported version {}",
            header.version
        )));
    }

    Ok((header, 8 + header_len))
}

/// Compute checksum for data
fn compute_checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<(String, ShardValue)> {
        vec![
            (
                "weight".to_string(),
                TensorData::from_f32("weight", vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).into(),
            ),
            (
                "embed".to_string(),
                DistributedTensor::new(
                    TensorData::from_f32("embed", vec![1, 2], &[7.0, 8.0]),
                    vec![4, 2],
                    Placement::Shard { dim: 0 },
                )
                .into(),
            ),
            (
                "_extra_state".to_string(),
                ShardValue::Plain(ArrayValue::Opaque(Bytes::from_static(b"opaque"))),
            ),
        ]
    }

    #[test]
    fn test_write_then_read_preserves_entries() {
        let bytes = ShardWriter::new().write(&sample_entries()).unwrap();
        let loaded = ShardReader::default().read(&bytes).unwrap();

        assert_eq!(loaded, sample_entries());
        let names: Vec<_> = loaded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["weight", "embed", "_extra_state"]);
    }

    #[test]
    fn test_empty_container() {
        let bytes = ShardWriter::new().write(&[]).unwrap();
        assert!(ShardReader::default().read(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_too_small() {
        let err = ShardReader::default()
            .read(&Bytes::from_static(b"abc"))
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidFormat(_)));
    }

    #[test]
    fn test_truncated_header() {
        let mut raw = 1000u64.to_le_bytes().to_vec();
        raw.extend_from_slice(&[0u8; 16]);
        let err = ShardReader::default().read(&Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, LoadError::InvalidFormat(_)));
    }

    #[test]
    fn test_garbage_header() {
        let mut raw = 4u64.to_le_bytes().to_vec();
        raw.extend_from_slice(&[0xc1, 0xc1, 0xc1, 0xc1]);
        let err = ShardReader::default().read(&Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, LoadError::Header(_)));
    }

    #[test]
    fn test_truncated_data() {
        let bytes = ShardWriter::new().write(&sample_entries()).unwrap();
        let cut = bytes.slice(0..bytes.len() - 4);
        let err = ShardReader::default().read(&cut).unwrap_err();
        assert!(matches!(err, LoadError::DataCorrupted(_)));
    }

    #[test]
    fn test_checksum_mismatch() {
        let bytes = ShardWriter::new().write(&sample_entries()).unwrap();
        let mut raw = bytes.to_vec();
        // first data byte belongs to "weight"
        let header_len = u64::from_le_bytes(raw[0..8].try_into().unwrap()) as usize;
        raw[8 + header_len] ^= 0xFF;
        let corrupted = Bytes::from(raw);

        let err = ShardReader::new(true).read(&corrupted).unwrap_err();
        assert!(matches!(err, LoadError::ChecksumMismatch(ref name) if name == "weight"));

        assert!(ShardReader::new(false).read(&corrupted).is_ok());
    }

    #[test]
    fn test_shape_size_mismatch() {
        let bad = TensorData::new(
            "bad",
            TensorDtype::Float32,
            vec![4],
            Bytes::from_static(&[0u8; 4]),
        );
        let bytes = ShardWriter::new()
            .write(&[("bad".to_string(), bad.into())])
            .unwrap();
        let err = ShardReader::default().read(&bytes).unwrap_err();
        assert!(matches!(err, LoadError::DataCorrupted(_)));
    }

    fn read_shape(shape: Vec<usize>) -> std::result::Result<Vec<(String, ShardValue)>, LoadError> {
        let tensor = TensorData::new("huge", TensorDtype::Float32, shape, Bytes::new());
        let bytes = ShardWriter::new()
            .write(&[("huge".to_string(), tensor.into())])
            .unwrap();
        ShardReader::default().read(&bytes)
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let err = read_shape(vec![usize::MAX, 2]).unwrap_err();
        assert!(matches!(err, LoadError::DataCorrupted(ref msg) if msg.contains("overflows")));

        let err = read_shape(vec![1 << 32, 1 << 32]).unwrap_err();
        assert!(matches!(err, LoadError::DataCorrupted(_)));
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let t = TensorData::from_f32("dup", vec![1], &[1.0]);
        let bytes = ShardWriter::new()
            .write(&[
                ("dup".to_string(), t.clone().into()),
                ("dup".to_string(), t.into()),
            ])
            .unwrap();
        let err = ShardReader::default().read(&bytes).unwrap_err();
        assert!(matches!(err, LoadError::DataCorrupted(_)));
    }
}
