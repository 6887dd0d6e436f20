//! Per-rank shard loading

use bytes::Bytes;

use crate::error::{Error, LoadError, Result};
use crate::format::ShardReader;
use crate::shard::ShardDescriptor;
use crate::value::ArrayValue;

/// One rank's parameters with every distributed handle materialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawShard {
    /// Rank the values came from
    pub rank: usize,
    /// Values in file order
    pub entries: Vec<(String, ArrayValue)>,
}

impl RawShard {
    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the shard holds no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes held
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.entries.iter().map(|(_, v)| v.size_bytes()).sum()
    }
}

/// Loads shard files. Holds no mutable state, so one loader can serve
/// several threads at once.
#[derive(Debug, Clone, Default)]
pub struct ShardLoader {
    reader: ShardReader,
}

impl ShardLoader {
    /// Create a loader
    #[must_use]
    pub fn new(verify_checksums: bool) -> Self {
        Self {
            reader: ShardReader::new(verify_checksums),
        }
    }

    /// Read one shard file and materialize its values.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShardLoad` naming the file for any read, decode or
    /// materialization failure.
    pub fn load(&self, shard: &ShardDescriptor) -> Result<RawShard> {
        self.load_entries(shard).map_err(|source| Error::ShardLoad {
            path: shard.path.clone(),
            source,
        })
    }

    fn load_entries(&self, shard: &ShardDescriptor) -> std::result::Result<RawShard, LoadError> {
        let data = Bytes::from(std::fs::read(&shard.path)?);
        let entries = self
            .reader
            .read(&data)?
            .into_iter()
            .map(|(name, value)| value.into_local().map(|local| (name, local)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(RawShard {
            rank: shard.rank,
            entries,
        })
    }
}
