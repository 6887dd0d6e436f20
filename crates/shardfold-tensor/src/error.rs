//! Error types for shardfold-tensor

use std::path::PathBuf;

use thiserror::Error;

/// Result type for consolidation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that halt a consolidation run
#[derive(Error, Debug)]
pub enum Error {
    /// The directory holds no file matching the shard naming convention
    #[error("no checkpoint shards found in {}", dir.display())]
    NoShardsFound {
        /// Scanned directory
        dir: PathBuf,
    },

    /// Shard file names encode more than one world size
    #[error("inconsistent world_size found in checkpoint files: {sizes:?}")]
    InconsistentWorldSize {
        /// Distinct world sizes, ascending
        sizes: Vec<usize>,
    },

    /// A rank in `0..world_size` has no shard file
    #[error("missing shard file for rank {rank}: {}", path.display())]
    MissingShard {
        /// First absent rank
        rank: usize,
        /// Expected file path
        path: PathBuf,
    },

    /// A shard file could not be decoded
    #[error("failed to load shard {}: {source}", path.display())]
    ShardLoad {
        /// Shard file path
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: LoadError,
    },

    /// A parameter is missing from some ranks under strict coverage
    #[error("parameter '{name}' present in {present} of {world_size} shards")]
    InconsistentParameterSet {
        /// Parameter name
        name: String,
        /// Number of ranks holding it
        present: usize,
        /// Expected number of ranks
        world_size: usize,
    },

    /// Consolidated names do not match the target model's parameters
    #[error(
        "state dict does not match target model: missing {missing:?}, unexpected {unexpected:?}"
    )]
    StateDictMismatch {
        /// Expected by the model but not consolidated
        missing: Vec<String>,
        /// Consolidated but not expected by the model
        unexpected: Vec<String>,
    },

    /// Target model directory is unusable
    #[error("invalid target model: {0}")]
    InvalidTarget(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single shard file failed to load
#[derive(Error, Debug)]
pub enum LoadError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not a shard container, or an unsupported version
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Header could not be decoded
    #[error("header decode failed: {0}")]
    Header(String),

    /// Entry data is inconsistent with its declared layout
    #[error("data corrupted: {0}")]
    DataCorrupted(String),

    /// Entry bytes do not hash to the recorded checksum
    #[error("checksum mismatch for '{0}'")]
    ChecksumMismatch(String),

    /// A distributed handle could not produce its local tensor
    #[error("cannot materialize '{name}': {reason}")]
    Materialize {
        /// Entry name
        name: String,
        /// Reason
        reason: String,
    },
}
