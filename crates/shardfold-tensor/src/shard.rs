//! Shard discovery and validation

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};

static SHARD_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^model_world_size_(\d+)_rank_(\d+)\.pt$").expect("shard file pattern is valid")
});

/// Canonical file name for one rank's shard
#[must_use]
pub fn shard_file_name(world_size: usize, rank: usize) -> String {
    format!("model_world_size_{world_size}_rank_{rank}.pt")
}

/// One shard file, identified purely by its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    /// Number of ranks the checkpoint was split across
    pub world_size: usize,
    /// This shard's rank
    pub rank: usize,
    /// File location
    pub path: PathBuf,
}

impl ShardDescriptor {
    /// Parse a descriptor from a file name in `dir`.
    ///
    /// Returns `None` unless the name matches the shard naming convention.
    #[must_use]
    pub fn parse(dir: &Path, file_name: &str) -> Option<Self> {
        let caps = SHARD_FILE.captures(file_name)?;
        let world_size = caps[1].parse().ok()?;
        let rank = caps[2].parse().ok()?;
        Some(Self {
            world_size,
            rank,
            path: dir.join(file_name),
        })
    }

    /// Whether the name is spelled exactly as `shard_file_name` would spell it
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == shard_file_name(self.world_size, self.rank))
    }
}

/// A validated, complete set of shards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSet {
    world_size: usize,
    shards: Vec<ShardDescriptor>,
}

impl ShardSet {
    /// Validate descriptors into a complete set.
    ///
    /// # Errors
    ///
    /// Fails if `descriptors` is empty, mixes world sizes, or misses a rank.
    pub fn from_descriptors(dir: &Path, descriptors: Vec<ShardDescriptor>) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(Error::NoShardsFound {
                dir: dir.to_path_buf(),
            });
        }

        let sizes: BTreeSet<usize> = descriptors.iter().map(|d| d.world_size).collect();
        if sizes.len() != 1 {
            return Err(Error::InconsistentWorldSize {
                sizes: sizes.into_iter().collect(),
            });
        }
        let world_size = descriptors[0].world_size;
        if world_size == 0 {
            // a zero world size names no rank at all
            return Err(Error::NoShardsFound {
                dir: dir.to_path_buf(),
            });
        }

        let mut by_rank: BTreeMap<usize, ShardDescriptor> = BTreeMap::new();
        for desc in descriptors {
            if desc.rank >= world_size {
                warn!(path = %desc.path.display(), world_size, "ignoring shard with out-of-range rank");
            } else if !desc.is_canonical() {
                warn!(path = %desc.path.display(), "ignoring non-canonical shard file name");
            } else {
                by_rank.insert(desc.rank, desc);
            }
        }

        let mut shards = Vec::with_capacity(world_size);
        for rank in 0..world_size {
            match by_rank.remove(&rank) {
                Some(desc) => shards.push(desc),
                None => {
                    return Err(Error::MissingShard {
                        rank,
                        path: dir.join(shard_file_name(world_size, rank)),
                    });
                }
            }
        }

        Ok(Self { world_size, shards })
    }

    /// World size shared by every shard
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Shards in rank order
    #[must_use]
    pub fn shards(&self) -> &[ShardDescriptor] {
        &self.shards
    }

    /// Iterate shards in rank order
    pub fn iter(&self) -> impl Iterator<Item = &ShardDescriptor> {
        self.shards.iter()
    }
}

/// Scan `dir` for shard files and validate them into a `ShardSet`.
///
/// Only file names are inspected; contents and timestamps play no part.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or the shard set is
/// empty, mixes world sizes, or has a missing rank.
pub fn discover_shards(dir: impl AsRef<Path>) -> Result<ShardSet> {
    let dir = dir.as_ref();
    let mut descriptors = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // follows symlinks, dangling links are skipped
        if !entry.path().is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(desc) = ShardDescriptor::parse(dir, name) {
            descriptors.push(desc);
        } else if SHARD_FILE.is_match(name) {
            warn!(file = name, "ignoring shard file with unparseable numbers");
        }
    }

    ShardSet::from_descriptors(dir, descriptors)
}
