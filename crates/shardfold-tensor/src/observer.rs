//! Diagnostics hooks for a consolidation run
//!
//! The consolidator reports progress and recoverable anomalies through a
//! `ConsolidationObserver`. `TracingObserver` turns them into `tracing`
//! events; tests plug in their own observer to assert on them.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::aggregate::ConcatError;
use crate::shard::{ShardDescriptor, ShardSet};

/// Receives progress and anomaly notifications. All methods default to no-ops.
pub trait ConsolidationObserver: Send + Sync {
    /// Discovery produced a validated shard set
    fn shards_discovered(&self, dir: &Path, set: &ShardSet) {
        let _ = (dir, set);
    }

    /// A shard is about to be read
    fn shard_loading(&self, shard: &ShardDescriptor) {
        let _ = shard;
    }

    /// A shard was read and folded into the buffer
    fn shard_loaded(&self, shard: &ShardDescriptor, parameters: usize, bytes: u64) {
        let _ = (shard, parameters, bytes);
    }

    /// Concatenation was not applicable; the rank-0 value is used
    fn concat_fallback(&self, name: &str, reason: &ConcatError) {
        let _ = (name, reason);
    }

    /// Every rank holds identical bytes for a concatenable parameter
    fn suspected_replica(&self, name: &str, ranks: usize, deduplicated: bool) {
        let _ = (name, ranks, deduplicated);
    }

    /// A parameter is held by only some ranks
    fn partial_coverage(&self, name: &str, ranks: &[usize], world_size: usize) {
        let _ = (name, ranks, world_size);
    }
}

/// Observer that emits `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ConsolidationObserver for TracingObserver {
    fn shards_discovered(&self, dir: &Path, set: &ShardSet) {
        info!(
            dir = %dir.display(),
            world_size = set.world_size(),
            "found checkpoints"
        );
        for shard in set.iter() {
            debug!(rank = shard.rank, path = %shard.path.display(), "shard file");
        }
    }

    fn shard_loading(&self, shard: &ShardDescriptor) {
        info!(rank = shard.rank, path = %shard.path.display(), "loading shard");
    }

    fn shard_loaded(&self, shard: &ShardDescriptor, parameters: usize, bytes: u64) {
        debug!(rank = shard.rank, parameters, bytes, "shard folded");
    }

    fn concat_fallback(&self, name: &str, reason: &ConcatError) {
        info!(
            parameter = name,
            reason = %reason,
            "parameter does not need concatenation, using first shard value"
        );
    }

    fn suspected_replica(&self, name: &str, ranks: usize, deduplicated: bool) {
        if deduplicated {
            info!(parameter = name, ranks, "identical replicas collapsed to first shard value");
        } else {
            warn!(
                parameter = name,
                ranks,
                "identical values on every rank were concatenated; parameter may be replicated"
            );
        }
    }

    fn partial_coverage(&self, name: &str, ranks: &[usize], world_size: usize) {
        warn!(
            parameter = name,
            ranks = ?ranks,
            world_size,
            "parameter missing from some shards"
        );
    }
}
