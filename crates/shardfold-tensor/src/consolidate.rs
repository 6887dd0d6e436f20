//! Consolidation pipeline: discover, load, aggregate, and optionally export

use std::path::Path;

use rayon::prelude::*;
use shardfold_config::{AggregateConfig, ExportConfig, LoadConfig, ShardfoldConfig};
use tracing::info;

use crate::aggregate::{AggregationBuffer, ConsolidatedState};
use crate::error::{Error, Result};
use crate::export::{ExportReport, export_state};
use crate::loader::{RawShard, ShardLoader};
use crate::observer::{ConsolidationObserver, TracingObserver};
use crate::shard::{ShardDescriptor, ShardSet, discover_shards};
use crate::target::TargetModel;

/// Rebuilds a single parameter mapping from a directory of per-rank shards
pub struct Consolidator<O = TracingObserver> {
    load: LoadConfig,
    aggregate: AggregateConfig,
    export: ExportConfig,
    loader: ShardLoader,
    observer: O,
}

impl Consolidator<TracingObserver> {
    /// Create a consolidator that reports through `tracing`
    #[must_use]
    pub fn new(config: &ShardfoldConfig) -> Self {
        Self {
            load: config.load.clone(),
            aggregate: config.aggregate,
            export: config.export.clone(),
            loader: ShardLoader::new(config.load.verify_checksums),
            observer: TracingObserver,
        }
    }
}

impl Default for Consolidator<TracingObserver> {
    fn default() -> Self {
        Self::new(&ShardfoldConfig::default())
    }
}

impl<O: ConsolidationObserver> Consolidator<O> {
    /// Swap the observer
    pub fn with_observer<P: ConsolidationObserver>(self, observer: P) -> Consolidator<P> {
        Consolidator {
            load: self.load,
            aggregate: self.aggregate,
            export: self.export,
            loader: self.loader,
            observer,
        }
    }

    /// Get the observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Consolidate every shard in `dir`.
    ///
    /// # Errors
    ///
    /// Fails on the first discovery, load or strict-coverage error; no
    /// partial state is returned.
    pub fn consolidate(&self, dir: impl AsRef<Path>) -> Result<ConsolidatedState> {
        let dir = dir.as_ref();
        let set = discover_shards(dir)?;
        self.observer.shards_discovered(dir, &set);

        let mut buffer = AggregationBuffer::new(set.world_size());
        let workers = self.load.workers.min(set.world_size());
        if workers <= 1 {
            self.load_sequential(&set, &mut buffer)?;
        } else {
            self.load_parallel(&set, workers, &mut buffer)?;
        }

        buffer.finish(&self.aggregate, &self.observer)
    }

    /// Consolidate `checkpoint_dir`, validate against the model in
    /// `model_dir`, and write the result to `output_dir`.
    ///
    /// # Errors
    ///
    /// Fails if consolidation, validation or export fails.
    pub fn convert(
        &self,
        checkpoint_dir: impl AsRef<Path>,
        model_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<ExportReport> {
        let target = TargetModel::open(model_dir)?;
        let state = self.consolidate(checkpoint_dir)?;

        if self.export.validate_parameters && target.validate(&state)? {
            info!(parameters = state.len(), "state dict matches target model");
        }

        let output_dir = output_dir.as_ref();
        let mut report = export_state(&state, output_dir, &self.export)?;
        report.copied_assets = target.copy_assets(output_dir, &self.export.tokenizer_files)?;
        info!(
            output = %output_dir.display(),
            files = report.weight_files.len(),
            bytes = report.total_size,
            "converted checkpoint saved"
        );
        Ok(report)
    }

    fn load_one(&self, shard: &ShardDescriptor) -> Result<RawShard> {
        self.observer.shard_loading(shard);
        self.loader.load(shard)
    }

    fn fold_one(&self, shard: &ShardDescriptor, raw: RawShard, buffer: &mut AggregationBuffer) {
        let (parameters, bytes) = (raw.len(), raw.size_bytes());
        buffer.fold(raw);
        self.observer.shard_loaded(shard, parameters, bytes);
    }

    fn load_sequential(&self, set: &ShardSet, buffer: &mut AggregationBuffer) -> Result<()> {
        for shard in set.iter() {
            let raw = self.load_one(shard)?;
            self.fold_one(shard, raw, buffer);
        }
        Ok(())
    }

    fn load_parallel(
        &self,
        set: &ShardSet,
        workers: usize,
        buffer: &mut AggregationBuffer,
    ) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("shardfold-load-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("cannot start load pool: {e}")))?;

        // collect keeps rank order regardless of completion order
        let results: Vec<Result<RawShard>> = pool.install(|| {
            set.shards()
                .par_iter()
                .map(|shard| self.load_one(shard))
                .collect()
        });

        for (shard, result) in set.iter().zip(results) {
            self.fold_one(shard, result?, buffer);
        }
        Ok(())
    }
}
