//! Consolidation of per-rank sharded model checkpoints
//!
//! A fully sharded data-parallel run leaves one file per rank,
//! `model_world_size_{W}_rank_{R}.pt`. This crate folds them back into a
//! single parameter mapping and writes it out as safetensors.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Consolidator                           │
//! │                                                               │
//! │  discover_shards ──▶ ShardLoader ──▶ AggregationBuffer        │
//! │  (names only,        (container      (fold in rank order,     │
//! │   all ranks present)  + handles)      concat or rank 0)       │
//! │                                             │                 │
//! │                                     ConsolidatedState         │
//! │                                             │                 │
//! │              TargetModel::validate ──▶ export_state           │
//! └──────────────────────────────────────────────────────────────┘
//!          │ progress and anomalies
//!          ▼
//!   ConsolidationObserver (TracingObserver by default)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use shardfold_config::ShardfoldConfig;
//! use shardfold_tensor::Consolidator;
//!
//! let consolidator = Consolidator::new(&ShardfoldConfig::default());
//! let state = consolidator.consolidate("checkpoints/global_step_100/actor")?;
//! println!("{} parameters", state.len());
//!
//! consolidator.convert("checkpoints/global_step_100/actor", "models/base", "models/step_100")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::must_use_candidate)]

pub mod aggregate;
pub mod consolidate;
pub mod error;
pub mod export;
pub mod format;
pub mod loader;
pub mod observer;
pub mod shard;
pub mod target;
pub mod tensor;
pub mod value;
pub mod weights;

pub use aggregate::{AggregationBuffer, ConcatError, ConsolidatedState, MergeKind, try_concatenate};
pub use consolidate::Consolidator;
pub use error::{Error, LoadError, Result};
pub use export::{ExportReport, WeightIndex, export_state, plan_chunks};
pub use format::{ShardReader, ShardWriter};
pub use loader::{RawShard, ShardLoader};
pub use observer::{ConsolidationObserver, TracingObserver};
pub use shard::{ShardDescriptor, ShardSet, discover_shards, shard_file_name};
pub use target::TargetModel;
pub use tensor::{TensorData, TensorDtype};
pub use value::{ArrayValue, DistributedTensor, Placement, ShardValue};
pub use weights::{TensorInfo, read_safetensors_header, write_safetensors};
