//! Writing a consolidated state as a safetensors checkpoint

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use shardfold_config::{ExportConfig, parse_byte_size};
use tracing::{debug, info, warn};

use crate::aggregate::ConsolidatedState;
use crate::error::{Error, Result};
use crate::weights::{NamedTensor, write_safetensors};
use crate::target::INDEX_FILE;

/// Weight file name when everything fits in one file
pub const SINGLE_FILE: &str = "model.safetensors";

static WEIGHT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^model(-\d{5}-of-\d{5})?\.safetensors$").expect("weight file pattern is valid")
});

/// Name of chunk `index` (1-based) of `total`
#[must_use]
pub fn chunk_file_name(index: usize, total: usize) -> String {
    format!("model-{index:05}-of-{total:05}.safetensors")
}

/// `model.safetensors.index.json` contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightIndex {
    /// Checkpoint-wide metadata
    #[serde(default)]
    pub metadata: IndexMetadata,
    /// Tensor name to the file holding it
    pub weight_map: BTreeMap<String, String>,
}

/// Metadata block of a weight index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Sum of tensor data bytes over all files
    pub total_size: u64,
}

/// What an export wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Weight files in chunk order
    pub weight_files: Vec<PathBuf>,
    /// Index file, when the weights were split
    pub index_file: Option<PathBuf>,
    /// Tensor data bytes written
    pub total_size: u64,
    /// Non-tensor parameters left out
    pub skipped: Vec<String>,
    /// Model assets copied alongside the weights
    pub copied_assets: Vec<String>,
}

/// Split tensors into consecutive chunks of at most `max_size` bytes.
///
/// A tensor larger than `max_size` gets a chunk of its own.
#[must_use]
pub fn plan_chunks<'a>(tensors: &[NamedTensor<'a>], max_size: u64) -> Vec<Vec<NamedTensor<'a>>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0u64;

    for &(name, tensor) in tensors {
        let size = tensor.size_bytes();
        if !current.is_empty() && current_size + size > max_size {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push((name, tensor));
        current_size += size;
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Write the tensors of `state` to `out_dir` as safetensors.
///
/// Opaque parameters have no safetensors representation and are skipped
/// with a warning. Weight files from an earlier export into the same
/// directory that this export does not overwrite are removed.
///
/// # Errors
///
/// Fails on an invalid `max_shard_size` or any I/O error.
pub fn export_state(
    state: &ConsolidatedState,
    out_dir: &Path,
    config: &ExportConfig,
) -> Result<ExportReport> {
    let max_size =
        parse_byte_size(&config.max_shard_size).map_err(|e| Error::Config(e.to_string()))?;
    std::fs::create_dir_all(out_dir)?;

    let mut report = ExportReport::default();
    for (name, value) in state.iter() {
        if value.as_tensor().is_none() {
            warn!(parameter = %name, "skipping non-tensor parameter");
            report.skipped.push(name.clone());
        }
    }

    let tensors: Vec<NamedTensor<'_>> = state
        .tensors()
        .map(|(name, tensor)| (name.as_str(), tensor))
        .collect();
    let mut chunks = plan_chunks(&tensors, max_size);
    if chunks.is_empty() {
        chunks.push(Vec::new());
    }
    let metadata = BTreeMap::from([("format".to_string(), "pt".to_string())]);
    let mut weight_map = BTreeMap::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let file_name = if chunks.len() == 1 {
            SINGLE_FILE.to_string()
        } else {
            chunk_file_name(i + 1, chunks.len())
        };
        let path = out_dir.join(&file_name);
        let written = write_safetensors(&path, chunk, &metadata)?;
        debug!(file = %file_name, tensors = chunk.len(), bytes = written, "wrote weight file");

        for (name, _) in chunk {
            weight_map.insert((*name).to_string(), file_name.clone());
        }
        report.total_size += written;
        report.weight_files.push(path);
    }

    let index_path = out_dir.join(INDEX_FILE);
    if chunks.len() > 1 {
        let index = WeightIndex {
            metadata: IndexMetadata {
                total_size: report.total_size,
            },
            weight_map,
        };
        let json = serde_json::to_string_pretty(&index)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(&index_path, json + "\n")?;
        report.index_file = Some(index_path);
    }

    remove_stale_weights(out_dir, &report)?;

    info!(
        files = report.weight_files.len(),
        bytes = report.total_size,
        skipped = report.skipped.len(),
        "exported state dict"
    );
    Ok(report)
}

fn remove_stale_weights(out_dir: &Path, report: &ExportReport) -> Result<()> {
    for entry in std::fs::read_dir(out_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_weight = WEIGHT_FILE.is_match(name);
        let is_index = name == INDEX_FILE;
        if !(is_weight || is_index) || !path.is_file() {
            continue;
        }
        let current = report.weight_files.contains(&path) || report.index_file.as_ref() == Some(&path);
        if !current {
            debug!(file = name, "removing stale weight file");
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationBuffer;
    use crate::loader::RawShard;
    use crate::observer::TracingObserver;
    use crate::weights::read_safetensors_header;
    use crate::tensor::TensorData;
    use crate::value::ArrayValue;
    use bytes::Bytes;
    use shardfold_config::AggregateConfig;

    fn state(entries: Vec<(&str, ArrayValue)>) -> ConsolidatedState {
        let mut buffer = AggregationBuffer::new(1);
        buffer.fold(RawShard {
            rank: 0,
            entries: entries
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        });
        buffer
            .finish(&AggregateConfig::default(), &TracingObserver)
            .unwrap()
    }

    fn f32s(name: &str, n: usize) -> ArrayValue {
        ArrayValue::Tensor(TensorData::from_f32(name, vec![n], &vec![1.0; n]))
    }

    fn config(max: &str) -> ExportConfig {
        ExportConfig {
            max_shard_size: max.to_string(),
            ..ExportConfig::default()
        }
    }

    #[test]
    fn test_plan_chunks() {
        let a = TensorData::from_f32("a", vec![2], &[0.0; 2]);
        let b = TensorData::from_f32("b", vec![2], &[0.0; 2]);
        let big = TensorData::from_f32("big", vec![10], &[0.0; 10]);
        let c = TensorData::from_f32("c", vec![1], &[0.0]);

        let chunks = plan_chunks(&[("a", &a), ("b", &b), ("big", &big), ("c", &c)], 16);
        let names: Vec<Vec<&str>> = chunks
            .iter()
            .map(|chunk| chunk.iter().map(|(name, _)| *name).collect())
            .collect();
        assert_eq!(names, vec![vec!["a", "b"], vec!["big"], vec!["c"]]);

        assert!(plan_chunks(&[], 16).is_empty());
    }

    #[test]
    fn test_single_file_export() {
        let out = tempfile::tempdir().unwrap();
        let state = state(vec![
            ("a", f32s("a", 2)),
            ("extra", ArrayValue::Opaque(Bytes::from_static(b"x"))),
        ]);

        let report = export_state(&state, out.path(), &ExportConfig::default()).unwrap();
        assert_eq!(report.weight_files, vec![out.path().join(SINGLE_FILE)]);
        assert!(report.index_file.is_none());
        assert_eq!(report.total_size, 8);
        assert_eq!(report.skipped, vec!["extra".to_string()]);

        let header = read_safetensors_header(&out.path().join(SINGLE_FILE)).unwrap();
        assert_eq!(header.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_chunked_export_with_index() {
        let out = tempfile::tempdir().unwrap();
        let state = state(vec![("a", f32s("a", 4)), ("b", f32s("b", 4)), ("c", f32s("c", 1))]);

        let report = export_state(&state, out.path(), &config("20B")).unwrap();
        assert_eq!(report.weight_files.len(), 2);
        assert_eq!(
            report.weight_files[0],
            out.path().join("model-00001-of-00002.safetensors")
        );

        let raw = std::fs::read(out.path().join(INDEX_FILE)).unwrap();
        let index: WeightIndex = serde_json::from_slice(&raw).unwrap();
        assert_eq!(index.metadata.total_size, 36);
        assert_eq!(index.weight_map["a"], "model-00001-of-00002.safetensors");
        assert_eq!(index.weight_map["b"], "model-00002-of-00002.safetensors");
        assert_eq!(index.weight_map["c"], "model-00002-of-00002.safetensors");
    }

    #[test]
    fn test_reexport_removes_stale_files() {
        let out = tempfile::tempdir().unwrap();
        let state = state(vec![("a", f32s("a", 4)), ("b", f32s("b", 4))]);
        std::fs::write(out.path().join("notes.txt"), "keep").unwrap();

        export_state(&state, out.path(), &config("16B")).unwrap();
        assert!(out.path().join(INDEX_FILE).is_file());

        export_state(&state, out.path(), &ExportConfig::default()).unwrap();
        assert!(out.path().join(SINGLE_FILE).is_file());
        assert!(!out.path().join(INDEX_FILE).exists());
        assert!(!out.path().join("model-00001-of-00002.safetensors").exists());
        assert!(out.path().join("notes.txt").is_file());
    }

    #[test]
    fn test_state_key_names_tensor() {
        let out = tempfile::tempdir().unwrap();
        let state = state(vec![("model.w", f32s("w", 1))]);

        export_state(&state, out.path(), &ExportConfig::default()).unwrap();
        let header = read_safetensors_header(&out.path().join(SINGLE_FILE)).unwrap();
        assert!(header.contains_key("model.w"));
    }

    #[test]
    fn test_invalid_max_size() {
        let out = tempfile::tempdir().unwrap();
        let err = export_state(&state(vec![]), out.path(), &config("lots")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
