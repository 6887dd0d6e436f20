//! Target model directory: architecture config, expected parameter names,
//! and the assets that travel with converted weights

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::aggregate::ConsolidatedState;
use crate::error::{Error, Result};
use crate::export::WeightIndex;
use crate::weights::read_safetensors_header;

/// Architecture description every model directory carries
pub const CONFIG_FILE: &str = "config.json";
/// Optional generation defaults
pub const GENERATION_CONFIG_FILE: &str = "generation_config.json";
/// Index of a multi-file safetensors checkpoint
pub const INDEX_FILE: &str = "model.safetensors.index.json";
/// Output projection that tied models share with the input embedding
pub const TIED_OUTPUT_WEIGHT: &str = "lm_head.weight";

/// A local model directory the consolidated weights are checked against
#[derive(Debug, Clone)]
pub struct TargetModel {
    dir: PathBuf,
    config: serde_json::Map<String, serde_json::Value>,
    expected: Option<BTreeSet<String>>,
}

impl TargetModel {
    /// Open a model directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTarget` if `dir` is not a directory or its
    /// `config.json` is missing or not a JSON object, and an error if an
    /// existing weight index or safetensors header cannot be parsed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::InvalidTarget(format!(
                "{} is not a local model directory",
                dir.display()
            )));
        }

        let config_path = dir.join(CONFIG_FILE);
        let raw = std::fs::read(&config_path).map_err(|e| {
            Error::InvalidTarget(format!("cannot read {}: {e}", config_path.display()))
        })?;
        let config = match serde_json::from_slice::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => {
                return Err(Error::InvalidTarget(format!(
                    "{} is not a JSON object",
                    config_path.display()
                )));
            }
            Err(e) => {
                return Err(Error::InvalidTarget(format!(
                    "{}: {e}",
                    config_path.display()
                )));
            }
        };

        let expected = Self::expected_names(dir)?;
        match &expected {
            Some(names) => debug!(dir = %dir.display(), parameters = names.len(), "target model opened"),
            None => debug!(dir = %dir.display(), "target model has no reference weights"),
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            expected,
        })
    }

    fn expected_names(dir: &Path) -> Result<Option<BTreeSet<String>>> {
        let index_path = dir.join(INDEX_FILE);
        if index_path.is_file() {
            let raw = std::fs::read(&index_path)?;
            let index: WeightIndex = serde_json::from_slice(&raw)
                .map_err(|e| Error::Serialization(format!("{}: {e}", index_path.display())))?;
            return Ok(Some(index.weight_map.into_keys().collect()));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|ext| ext == "safetensors")
            })
            .collect();
        if files.is_empty() {
            return Ok(None);
        }
        files.sort();

        let mut names = BTreeSet::new();
        for file in &files {
            names.extend(read_safetensors_header(file)?.into_keys());
        }
        Ok(Some(names))
    }

    /// Model directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parsed `config.json`
    pub fn config(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.config
    }

    /// `model_type` from `config.json`, if present
    pub fn model_type(&self) -> Option<&str> {
        self.config.get("model_type").and_then(|v| v.as_str())
    }

    /// `tie_word_embeddings` from `config.json`; tied models omit
    /// `lm_head.weight` from their saved weights
    pub fn tie_word_embeddings(&self) -> bool {
        self.config
            .get("tie_word_embeddings")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Parameter names the model expects, if the directory ships weights
    pub fn expected_parameters(&self) -> Option<&BTreeSet<String>> {
        self.expected.as_ref()
    }

    /// Check that the consolidated tensors are exactly the model's
    /// parameters.
    ///
    /// Returns `false` when the directory has no reference weights and
    /// nothing could be checked. A tied model also accepts
    /// `lm_head.weight`.
    ///
    /// # Errors
    ///
    /// Returns `Error::StateDictMismatch` listing missing and unexpected
    /// names, both sorted.
    pub fn validate(&self, state: &ConsolidatedState) -> Result<bool> {
        let Some(expected) = &self.expected else {
            warn!(
                dir = %self.dir.display(),
                "target model ships no weights, skipping parameter validation"
            );
            return Ok(false);
        };

        let tied = self.tie_word_embeddings();
        let actual: BTreeSet<&str> = state.tensors().map(|(name, _)| name.as_str()).collect();
        let missing: Vec<String> = expected
            .iter()
            .filter(|name| !actual.contains(name.as_str()))
            .cloned()
            .collect();
        let unexpected: Vec<String> = actual
            .iter()
            .filter(|name| !expected.contains(**name))
            .filter(|name| !(tied && **name == TIED_OUTPUT_WEIGHT))
            .map(|name| (*name).to_string())
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(true)
        } else {
            Err(Error::StateDictMismatch {
                missing,
                unexpected,
            })
        }
    }

    /// Copy the config files and whichever of `extra_files` exist into
    /// `out_dir`, returning the copied file names.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error.
    pub fn copy_assets(&self, out_dir: &Path, extra_files: &[String]) -> Result<Vec<String>> {
        let same_dir = match (std::fs::canonicalize(out_dir), std::fs::canonicalize(&self.dir)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };

        let mut copied = Vec::new();
        let names = [CONFIG_FILE, GENERATION_CONFIG_FILE]
            .into_iter()
            .chain(extra_files.iter().map(String::as_str));

        for name in names {
            if copied.iter().any(|c: &String| c == name) {
                continue;
            }
            let src = self.dir.join(name);
            if !src.is_file() {
                continue;
            }
            // copying a file onto itself would truncate it
            if !same_dir {
                std::fs::copy(&src, out_dir.join(name))?;
            }
            debug!(file = name, "copied model asset");
            copied.push(name.to_string());
        }

        Ok(copied)
    }
}
