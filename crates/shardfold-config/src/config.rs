//! Configuration Loading System
//!
//! Provides configuration loading from multiple sources with priority:
//! 1. Default values
//! 2. Configuration files
//! 3. Environment variables (highest priority)

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Load from a file
    File(PathBuf),
    /// Load from environment variables
    Env,
    /// Use default values
    Default,
    /// Load from in-memory string (for testing)
    Memory(String),
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::InvalidValue {
                field: "log.level".to_string(),
                message: format!("Invalid log level: {s}"),
            }),
        }
    }
}

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Multi-line human readable format
    Pretty,
    /// Single-line human readable format
    #[default]
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            _ => Err(ConfigError::InvalidValue {
                field: "log.format".to_string(),
                message: format!("Invalid log format: {s}"),
            }),
        }
    }
}

/// What to do with a parameter whose per-rank values are byte-identical
/// but still concatenable along axis 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaPolicy {
    /// Concatenate anyway and report the parameter as a suspected replica
    #[default]
    Concatenate,
    /// Keep the rank-0 value when every rank holds identical bytes
    Deduplicate,
}

impl std::str::FromStr for ReplicaPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "concatenate" | "concat" => Ok(Self::Concatenate),
            "deduplicate" | "dedup" => Ok(Self::Deduplicate),
            _ => Err(ConfigError::InvalidValue {
                field: "aggregate.replicas".to_string(),
                message: format!("Invalid replica policy: {s}"),
            }),
        }
    }
}

/// What to do with a parameter that only some ranks hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoveragePolicy {
    /// Aggregate whatever ranks hold the parameter
    #[default]
    Union,
    /// Every rank must hold every parameter
    Strict,
}

impl std::str::FromStr for CoveragePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "union" => Ok(Self::Union),
            "strict" => Ok(Self::Strict),
            _ => Err(ConfigError::InvalidValue {
                field: "aggregate.coverage".to_string(),
                message: format!("Invalid coverage policy: {s}"),
            }),
        }
    }
}

/// Shard loading configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Number of shards loaded concurrently (1 = sequential)
    pub workers: usize,
    /// Verify per-entry checksums while decoding
    pub verify_checksums: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            verify_checksums: true,
        }
    }
}

/// Aggregation configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AggregateConfig {
    /// Handling of concatenable replicated parameters
    pub replicas: ReplicaPolicy,
    /// Handling of partially covered parameters
    pub coverage: CoveragePolicy,
}

/// Export configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Maximum size of one weights file (e.g. "10GB", "512MiB")
    pub max_shard_size: String,
    /// Check consolidated names against the target model's reference weights
    pub validate_parameters: bool,
    /// Tokenizer assets copied from the target model directory when present
    pub tokenizer_files: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_shard_size: "10GB".to_string(),
            validate_parameters: true,
            tokenizer_files: [
                "tokenizer.json",
                "tokenizer_config.json",
                "special_tokens_map.json",
                "added_tokens.json",
                "vocab.json",
                "merges.txt",
                "tokenizer.model",
                "chat_template.jinja",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Log level
    pub level: LogLevel,
    /// Log format
    pub format: LogFormat,
}

/// Top-level shardfold configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ShardfoldConfig {
    /// Shard loading
    pub load: LoadConfig,
    /// Parameter aggregation
    pub aggregate: AggregateConfig,
    /// Model export
    pub export: ExportConfig,
    /// Logging
    pub log: LogConfig,
}

/// Configuration loader
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: vec![ConfigSource::Default],
            env_prefix: None,
        }
    }

    /// Add a file source
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.sources
            .push(ConfigSource::File(Self::expand_path(path.as_ref())));
        self
    }

    /// Add an in-memory TOML source
    pub fn with_str(mut self, content: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Memory(content.into()));
        self
    }

    /// Add environment variable source with prefix
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.sources.push(ConfigSource::Env);
        self
    }

    /// Load configuration from all sources, later sources winning
    pub fn load(&self) -> Result<ShardfoldConfig> {
        let mut config = ShardfoldConfig::default();

        for source in &self.sources {
            match source {
                ConfigSource::Default => {}
                ConfigSource::File(path) => {
                    let content = std::fs::read_to_string(path)?;
                    config = Self::load_from_str(&content)?;
                }
                ConfigSource::Memory(content) => {
                    config = Self::load_from_str(content)?;
                }
                ConfigSource::Env => {
                    if let Some(prefix) = &self.env_prefix {
                        config = Self::apply_env_overrides(config, prefix)?;
                    }
                }
            }
        }

        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(toml: &str) -> Result<ShardfoldConfig> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Per-user configuration file location (`<config dir>/shardfold/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shardfold").join("config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut config: ShardfoldConfig, prefix: &str) -> Result<ShardfoldConfig> {
        if let Ok(val) = std::env::var(format!("{prefix}_LOAD_WORKERS")) {
            config.load.workers = val
                .parse()
                .map_err(|_| ConfigError::EnvVar(format!("Invalid workers value: {val}")))?;
        }
        if let Ok(val) = std::env::var(format!("{prefix}_LOAD_VERIFY_CHECKSUMS")) {
            config.load.verify_checksums = val.parse().map_err(|_| {
                ConfigError::EnvVar(format!("Invalid verify_checksums value: {val}"))
            })?;
        }

        if let Ok(val) = std::env::var(format!("{prefix}_AGGREGATE_REPLICAS")) {
            config.aggregate.replicas = val.parse()?;
        }
        if let Ok(val) = std::env::var(format!("{prefix}_AGGREGATE_COVERAGE")) {
            config.aggregate.coverage = val.parse()?;
        }

        if let Ok(val) = std::env::var(format!("{prefix}_EXPORT_MAX_SHARD_SIZE")) {
            config.export.max_shard_size = val;
        }
        if let Ok(val) = std::env::var(format!("{prefix}_EXPORT_VALIDATE_PARAMETERS")) {
            config.export.validate_parameters = val.parse().map_err(|_| {
                ConfigError::EnvVar(format!("Invalid validate_parameters value: {val}"))
            })?;
        }

        if let Ok(val) = std::env::var(format!("{prefix}_LOG_LEVEL")) {
            config.log.level = val.parse()?;
        }
        if let Ok(val) = std::env::var(format!("{prefix}_LOG_FORMAT")) {
            config.log.format = val.parse()?;
        }

        Ok(config)
    }

    /// Expand a leading `~/` to the home directory
    pub fn expand_path(path: &Path) -> PathBuf {
        if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        path.to_path_buf()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
