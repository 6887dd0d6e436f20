//! shardfold-cli library exports
//!
//! Argument parsing, configuration loading and logging setup shared by the
//! `shardfold`, `gsm8k-prep` and `gsm8k-eval` binaries.

pub mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use shardfold_config::{ConfigLoader, ShardfoldConfig, ValidationWarning, validate_config};
use shardfold_tensor::{Consolidator, ExportReport};
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SHARDFOLD_CONFIG";
/// Prefix of per-setting environment overrides
pub const ENV_PREFIX: &str = "SHARDFOLD";

/// Convert a sharded FSDP checkpoint into a Hugging Face model checkpoint
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "shardfold")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding model_world_size_{W}_rank_{R}.pt files
    #[arg(long)]
    pub fsdp_checkpoint_path: String,
    /// Directory of the model the checkpoint was trained from
    #[arg(long)]
    pub hf_model_path: String,
    /// Directory the converted model is written to
    #[arg(long)]
    pub output_path: String,
}

/// Configuration file to read, if any: `$SHARDFOLD_CONFIG`, else the
/// per-user file when it exists
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    ConfigLoader::default_path().filter(|p| p.is_file())
}

/// Validated configuration and the warnings raised while checking it
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Effective configuration
    pub config: ShardfoldConfig,
    /// Non-fatal findings, to be logged once logging is up
    pub warnings: Vec<ValidationWarning>,
}

impl LoadedConfig {
    /// Log every validation warning
    pub fn report_warnings(&self) {
        for warning in &self.warnings {
            warn!(field = %warning.field, "{}", warning.message);
        }
    }
}

/// Load and validate configuration from file and environment
pub fn load_config() -> Result<LoadedConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path() {
        loader = loader.with_file(&path);
    }
    let config = loader
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("failed to load configuration")?;

    let warnings = validate_config(&config)
        .into_result()
        .context("invalid configuration")?;
    Ok(LoadedConfig { config, warnings })
}

/// Run a conversion
pub fn run(cli: &Cli, config: &ShardfoldConfig) -> Result<ExportReport> {
    info!(
        checkpoint = %cli.fsdp_checkpoint_path,
        model = %cli.hf_model_path,
        output = %cli.output_path,
        "converting checkpoint"
    );

    let report = Consolidator::new(config)
        .convert(&cli.fsdp_checkpoint_path, &cli.hf_model_path, &cli.output_path)
        .with_context(|| {
            format!(
                "failed to convert {} into {}",
                cli.fsdp_checkpoint_path, cli.output_path
            )
        })?;

    info!(output = %cli.output_path, "conversion completed");
    Ok(report)
}
