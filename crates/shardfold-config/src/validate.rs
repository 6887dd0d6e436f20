//! Configuration validation for shardfold

use crate::config::{ExportConfig, LoadConfig, ShardfoldConfig};
use crate::{ConfigError, Result};
use std::fmt;

/// Upper bound on concurrent shard loads
pub const MAX_LOAD_WORKERS: usize = 256;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Errors that prevent the configuration from being used
    pub errors: Vec<ValidationError>,
    /// Non-blocking warnings about potential configuration issues
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Creates a new empty validation result
    #[must_use]
    pub const fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Returns true if there are no validation errors
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true if there are any warnings present
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Adds a validation error to the result
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Adds a validation warning to the result
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Merges another validation result into this one
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Collapse the errors into a single `ConfigError`, if any
    pub fn into_result(self) -> Result<Vec<ValidationWarning>> {
        if self.errors.is_empty() {
            return Ok(self.warnings);
        }
        let message = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Validation(message))
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validation error details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The configuration field that failed validation
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Error classification code
    pub code: ErrorCode,
}

impl ValidationError {
    /// Creates a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.code, self.field, self.message)
    }
}

/// Validation warning details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The configuration field that triggered the warning
    pub field: String,
    /// Human-readable warning message
    pub message: String,
}

impl ValidationWarning {
    /// Creates a new validation warning
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[WARNING] {}: {}", self.field, self.message)
    }
}

/// Error code classifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A value is outside the acceptable range
    OutOfRange,
    /// A value has an invalid format
    InvalidFormat,
}

/// Validates a complete `ShardfoldConfig`
#[must_use]
pub fn validate_config(config: &ShardfoldConfig) -> ValidationResult {
    let mut result = ValidationResult::new();
    result.merge(validate_load(&config.load));
    result.merge(validate_export(&config.export));
    result
}

/// Validates shard loading settings
#[must_use]
pub fn validate_load(config: &LoadConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.workers == 0 || config.workers > MAX_LOAD_WORKERS {
        result.add_error(ValidationError::new(
            "load.workers",
            format!(
                "Worker count {} must be between 1 and {MAX_LOAD_WORKERS}",
                config.workers
            ),
            ErrorCode::OutOfRange,
        ));
    }

    if !config.verify_checksums {
        result.add_warning(ValidationWarning::new(
            "load.verify_checksums",
            "Checksum verification disabled; corrupt shards may go unnoticed",
        ));
    }
    result
}

/// Validates export settings
#[must_use]
pub fn validate_export(config: &ExportConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    match parse_byte_size(&config.max_shard_size) {
        Ok(0) => result.add_error(ValidationError::new(
            "export.max_shard_size",
            "Maximum shard size must be greater than 0",
            ErrorCode::OutOfRange,
        )),
        Ok(_) => {}
        Err(e) => result.add_error(ValidationError::new(
            "export.max_shard_size",
            e.to_string(),
            ErrorCode::InvalidFormat,
        )),
    }

    if config.tokenizer_files.is_empty() {
        result.add_warning(ValidationWarning::new(
            "export.tokenizer_files",
            "No tokenizer files configured; output directory will hold weights only",
        ));
    }
    result
}

/// Parse a human-readable byte size such as `10GB`, `512MiB` or `4096`.
///
/// Decimal units (`KB`, `MB`, `GB`, `TB`) are powers of 1000, binary units
/// (`KiB`, `MiB`, `GiB`, `TiB`) powers of 1024. Units are case-insensitive.
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let invalid = |message: String| ConfigError::InvalidValue {
        field: "byte size".to_string(),
        message,
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| invalid(format!("Invalid byte size: {input}")))?;

    let multiplier: u64 = match unit.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        other => return Err(invalid(format!("Unknown size unit: {other}"))),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(format!("Byte size overflows: {input}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_size_units() {
        assert_eq!(parse_byte_size("4096").unwrap(), 4096);
        assert_eq!(parse_byte_size("10GB").unwrap(), 10_000_000_000);
        assert_eq!(parse_byte_size("5mb").unwrap(), 5_000_000);
        assert_eq!(parse_byte_size("512MiB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_byte_size(" 2 GiB ").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size("7B").unwrap(), 7);
    }

    #[test]
    fn test_parse_byte_size_invalid() {
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("GB").is_err());
        assert!(parse_byte_size("10XB").is_err());
        assert!(parse_byte_size("-5MB").is_err());
        assert!(parse_byte_size("99999999999TiB").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let result = validate_config(&ShardfoldConfig::default());
        assert!(result.is_valid());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = ShardfoldConfig::default();
        config.load.workers = 0;

        let result = validate_config(&config);
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].field, "load.workers");
        assert_eq!(result.errors[0].code, ErrorCode::OutOfRange);
    }

    #[test]
    fn test_bad_shard_size_rejected() {
        let mut config = ShardfoldConfig::default();
        config.export.max_shard_size = "lots".to_string();
        let result = validate_config(&config);
        assert_eq!(result.errors[0].code, ErrorCode::InvalidFormat);

        config.export.max_shard_size = "0GB".to_string();
        let result = validate_config(&config);
        assert_eq!(result.errors[0].code, ErrorCode::OutOfRange);
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let mut config = ShardfoldConfig::default();
        config.load.verify_checksums = false;
        config.export.tokenizer_files.clear();

        let result = validate_config(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.into_result().unwrap().len(), 2);
    }

    #[test]
    fn test_into_result_joins_errors() {
        let mut config = ShardfoldConfig::default();
        config.load.workers = 0;
        config.export.max_shard_size = "nope".to_string();

        let err = validate_config(&config).into_result().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("load.workers"));
        assert!(message.contains("export.max_shard_size"));
    }
}
