//! Subscriber setup for the command-line tools

use anyhow::{Result, anyhow};
use shardfold_config::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let init_result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_env_filter(filter)
            .try_init(),
    };
    init_result.map_err(|e| anyhow!("failed to init subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig::default();
        // another test may already own the global subscriber
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
