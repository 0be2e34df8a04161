//! Logging setup
//!
//! Library code only emits `tracing` events; the embedding application
//! decides whether to install a subscriber. `init_logging` writes to the
//! configured log file so that terminal or UI output stays untouched.

use std::fs::{self, File};

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Initialize file-based logging for the livenote crates
///
/// Returns `Ok` if a global subscriber was already installed; the existing one
/// is left in place.
pub fn init_logging(config: &Config) -> Result<()> {
    let log_path = config.log_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }

    let log_file = File::create(&log_path)
        .with_context(|| format!("Failed to create log file {:?}", log_path))?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.log_level))
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
    Ok(())
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("livenote_core={}", level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_logging_creates_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(temp_dir.path());
        config.log_file = Some(temp_dir.path().join("logs").join("test.log"));

        init_logging(&config).unwrap();
        assert!(temp_dir.path().join("logs").join("test.log").exists());

        // A second call must not fail even though a subscriber is installed
        init_logging(&config).unwrap();
    }

    #[test]
    fn test_env_filter_targets_core_crate() {
        let filter = env_filter("debug");
        assert!(filter.to_string().contains("livenote_core=debug"));
    }
}
