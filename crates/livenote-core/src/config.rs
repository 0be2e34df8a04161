//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/livenote/config.toml)
//! 3. Environment variables (LIVENOTE_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "LIVENOTE";

/// Number of notes returned by one incremental load
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite db, user id)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum number of notes per page when loading incrementally
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Allow `acquire` to take over locks older than this many seconds.
    ///
    /// Unset means locks never go stale and only an explicit release frees them.
    #[serde(default)]
    pub lock_stale_after_secs: Option<u64>,

    /// Log file path (defaults to `<data_dir>/livenote.log`)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Log level filter for the livenote crates
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            page_size: DEFAULT_PAGE_SIZE,
            lock_stale_after_secs: None,
            log_file: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (LIVENOTE_DATA_DIR, LIVENOTE_PAGE_SIZE, ...)
    /// 2. Config file (~/.config/livenote/config.toml or LIVENOTE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Build a configuration rooted at `data_dir` with every other value defaulted
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Unparseable or zero sizes keep the current value
        if let Ok(val) = std::env::var(format!("{}_PAGE_SIZE", ENV_PREFIX)) {
            if let Ok(size) = val.parse::<usize>() {
                if size > 0 {
                    self.page_size = size;
                }
            }
        }

        // Empty string clears the staleness threshold
        if let Ok(val) = std::env::var(format!("{}_LOCK_STALE_AFTER", ENV_PREFIX)) {
            self.lock_stale_after_secs = if val.is_empty() {
                None
            } else {
                val.parse().ok().or(self.lock_stale_after_secs)
            };
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }
    }

    /// Ensure data directory exists
    pub fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with LIVENOTE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("livenote")
            .join("config.toml")
    }

    /// Get the path to the SQLite document store
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("notes.db")
    }

    /// Get the path to the persisted user id
    pub fn user_id_path(&self) -> PathBuf {
        self.data_dir.join("user_id")
    }

    /// Get the log file path
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("livenote.log"))
    }

    /// Lock staleness threshold, if configured
    pub fn lock_stale_after(&self) -> Option<Duration> {
        self.lock_stale_after_secs.map(Duration::from_secs)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("livenote")
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "LIVENOTE_DATA_DIR",
        "LIVENOTE_PAGE_SIZE",
        "LIVENOTE_LOCK_STALE_AFTER",
        "LIVENOTE_LOG_LEVEL",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.page_size, 20);
        assert!(config.lock_stale_after_secs.is_none());
        assert!(config.lock_stale_after().is_none());
        assert_eq!(config.log_level, "info");
        assert!(config.data_dir.ends_with("livenote"));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::with_data_dir("/data/livenote");

        assert!(config.database_path().ends_with("notes.db"));
        assert!(config.user_id_path().ends_with("user_id"));
        assert_eq!(config.log_path(), PathBuf::from("/data/livenote/livenote.log"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("LIVENOTE_DATA_DIR", "/tmp/livenote-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/livenote-test"));
    }

    #[test]
    fn test_env_override_page_size() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("LIVENOTE_PAGE_SIZE", "50");
        config.apply_env_overrides();
        assert_eq!(config.page_size, 50);

        // Zero and garbage are ignored
        env::set_var("LIVENOTE_PAGE_SIZE", "0");
        config.apply_env_overrides();
        assert_eq!(config.page_size, 50);

        env::set_var("LIVENOTE_PAGE_SIZE", "lots");
        config.apply_env_overrides();
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn test_env_override_lock_stale_after() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("LIVENOTE_LOCK_STALE_AFTER", "300");
        config.apply_env_overrides();
        assert_eq!(config.lock_stale_after(), Some(Duration::from_secs(300)));

        // Empty string clears it
        env::set_var("LIVENOTE_LOCK_STALE_AFTER", "");
        config.apply_env_overrides();
        assert!(config.lock_stale_after_secs.is_none());
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/livenote"),
            page_size: 10,
            lock_stale_after_secs: Some(60),
            log_file: None,
            log_level: "debug".to_string(),
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("page_size"));
        assert!(toml_str.contains("lock_stale_after_secs"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.page_size, 10);
        assert_eq!(parsed.lock_stale_after_secs, Some(60));
        assert_eq!(parsed.log_level, "debug");
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            page_size = 5
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.page_size, 5);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("LIVENOTE_DATA_DIR", temp_dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();

        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.data_dir.exists());
    }
}
