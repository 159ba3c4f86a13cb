//! Configuration infrastructure
//!
//! Configuration is layered with the `config` crate:
//! 1. Built-in defaults (the `defaults` module below)
//! 2. An optional file passed with `--config` (any format `config` understands)
//! 3. Environment variables prefixed with `SHOPEE_BOT_`
//!
//! The result is an immutable [`FleetConfig`]. Changing it means restarting
//! the process; nothing is hot-reloaded.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }
}

/// Fleet-wide settings, read once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Backend API root, e.g. `http://localhost:8000/api`
    pub api_base: String,

    /// Shared secret sent as `X-Access-Code`
    pub access_code: String,

    /// JSON roster of tracked accounts
    pub roster_path: PathBuf,

    /// Batch width
    pub max_parallel_agents: usize,

    /// Delay between cycle starts
    pub sync_interval_ms: u64,

    /// Pause between consecutive batches of one cycle
    pub batch_pause_ms: u64,

    pub navigation_timeout_ms: u64,

    /// Fixed wait after navigation before the DOM is read
    pub settle_delay_ms: u64,

    pub ingest_timeout_ms: u64,
    pub ingest_batch_timeout_ms: u64,

    /// How long Ctrl-C waits for an in-flight cycle
    pub shutdown_grace_ms: u64,

    pub profiles_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub headless: bool,

    /// Chrome/Chromium binary; auto-detected when unset
    pub chrome_executable: Option<PathBuf>,

    /// Optional JSON probe-table override
    pub selectors_file: Option<PathBuf>,

    pub companion_state_file: PathBuf,

    pub logging: LoggingConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::API_BASE.to_string(),
            access_code: String::new(),
            roster_path: PathBuf::from(defaults::ROSTER_PATH),
            max_parallel_agents: defaults::MAX_PARALLEL_AGENTS,
            sync_interval_ms: defaults::SYNC_INTERVAL_MS,
            batch_pause_ms: defaults::BATCH_PAUSE_MS,
            navigation_timeout_ms: defaults::NAVIGATION_TIMEOUT_MS,
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
            ingest_timeout_ms: defaults::INGEST_TIMEOUT_MS,
            ingest_batch_timeout_ms: defaults::INGEST_BATCH_TIMEOUT_MS,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE_MS,
            profiles_dir: PathBuf::from(defaults::PROFILES_DIR),
            screenshots_dir: PathBuf::from(defaults::SCREENSHOTS_DIR),
            headless: defaults::HEADLESS,
            chrome_executable: None,
            selectors_file: None,
            companion_state_file: default_companion_state_file(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Defaults, then `path` if given, then `SHOPEE_BOT_*` environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Same as [`Self::load`], reading the environment layer from `env` instead of the
    /// process environment when given.
    ///
    /// Top-level keys use a single underscore after the prefix
    /// (`SHOPEE_BOT_MAX_PARALLEL_AGENTS`); nested keys use `__`
    /// (`SHOPEE_BOT_LOGGING__LEVEL`).
    pub fn load_with_env(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Logs the effective settings; call once logging is initialised
    pub fn log_summary(&self) {
        info!(
            "⚙️ Configuration loaded: api_base={}, roster={:?}, max_parallel_agents={}, sync_interval_ms={}, access_code_set={}",
            self.api_base,
            self.roster_path,
            self.max_parallel_agents,
            self.sync_interval_ms,
            !self.access_code.is_empty()
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_agents == 0 {
            return Err(ConfigError::validation("max_parallel_agents must be greater than 0"));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::validation("sync_interval_ms must be greater than 0"));
        }
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::validation("api_base must not be empty"));
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| ConfigError::validation(format!("api_base is not a valid URL: {}", e)))?;
        if self.navigation_timeout_ms == 0 || self.ingest_timeout_ms == 0 || self.ingest_batch_timeout_ms == 0 {
            return Err(ConfigError::validation("timeouts must be greater than 0"));
        }
        Ok(())
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub const fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub const fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }

    pub const fn ingest_batch_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_batch_timeout_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_companion_state_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(defaults::APP_DIR_NAME)
        .join(defaults::COMPANION_STATE_FILE)
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable structured JSON logging in the file layer
    pub json_format: bool,

    pub console_output: bool,
    pub file_output: bool,

    /// Directory for log files; `logs/` next to the executable when unset
    pub log_dir: Option<PathBuf>,

    /// Maximum number of rolled log files kept at startup
    pub max_files: u32,

    pub auto_cleanup_logs: bool,

    /// Per-module level overrides applied unless the level is trace
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("chromiumoxide".to_string(), "warn".to_string());
                filters.insert("tungstenite".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("hyper_util".to_string(), "warn".to_string());
                filters.insert("html5ever".to_string(), "warn".to_string());
                filters.insert("selectors".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

/// Default configuration values
pub mod defaults {
    pub const ENV_PREFIX: &str = "SHOPEE_BOT";
    pub const APP_DIR_NAME: &str = "shopee-bot";

    pub const API_BASE: &str = "http://localhost:8000/api";
    pub const ROSTER_PATH: &str = "accounts.json";

    pub const MAX_PARALLEL_AGENTS: usize = 5;
    pub const SYNC_INTERVAL_MS: u64 = 60_000;
    pub const BATCH_PAUSE_MS: u64 = 1_000;

    pub const NAVIGATION_TIMEOUT_MS: u64 = 30_000;
    pub const SETTLE_DELAY_MS: u64 = 3_000;

    pub const INGEST_TIMEOUT_MS: u64 = 10_000;
    pub const INGEST_BATCH_TIMEOUT_MS: u64 = 30_000;

    pub const SHUTDOWN_GRACE_MS: u64 = 2_000;

    pub const PROFILES_DIR: &str = "profiles";
    pub const SCREENSHOTS_DIR: &str = "screenshots";

    /// The original fleet ran headed; profiles stay usable for manual login that way.
    pub const HEADLESS: bool = false;

    pub const VIEWPORT_WIDTH: u32 = 1280;
    pub const VIEWPORT_HEIGHT: u32 = 800;
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

    pub const COMPANION_STATE_FILE: &str = "companion_state.json";

    // Logging
    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = true;
    pub const LOG_FILE_PREFIX: &str = "bot.log";
    pub const LOG_MAX_FILES: u32 = 7;
    pub const LOG_AUTO_CLEANUP: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_parallel_agents, 5);
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
        assert_eq!(config.settle_delay(), Duration::from_secs(3));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
    }

    #[test]
    fn zero_batch_width_is_rejected() {
        let config = FleetConfig { max_parallel_agents: 0, ..FleetConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn malformed_api_base_is_rejected() {
        let config = FleetConfig { api_base: "not a url".into(), ..FleetConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"api_base":"https://bot.example.com/api","max_parallel_agents":2,"logging":{{"level":"debug"}}}}"#
        )
        .unwrap();

        let config = FleetConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.api_base, "https://bot.example.com/api");
        assert_eq!(config.max_parallel_agents, 2);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.sync_interval_ms, defaults::SYNC_INTERVAL_MS);
        assert!(config.logging.console_output);
    }

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
    }

    #[test]
    fn environment_overrides_top_level_keys() {
        let config = FleetConfig::load_with_env(
            None,
            env(&[
                ("SHOPEE_BOT_MAX_PARALLEL_AGENTS", "2"),
                ("SHOPEE_BOT_API_BASE", "https://bot.example.com/api"),
                ("SHOPEE_BOT_ACCESS_CODE", "letmein"),
                ("SHOPEE_BOT_SYNC_INTERVAL_MS", "120000"),
            ]),
        )
        .unwrap();

        assert_eq!(config.max_parallel_agents, 2);
        assert_eq!(config.api_base, "https://bot.example.com/api");
        assert_eq!(config.access_code, "letmein");
        assert_eq!(config.sync_interval(), Duration::from_secs(120));
    }

    #[test]
    fn environment_reaches_nested_keys_with_double_underscore() {
        let config = FleetConfig::load_with_env(None, env(&[("SHOPEE_BOT_LOGGING__LEVEL", "debug")])).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.max_parallel_agents, defaults::MAX_PARALLEL_AGENTS);
    }

    #[test]
    fn environment_beats_the_config_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"max_parallel_agents":2}}"#).unwrap();

        let config =
            FleetConfig::load_with_env(Some(file.path()), env(&[("SHOPEE_BOT_MAX_PARALLEL_AGENTS", "4")])).unwrap();

        assert_eq!(config.max_parallel_agents, 4);
    }

    #[test]
    fn invalid_environment_value_fails_validation() {
        let result = FleetConfig::load_with_env(None, env(&[("SHOPEE_BOT_MAX_PARALLEL_AGENTS", "0")]));

        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }
}
