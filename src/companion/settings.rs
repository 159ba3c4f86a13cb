//! Operator-editable companion settings

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod defaults {
    pub const API_ENDPOINT: &str = "http://localhost:8000/api";
    pub const AUTO_SYNC: bool = true;
    pub const SYNC_INTERVAL_MS: u64 = 300_000;
    pub const REQUEST_TIMEOUT_MS: u64 = 10_000;
    pub const SETTLE_DELAY_MS: u64 = 3_000;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid companion settings: {0}")]
pub struct SettingsError(pub String);

/// Persisted next to the sync state. Changing them rebuilds the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionSettings {
    pub api_endpoint: String,
    pub sync_api_key: String,

    /// Sync automatically when a known page loads
    pub auto_sync: bool,

    /// How often the current page is re-offered for auto-sync
    pub sync_interval_ms: u64,

    /// Bound on the first relay attempt; the retry is unbounded
    pub request_timeout_ms: u64,

    pub settle_delay_ms: u64,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            api_endpoint: defaults::API_ENDPOINT.to_string(),
            sync_api_key: String::new(),
            auto_sync: defaults::AUTO_SYNC,
            sync_interval_ms: defaults::SYNC_INTERVAL_MS,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
        }
    }
}

impl CompanionSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sync_interval_ms == 0 {
            return Err(SettingsError("sync_interval_ms must be greater than 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(SettingsError("request_timeout_ms must be greater than 0".into()));
        }
        let endpoint = url::Url::parse(&self.api_endpoint)
            .map_err(|e| SettingsError(format!("api_endpoint is not a valid URL: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SettingsError(format!("api_endpoint must be http or https, got {}", endpoint.scheme())));
        }
        Ok(())
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
