//! Account roster loading
//!
//! The roster is a JSON array of accounts. It is re-read at the start of each
//! cycle so edits take effect without a restart.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::domain::Account;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Failed to read roster {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid roster {path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of the enabled accounts for a cycle
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn enabled_accounts(&self) -> Result<Vec<Account>, RosterError>;
}

#[derive(Debug, Clone)]
pub struct JsonRoster {
    path: PathBuf,
}

impl JsonRoster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry, enabled or not
    pub async fn load_all(&self) -> Result<Vec<Account>, RosterError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RosterError::Io { path: self.path.clone(), source })?;
        serde_json::from_str(&content).map_err(|source| RosterError::Format { path: self.path.clone(), source })
    }
}

#[async_trait]
impl RosterSource for JsonRoster {
    async fn enabled_accounts(&self) -> Result<Vec<Account>, RosterError> {
        let all = self.load_all().await?;
        let total = all.len();
        let enabled: Vec<Account> = all.into_iter().filter(|a| a.enabled).collect();
        debug!("Roster {:?}: {} of {} accounts enabled", self.path, enabled.len(), total);
        Ok(enabled)
    }
}
