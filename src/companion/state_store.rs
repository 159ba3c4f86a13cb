//! Companion local state
//!
//! Independent maps keyed by account id plus the connected identity and the
//! settings, all persisted to one JSON file. Every change is a single
//! read-modify-write-persist step under one async mutex and an exclusive lock
//! on `<state>.lock`, starting from the file as it is on disk, so a CLI
//! process and a running companion never overwrite each other's keys. Reads
//! refresh the cached copy from disk first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::settings::{CompanionSettings, SettingsError};
use crate::domain::{ConnectedAccount, DailySyncDecision, DailySyncState, SyncStatus, SyncTrigger};

pub const ALREADY_SYNCED_TODAY: &str = "already synced today";

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Companion state I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Companion state file {path:?} is corrupt: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Companion state file {path:?} holds invalid settings: {source}")]
    InvalidSettings {
        path: PathBuf,
        #[source]
        source: SettingsError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionState {
    pub connected_account: Option<ConnectedAccount>,
    pub last_sync_dates: HashMap<String, NaiveDate>,
    pub last_status: HashMap<String, SyncStatus>,
    pub last_errors: HashMap<String, String>,
    pub settings: CompanionSettings,
}

impl CompanionState {
    pub fn daily_state(&self, account_id: &str) -> DailySyncState {
        DailySyncState {
            last_sync_date: self.last_sync_dates.get(account_id).copied(),
            last_status: self.last_status.get(account_id).copied(),
            last_error: self.last_errors.get(account_id).cloned(),
        }
    }

    /// At most one successful auto-sync per account per calendar day
    pub fn auto_sync_decision(&self, account_id: &str, today: NaiveDate) -> DailySyncDecision {
        if self.daily_state(account_id).synced_on(today) {
            DailySyncDecision::skip(ALREADY_SYNCED_TODAY)
        } else {
            DailySyncDecision::proceed()
        }
    }

    /// Only auto-syncs stamp the date; a manual sync must not consume the day's auto slot.
    pub fn record_success(&mut self, account_id: &str, today: NaiveDate, trigger: SyncTrigger) {
        if !trigger.is_manual() {
            self.last_sync_dates.insert(account_id.to_string(), today);
        }
        self.last_status.insert(account_id.to_string(), SyncStatus::Success);
        self.last_errors.remove(account_id);
    }

    pub fn record_failure(&mut self, account_id: &str, message: impl Into<String>) {
        self.last_status.insert(account_id.to_string(), SyncStatus::Failed);
        self.last_errors.insert(account_id.to_string(), message.into());
    }
}

#[derive(Debug)]
pub struct StateStore {
    path: Option<PathBuf>,
    state: Mutex<CompanionState>,
}

impl StateStore {
    /// Loads `path`, or starts empty when the file does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StateStoreError> {
        let path = path.into();
        let state = match load(&path).await? {
            Some(state) => state,
            None => {
                info!("No companion state at {:?}, starting fresh", path);
                CompanionState::default()
            }
        };
        Ok(Self { path: Some(path), state: Mutex::new(state) })
    }

    /// Not persisted anywhere
    pub fn in_memory(state: CompanionState) -> Self {
        Self { path: None, state: Mutex::new(state) }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&CompanionState) -> R) -> R {
        let mut guard = self.state.lock().await;
        self.refresh(&mut guard).await;
        f(&guard)
    }

    pub async fn snapshot(&self) -> CompanionState {
        self.read(CompanionState::clone).await
    }

    /// Applies `f` to the state on disk and persists the result as one critical section
    pub async fn update<R>(&self, f: impl FnOnce(&mut CompanionState) -> R) -> Result<R, StateStoreError> {
        let mut guard = self.state.lock().await;
        let _file_lock = self.lock_file().await?;

        let mut next = match &self.path {
            Some(path) => load(path).await?.unwrap_or_else(|| guard.clone()),
            None => guard.clone(),
        };
        let out = f(&mut next);
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    /// Picks up writes made by other processes; a bad file keeps the cached copy
    async fn refresh(&self, cached: &mut CompanionState) {
        let Some(path) = &self.path else {
            return;
        };
        match load(path).await {
            Ok(Some(state)) => *cached = state,
            Ok(None) => {}
            Err(e) => warn!("Keeping cached companion state: {}", e),
        }
    }

    /// Exclusive advisory lock shared with every process using the same state file.
    /// Released when the returned handle is dropped.
    async fn lock_file(&self) -> Result<Option<std::fs::File>, StateStoreError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let io_err = |source| StateStoreError::Io { path: path.clone(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let lock_path = path.with_extension("json.lock");
        let file = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().create(true).truncate(false).write(true).open(&lock_path)?;
            file.lock()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| io_err(std::io::Error::other(e)))?
        .map_err(io_err)?;
        Ok(Some(file))
    }

    async fn persist(&self, state: &CompanionState) -> Result<(), StateStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| StateStoreError::Io { path: path.clone(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(state)
            .map_err(|source| StateStoreError::Format { path: path.clone(), source })?;

        // Write-then-rename so a crash never leaves a half-written file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        debug!("Companion state persisted to {:?}", path);
        Ok(())
    }
}

/// `None` when the file does not exist yet
async fn load(path: &Path) -> Result<Option<CompanionState>, StateStoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StateStoreError::Io { path: path.to_path_buf(), source }),
    };
    let state: CompanionState = serde_json::from_str(&content)
        .map_err(|source| StateStoreError::Format { path: path.to_path_buf(), source })?;
    state
        .settings
        .validate()
        .map_err(|source| StateStoreError::InvalidSettings { path: path.to_path_buf(), source })?;
    Ok(Some(state))
}
