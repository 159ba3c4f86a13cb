//! Per-account browser sessions backed by persistent profile directories
//!
//! One profile per account, created on first use and reused across restarts so
//! cookies survive. Within this process a profile is leased to a single
//! holder; a second `acquire` for the same account fails fast with
//! [`SessionError::ProfileBusy`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::browser::{BrowserContext, BrowserError, BrowserLauncher, LaunchProfile, PageSurface, Viewport};
use super::config::{FleetConfig, defaults};
use super::diagnostics::sanitize;

const AUTOMATION_FLAGS: &[&str] = &["--disable-blink-features=AutomationControlled", "--no-sandbox"];

const LOGIN_URL_MARKERS: &[&str] = &["login", "buyer/login", "signin"];

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Profile for account {0} is already in use")]
    ProfileBusy(String),

    #[error("Failed to prepare profile directory {path:?}: {source}")]
    ProfileDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Browser launch failed for account {account}: {source}")]
    Launch {
        account: String,
        #[source]
        source: BrowserError,
    },

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Session for account {0} is already released")]
    Released(String),
}

/// Launch parameters shared by every session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub profiles_dir: PathBuf,
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            profiles_dir: PathBuf::from(defaults::PROFILES_DIR),
            headless: defaults::HEADLESS,
            viewport: Viewport { width: defaults::VIEWPORT_WIDTH, height: defaults::VIEWPORT_HEIGHT },
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl From<&FleetConfig> for SessionSettings {
    fn from(config: &FleetConfig) -> Self {
        Self { profiles_dir: config.profiles_dir.clone(), headless: config.headless, ..Self::default() }
    }
}

type LeaseSet = Arc<Mutex<HashSet<String>>>;

fn lock_leases(leases: &LeaseSet) -> MutexGuard<'_, HashSet<String>> {
    // The set stays consistent even if a holder panicked mid-insert
    leases.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub struct SessionManager {
    settings: SessionSettings,
    launcher: Arc<dyn BrowserLauncher>,
    leases: LeaseSet,
}

impl SessionManager {
    pub fn new(settings: SessionSettings, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self { settings, launcher, leases: Arc::new(Mutex::new(HashSet::new())) }
    }

    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Always a direct child of `profiles_dir`, whatever the account id contains
    pub fn profile_dir(&self, account_id: &str) -> PathBuf {
        self.settings.profiles_dir.join(format!("profile_{}", sanitize(account_id)))
    }

    pub fn is_leased(&self, account_id: &str) -> bool {
        lock_leases(&self.leases).contains(account_id)
    }

    /// Leases the account's profile and launches a browser on it
    pub async fn acquire(&self, account_id: &str) -> Result<Session, SessionError> {
        let lease = ProfileLease::take(&self.leases, account_id)?;

        let user_data_dir = self.profile_dir(account_id);
        tokio::fs::create_dir_all(&user_data_dir)
            .await
            .map_err(|source| SessionError::ProfileDir { path: user_data_dir.clone(), source })?;

        let profile = LaunchProfile {
            account_id: account_id.to_string(),
            user_data_dir,
            headless: self.settings.headless,
            viewport: self.settings.viewport,
            user_agent: self.settings.user_agent.clone(),
            args: AUTOMATION_FLAGS.iter().map(ToString::to_string).collect(),
        };

        let context = self
            .launcher
            .launch(&profile)
            .await
            .map_err(|source| SessionError::Launch { account: account_id.to_string(), source })?;

        debug!(account = %account_id, "session acquired");
        Ok(Session { account_id: account_id.to_string(), context: Some(context), _lease: lease })
    }
}

/// Removes the account from the lease set when dropped
struct ProfileLease {
    account_id: String,
    leases: LeaseSet,
}

impl ProfileLease {
    fn take(leases: &LeaseSet, account_id: &str) -> Result<Self, SessionError> {
        if !lock_leases(leases).insert(account_id.to_string()) {
            return Err(SessionError::ProfileBusy(account_id.to_string()));
        }
        Ok(Self { account_id: account_id.to_string(), leases: Arc::clone(leases) })
    }
}

impl Drop for ProfileLease {
    fn drop(&mut self) {
        lock_leases(&self.leases).remove(&self.account_id);
    }
}

/// A leased profile with a running browser.
///
/// Call [`Session::release`] on every path. Dropping an unreleased session
/// still frees the lease; the browser is torn down by its own drop.
pub struct Session {
    account_id: String,
    context: Option<Box<dyn BrowserContext>>,
    _lease: ProfileLease,
}

impl Session {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub async fn new_page(&mut self) -> Result<Box<dyn PageSurface>, SessionError> {
        let context = self.context.as_mut().ok_or_else(|| SessionError::Released(self.account_id.clone()))?;
        Ok(context.new_page().await?)
    }

    /// Closes the browser, then frees the profile lease
    pub async fn release(mut self) {
        if let Some(context) = self.context.take() {
            match context.close().await {
                Ok(()) => info!(account = %self.account_id, "🔒 Session released"),
                Err(e) => warn!(account = %self.account_id, "Browser close failed: {}", e),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.context.is_some() {
            warn!(account = %self.account_id, "Session dropped without release");
        }
    }
}

/// URL-only login-wall check: the platform redirects expired sessions to a login route
pub fn is_login_page(url: &str) -> bool {
    let lowered = url.to_lowercase();
    LOGIN_URL_MARKERS.iter().any(|marker| lowered.contains(marker))
}
