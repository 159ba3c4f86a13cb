//! Browser automation seam
//!
//! The agent and the companion only talk to these traits. The Chromium/CDP
//! backend lives in [`chromium`]; tests drive scripted fakes from
//! `crate::test_utils`.

pub mod chromium;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use chromium::ChromiumLauncher;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Page operation failed: {0}")]
    Page(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Everything needed to start a persistent browser for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchProfile {
    pub account_id: String,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: String,
    pub args: Vec<String>,
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserContext>, BrowserError>;
}

/// A running browser bound to one profile directory
#[async_trait]
pub trait BrowserContext: Send {
    async fn new_page(&mut self) -> Result<Box<dyn PageSurface>, BrowserError>;

    /// Shuts the browser down and flushes the profile to disk
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

/// The handful of page operations extraction needs
#[async_trait]
pub trait PageSurface: Send + Sync {
    /// Navigates and waits for the document, failing after `timeout`
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Serialized DOM of the current document
    async fn content(&self) -> Result<String, BrowserError>;

    /// Full-page PNG written to `path`
    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError>;
}
