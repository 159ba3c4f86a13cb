//! Chromium over CDP via `chromiumoxide`

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::HeadlessMode;
use chromiumoxide::cdp::browser_protocol::emulation;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserContext, BrowserError, BrowserLauncher, LaunchProfile, PageSurface, Viewport};

/// Launches a local Chrome/Chromium per profile
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
    request_timeout: Duration,
}

impl ChromiumLauncher {
    pub const fn new(executable: Option<PathBuf>, request_timeout: Duration) -> Self {
        Self { executable, request_timeout }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserContext>, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile.user_data_dir)
            .window_size(profile.viewport.width, profile.viewport.height)
            .request_timeout(self.request_timeout)
            .arg(format!("--user-agent={}", profile.user_agent));

        for arg in &profile.args {
            builder = builder.arg(arg.clone());
        }
        builder = if profile.headless { builder.headless_mode(HeadlessMode::New) } else { builder.with_head() };
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }

        let config = builder.build().map_err(BrowserError::Launch)?;
        let (browser, mut handler) =
            Browser::launch(config).await.map_err(|e| BrowserError::Launch(e.to_string()))?;

        let account_id = profile.account_id.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(account = %account_id, "CDP handler error: {}", e);
                }
            }
        });

        info!(account = %profile.account_id, "🌐 Browser launched with profile {:?}", profile.user_data_dir);
        Ok(Box::new(ChromiumContext { browser, handler_task, viewport: profile.viewport }))
    }
}

struct ChromiumContext {
    browser: Browser,
    handler_task: JoinHandle<()>,
    viewport: Viewport,
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn new_page(&mut self) -> Result<Box<dyn PageSurface>, BrowserError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?;

        let metrics = emulation::SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(self.viewport.width))
            .height(i64::from(self.viewport.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(BrowserError::Page)?;
        page.execute(metrics).await.map_err(|e| BrowserError::Page(e.to_string()))?;

        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(mut self: Box<Self>) -> Result<(), BrowserError> {
        let closed = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            warn!("Browser process did not exit cleanly: {}", e);
        }
        self.handler_task.abort();
        closed.map(|_| ()).map_err(|e| BrowserError::Page(e.to_string()))
    }
}

impl Drop for ChromiumContext {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageSurface for ChromiumPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation { url: url.to_string(), reason: e.to_string() }),
            Err(_) => Err(BrowserError::NavigationTimeout { url: url.to_string(), timeout }),
        }
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.page
            .url()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| BrowserError::Page(e.to_string()))
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page.content().await.map_err(|e| BrowserError::Page(e.to_string()))
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }
}
