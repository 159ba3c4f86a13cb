//! Per-account agent: one browser session, every configured page, then ingest
//!
//! Page-level problems (login wall, navigation timeout, unreadable DOM) are
//! recorded and the agent moves on to the next page type. Nothing here
//! returns an error; the outcome is the [`AgentReport`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::{Account, Snapshot, SnapshotKind};
use crate::infrastructure::browser::PageSurface;
use crate::infrastructure::config::FleetConfig;
use crate::infrastructure::diagnostics::Diagnostics;
use crate::infrastructure::ingestion_client::SnapshotSink;
use crate::infrastructure::parsing::PageExtractor;
use crate::infrastructure::session_manager::{SessionManager, is_login_page};

/// Runs one account to completion. The supervisor only sees this seam.
#[async_trait]
pub trait AccountRunner: Send + Sync + 'static {
    async fn run(&self, account: &Account) -> AgentReport;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PageStatus {
    Captured,
    LoginRequired,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageReport {
    pub kind: SnapshotKind,
    pub status: PageStatus,
    pub url: Option<String>,
    pub screenshot: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReport {
    pub kind: SnapshotKind,
    pub accepted: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReport {
    pub account_id: String,
    /// At least one snapshot was captured
    pub success: bool,
    pub snapshots: Vec<Snapshot>,
    pub pages: Vec<PageReport>,
    pub submissions: Vec<SubmissionReport>,
    /// Session-level failure that stopped the agent before any page
    pub error: Option<String>,
    pub duration_ms: u128,
}

impl AgentReport {
    fn new(account: &Account) -> Self {
        Self {
            account_id: account.shopee_account_id.clone(),
            success: false,
            snapshots: Vec::new(),
            pages: Vec::new(),
            submissions: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed_submissions(&self) -> usize {
        self.submissions.iter().filter(|s| !s.accepted).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
}

impl From<&FleetConfig> for AgentSettings {
    fn from(config: &FleetConfig) -> Self {
        Self { navigation_timeout: config.navigation_timeout(), settle_delay: config.settle_delay() }
    }
}

fn login_error_type(kind: SnapshotKind) -> String {
    match kind {
        SnapshotKind::CreatorLive => "login_required".to_string(),
        other => format!("{other}_login_required"),
    }
}

pub struct Agent {
    sessions: Arc<SessionManager>,
    extractor: Arc<PageExtractor>,
    sink: Arc<dyn SnapshotSink>,
    diagnostics: Diagnostics,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(
        sessions: Arc<SessionManager>,
        extractor: Arc<PageExtractor>,
        sink: Arc<dyn SnapshotSink>,
        diagnostics: Diagnostics,
        settings: AgentSettings,
    ) -> Self {
        Self { sessions, extractor, sink, diagnostics, settings }
    }

    async fn visit(&self, account: &Account, page: &dyn PageSurface, kind: SnapshotKind, report: &mut AgentReport) {
        let id = account.id();

        let target = match self.extractor.spec(kind) {
            Ok(spec) => spec.url.clone(),
            Err(e) => {
                report.pages.push(PageReport { kind, status: PageStatus::Failed(e.to_string()), url: None, screenshot: None });
                return;
            }
        };

        let loaded = match page.goto(&target, self.settings.navigation_timeout).await {
            Ok(()) => page.current_url().await,
            Err(e) => Err(e),
        };

        let current_url = match loaded {
            Ok(url) => url,
            Err(e) => {
                warn!(account = %id, page = %kind, "Navigation failed: {}", e);
                let screenshot = self.diagnostics.capture(page, id, &format!("{kind}_error")).await;
                report.pages.push(PageReport { kind, status: PageStatus::Failed(e.to_string()), url: Some(target), screenshot });
                return;
            }
        };

        if is_login_page(&current_url) {
            self.login_required(account, page, kind, current_url, report).await;
            return;
        }

        tokio::time::sleep(self.settings.settle_delay).await;

        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => {
                warn!(account = %id, page = %kind, "Reading page failed: {}", e);
                let screenshot = self.diagnostics.capture(page, id, &format!("{kind}_error")).await;
                report.pages.push(PageReport {
                    kind,
                    status: PageStatus::Failed(e.to_string()),
                    url: Some(current_url),
                    screenshot,
                });
                return;
            }
        };

        if self.extractor.looks_like_login_wall(&html) {
            self.login_required(account, page, kind, current_url, report).await;
            return;
        }

        let snapshot = self.extractor.extract(account, kind, &html, &current_url);
        info!(account = %id, page = %kind, fields = snapshot.fields().len(), "📊 Snapshot captured");
        report.snapshots.push(snapshot);
        report.pages.push(PageReport { kind, status: PageStatus::Captured, url: Some(current_url), screenshot: None });
    }

    async fn login_required(
        &self,
        account: &Account,
        page: &dyn PageSurface,
        kind: SnapshotKind,
        current_url: String,
        report: &mut AgentReport,
    ) {
        warn!(account = %account.id(), page = %kind, url = %current_url, "🔐 Login required");
        let screenshot = self.diagnostics.capture(page, account.id(), &login_error_type(kind)).await;
        report.pages.push(PageReport { kind, status: PageStatus::LoginRequired, url: Some(current_url), screenshot });
    }

    async fn submit_all(&self, report: &mut AgentReport) {
        for snapshot in &report.snapshots {
            let outcome = self.sink.submit(snapshot).await;
            if let Err(e) = &outcome {
                error!(account = %snapshot.account_id(), page = %snapshot.kind(), "Snapshot submission failed: {}", e);
            }
            report.submissions.push(SubmissionReport {
                kind: snapshot.kind(),
                accepted: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            });
        }
    }
}

#[async_trait]
impl AccountRunner for Agent {
    async fn run(&self, account: &Account) -> AgentReport {
        let started = Instant::now();
        let mut report = AgentReport::new(account);
        info!(account = %account.id(), shop = %account.shop_name, "🤖 Agent starting");

        let mut session = match self.sessions.acquire(account.id()).await {
            Ok(session) => session,
            Err(e) => {
                error!(account = %account.id(), "Session unavailable: {}", e);
                report.error = Some(e.to_string());
                report.duration_ms = started.elapsed().as_millis();
                return report;
            }
        };

        match session.new_page().await {
            Ok(page) => {
                for kind in &account.pages {
                    self.visit(account, page.as_ref(), *kind, &mut report).await;
                }
            }
            Err(e) => {
                error!(account = %account.id(), "Could not open a page: {}", e);
                report.error = Some(e.to_string());
            }
        }
        session.release().await;

        self.submit_all(&mut report).await;

        report.success = !report.snapshots.is_empty();
        report.duration_ms = started.elapsed().as_millis();
        info!(
            account = %account.id(),
            success = report.success,
            snapshots = report.snapshots.len(),
            failed_submissions = report.failed_submissions(),
            "Agent finished in {}ms",
            report.duration_ms
        );
        report
    }
}
