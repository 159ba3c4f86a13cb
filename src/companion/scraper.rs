//! Foreground scraper: reads the page the operator is on and hands it to the relay

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use super::messages::{RelayHandle, SyncPayload};
use crate::domain::SyncTrigger;
use crate::infrastructure::browser::PageSurface;
use crate::infrastructure::parsing::PageExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Short toast-style message for the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self { level, message: message.into() }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.level {
            NoticeLevel::Info => "ℹ️",
            NoticeLevel::Success => "✅",
            NoticeLevel::Warning => "⚠️",
            NoticeLevel::Error => "❌",
        };
        write!(f, "{icon} {}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// Not a page we know; nothing shown
    Ignored,
    NotConnected(Notice),
    /// Daily dedup or disabled auto-sync
    Skipped(Notice),
    Synced(Notice),
    Failed(Notice),
}

impl ScrapeOutcome {
    pub const fn notice(&self) -> Option<&Notice> {
        match self {
            Self::Ignored => None,
            Self::NotConnected(n) | Self::Skipped(n) | Self::Synced(n) | Self::Failed(n) => Some(n),
        }
    }
}

pub struct CompanionScraper {
    relay: RelayHandle,
    extractor: Arc<PageExtractor>,
    settle_delay: Duration,
}

impl CompanionScraper {
    pub const fn new(relay: RelayHandle, extractor: Arc<PageExtractor>, settle_delay: Duration) -> Self {
        Self { relay, extractor, settle_delay }
    }

    /// Automatic trigger after a page load; subject to daily dedup
    pub async fn on_page_loaded(&self, page: &dyn PageSurface) -> ScrapeOutcome {
        self.scrape(page, SyncTrigger::Auto).await
    }

    /// Operator-requested sync; bypasses dedup and the settle wait
    pub async fn sync_now(&self, page: &dyn PageSurface) -> ScrapeOutcome {
        self.scrape(page, SyncTrigger::Manual).await
    }

    pub async fn scrape(&self, page: &dyn PageSurface, trigger: SyncTrigger) -> ScrapeOutcome {
        let account = match self.relay.connected_account().await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return ScrapeOutcome::NotConnected(Notice::new(
                    NoticeLevel::Warning,
                    "No Shopee account connected. Connect one before syncing.",
                ));
            }
            Err(e) => return ScrapeOutcome::Failed(Notice::new(NoticeLevel::Error, e.to_string())),
        };

        let page_url = match page.current_url().await {
            Ok(url) => url,
            Err(e) => return ScrapeOutcome::Failed(Notice::new(NoticeLevel::Error, e.to_string())),
        };
        let Some(kind) = self.extractor.classify_url(&page_url) else {
            debug!("Ignoring unrecognised page {}", page_url);
            return ScrapeOutcome::Ignored;
        };

        if !trigger.is_manual() {
            match self.relay.check_daily_sync(&account.shopee_account_id, false).await {
                Ok(decision) if !decision.should_sync => {
                    let reason = decision.reason.unwrap_or_default();
                    info!(account = %account.shopee_account_id, "Auto-sync skipped: {}", reason);
                    return ScrapeOutcome::Skipped(Notice::new(
                        NoticeLevel::Info,
                        format!("{}: {}", account.shop_name, reason),
                    ));
                }
                Ok(_) => {}
                Err(e) => return ScrapeOutcome::Failed(Notice::new(NoticeLevel::Error, e.to_string())),
            }
            tokio::time::sleep(self.settle_delay).await;
        }

        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => return ScrapeOutcome::Failed(Notice::new(NoticeLevel::Error, e.to_string())),
        };
        let fields = self.extractor.extract_fields(kind, &html);

        let shop_name = account.shop_name.clone();
        let payload = SyncPayload { account, kind, fields, page_url, scraped_at: Utc::now() };
        match self.relay.sync(payload, trigger).await {
            Ok(_) => ScrapeOutcome::Synced(Notice::new(NoticeLevel::Success, format!("{shop_name}: {kind} synced"))),
            Err(e) => ScrapeOutcome::Failed(Notice::new(NoticeLevel::Error, format!("{shop_name}: {e}"))),
        }
    }
}
