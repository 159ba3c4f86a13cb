//! Drives the scraper from an operator-controlled browser tab
//!
//! The tab is polled for URL changes; each new URL counts as a page load.
//! The current page is also re-offered every `resync_interval` so a tab
//! left open across midnight still syncs once the next day.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scraper::{CompanionScraper, Notice, NoticeLevel, ScrapeOutcome};
use crate::infrastructure::browser::PageSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    SyncNow,
    Quit,
}

/// Floor for both timers; a zero period would make `tokio::time::interval` panic
const MIN_TICK: Duration = Duration::from_millis(100);

pub struct CompanionHost {
    scraper: CompanionScraper,
    poll_interval: Duration,
    resync_interval: Duration,
    notices: mpsc::UnboundedSender<Notice>,
}

impl CompanionHost {
    pub fn new(
        scraper: CompanionScraper,
        poll_interval: Duration,
        resync_interval: Duration,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        Self {
            scraper,
            poll_interval: poll_interval.max(MIN_TICK),
            resync_interval: resync_interval.max(MIN_TICK),
            notices,
        }
    }

    pub async fn run(&self, page: &dyn PageSurface, mut commands: mpsc::Receiver<HostCommand>, cancel: CancellationToken) {
        let mut last_url: Option<String> = None;
        let mut commands_open = true;

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut resync = tokio::time::interval_at(Instant::now() + self.resync_interval, self.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("🧩 Companion watching the browser tab");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = commands.recv(), if commands_open => match command {
                    Some(HostCommand::SyncNow) => {
                        let outcome = self.scraper.sync_now(page).await;
                        self.report(outcome);
                    }
                    Some(HostCommand::Quit) => break,
                    None => commands_open = false,
                },
                _ = poll.tick() => match page.current_url().await {
                    Ok(url) if last_url.as_deref() != Some(url.as_str()) => {
                        debug!("Tab navigated to {}", url);
                        last_url = Some(url);
                        let outcome = self.scraper.on_page_loaded(page).await;
                        self.report(outcome);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Could not read the tab URL: {}", e),
                },
                _ = resync.tick() => {
                    let outcome = self.scraper.on_page_loaded(page).await;
                    self.report(outcome);
                }
            }
        }
        info!("Companion host stopped");
    }

    fn report(&self, outcome: ScrapeOutcome) {
        let Some(notice) = outcome.notice().cloned() else {
            return;
        };
        match notice.level {
            NoticeLevel::Error | NoticeLevel::Warning => warn!("{}", notice.message),
            NoticeLevel::Info | NoticeLevel::Success => info!("{}", notice.message),
        }
        if self.notices.send(notice).is_err() {
            debug!("No notice listener attached");
        }
    }
}
