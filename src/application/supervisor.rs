//! # Fleet Supervisor
//!
//! Runs every enabled account through an [`AccountRunner`] on a fixed timer.
//! Each cycle splits the roster into batches of `max_parallel_agents`; a batch
//! runs fully concurrently and the next one starts only after all of its
//! agents returned. A panicking agent is contained at the spawn boundary and
//! counted as a failure.
//!
//! State machine: `Idle → Loading → CycleRunning → (Idle | Stopping) → Stopped`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::agent::AccountRunner;
use crate::domain::{Account, CycleStats, CycleSummary};
use crate::infrastructure::config::FleetConfig;
use crate::infrastructure::roster::{RosterError, RosterSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Loading,
    CycleRunning,
    Stopping,
    Stopped,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Roster could not be loaded: {0}")]
    Roster(#[from] RosterError),

    #[error("No enabled accounts in roster")]
    EmptyRoster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub max_parallel_agents: usize,
    pub sync_interval: Duration,
    pub batch_pause: Duration,
}

impl From<&FleetConfig> for SupervisorSettings {
    fn from(config: &FleetConfig) -> Self {
        Self {
            max_parallel_agents: config.max_parallel_agents,
            sync_interval: config.sync_interval(),
            batch_pause: config.batch_pause(),
        }
    }
}

pub struct Supervisor {
    roster: Arc<dyn RosterSource>,
    runner: Arc<dyn AccountRunner>,
    settings: SupervisorSettings,
    stats: Arc<RwLock<CycleStats>>,
    state: Arc<RwLock<SupervisorState>>,
    cancellation_token: CancellationToken,
}

impl Supervisor {
    pub fn new(roster: Arc<dyn RosterSource>, runner: Arc<dyn AccountRunner>, settings: SupervisorSettings) -> Self {
        Self {
            roster,
            runner,
            settings: SupervisorSettings { max_parallel_agents: settings.max_parallel_agents.max(1), ..settings },
            stats: Arc::new(RwLock::new(CycleStats::default())),
            state: Arc::new(RwLock::new(SupervisorState::Idle)),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Cancelling it stops the loop before the next cycle starts
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    pub async fn stats(&self) -> CycleStats {
        self.stats.read().await.clone()
    }

    async fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.write().await;
        debug!("Supervisor state: {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Runs cycles until cancelled. Fails only at startup: an unreadable or
    /// empty roster is fatal.
    pub async fn run(&self) -> Result<CycleStats, SupervisorError> {
        self.set_state(SupervisorState::Loading).await;
        let initial = match self.roster.enabled_accounts().await {
            Ok(accounts) if accounts.is_empty() => Err(SupervisorError::EmptyRoster),
            Ok(accounts) => Ok(accounts),
            Err(e) => Err(SupervisorError::from(e)),
        };
        let initial = match initial {
            Ok(accounts) => accounts,
            Err(e) => {
                error!("❌ Supervisor cannot start: {}", e);
                self.set_state(SupervisorState::Stopped).await;
                return Err(e);
            }
        };

        {
            let mut stats = self.stats.write().await;
            stats.is_running = true;
            stats.accounts_count = initial.len();
        }
        info!(
            "🚀 Supervisor started: {} accounts, batch width {}, interval {:?}",
            initial.len(),
            self.settings.max_parallel_agents,
            self.settings.sync_interval
        );
        self.set_state(SupervisorState::Idle).await;

        // First tick completes immediately
        let mut ticker = interval(self.settings.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending = Some(initial);

        loop {
            tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    debug!("Supervisor loop shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let accounts = match pending.take() {
                Some(accounts) => accounts,
                None => match self.roster.enabled_accounts().await {
                    Ok(accounts) => accounts,
                    Err(e) => {
                        error!("Roster reload failed, skipping cycle: {}", e);
                        continue;
                    }
                },
            };

            self.run_cycle(accounts).await;
        }

        self.set_state(SupervisorState::Stopping).await;
        let final_stats = {
            let mut stats = self.stats.write().await;
            stats.is_running = false;
            stats.clone()
        };
        info!(
            "🛑 Supervisor stopped: cycles={}, success={}, failed={}, last_cycle_at={:?}",
            final_stats.total_cycles, final_stats.success_count, final_stats.fail_count, final_stats.last_cycle_at
        );
        self.set_state(SupervisorState::Stopped).await;
        Ok(final_stats)
    }

    /// One full pass over `accounts`, batch by batch
    pub async fn run_cycle(&self, accounts: Vec<Account>) -> CycleSummary {
        self.set_state(SupervisorState::CycleRunning).await;
        let started = Instant::now();
        let cycle = {
            let mut stats = self.stats.write().await;
            stats.current_cycle += 1;
            stats.accounts_count = accounts.len();
            stats.current_cycle
        };

        let width = self.settings.max_parallel_agents;
        let batch_count = accounts.len().div_ceil(width);
        info!("🔄 Cycle {} starting: {} accounts in {} batches", cycle, accounts.len(), batch_count);

        let mut succeeded = 0;
        let mut failed = 0;

        for (index, batch) in accounts.chunks(width).enumerate() {
            debug!("Cycle {} batch {}/{}: {} agents", cycle, index + 1, batch_count, batch.len());

            let (ids, handles): (Vec<String>, Vec<_>) = batch
                .iter()
                .cloned()
                .map(|account| {
                    let runner = Arc::clone(&self.runner);
                    let id = account.shopee_account_id.clone();
                    (id, tokio::spawn(async move { runner.run(&account).await }))
                })
                .unzip();

            for (id, result) in ids.iter().zip(join_all(handles).await) {
                match result {
                    Ok(report) if report.success => succeeded += 1,
                    Ok(report) => {
                        failed += 1;
                        warn!(account = %id, error = ?report.error, "Agent finished without snapshots");
                    }
                    Err(join_error) => {
                        failed += 1;
                        error!(account = %id, "💥 Agent crashed: {}", join_error);
                    }
                }
            }

            if index + 1 < batch_count {
                sleep(self.settings.batch_pause).await;
            }
        }

        let summary = CycleSummary { cycle, dispatched: accounts.len(), succeeded, failed, duration: started.elapsed() };
        self.stats.write().await.record(&summary, Utc::now());
        info!(
            "✅ Cycle {} complete in {:?}: {} succeeded, {} failed",
            cycle, summary.duration, summary.succeeded, summary.failed
        );
        self.set_state(SupervisorState::Idle).await;
        summary
    }
}
