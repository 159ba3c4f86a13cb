//! Background relay
//!
//! A single task owns the transport and is the only writer of companion
//! state. Requests are handled strictly one at a time in arrival order.
//!
//! Ingestion policy: the first POST is bounded by `request_timeout` and
//! dropped when it elapses; a timeout or network failure is retried exactly
//! once with no bound. HTTP-level rejections are never retried.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::messages::{RelayEnvelope, RelayError, RelayHandle, RelayRequest, RelayResponse, SyncPayload, SyncReceipt};
use super::settings::CompanionSettings;
use super::state_store::{StateStore, StateStoreError};
use super::transport::{SyncEndpoint, SyncTransport, TransportError, TransportFactory};
use crate::domain::{DailySyncDecision, SyncTrigger};

const RELAY_QUEUE_DEPTH: usize = 32;

pub const AUTO_SYNC_DISABLED: &str = "auto sync disabled";

impl From<StateStoreError> for RelayError {
    fn from(e: StateStoreError) -> Self {
        Self::State(e.to_string())
    }
}

pub struct Relay {
    store: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    factory: TransportFactory,
    transport: Arc<dyn SyncTransport>,
    settings: CompanionSettings,
}

impl Relay {
    /// Builds the transport from the settings persisted in `store`
    pub async fn new(store: Arc<StateStore>, clock: Arc<dyn Clock>, factory: TransportFactory) -> Result<Self, RelayError> {
        let settings = store.read(|s| s.settings.clone()).await;
        settings.validate()?;
        let transport = factory(&settings).map_err(RelayError::Transport)?;
        Ok(Self { store, clock, factory, transport, settings })
    }

    /// Moves the relay onto its own task
    pub fn spawn(self) -> (RelayHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(RELAY_QUEUE_DEPTH);
        let task = tokio::spawn(self.serve(rx));
        (RelayHandle::new(tx), task)
    }

    async fn serve(mut self, mut rx: mpsc::Receiver<RelayEnvelope>) {
        info!("📨 Companion relay running");
        while let Some((request, reply)) = rx.recv().await {
            let response = self.handle(request).await;
            if reply.send(response).is_err() {
                debug!("Relay caller went away before the reply");
            }
        }
        info!("Companion relay stopped");
    }

    pub async fn handle(&mut self, request: RelayRequest) -> RelayResponse {
        self.adopt_stored_settings().await;
        let outcome = match request {
            RelayRequest::GetConnectedAccount => {
                Ok(RelayResponse::ConnectedAccount(self.store.read(|s| s.connected_account.clone()).await))
            }
            RelayRequest::ConnectAccount(account) => {
                info!(account = %account.shopee_account_id, "🔗 Companion connected to {}", account.shop_name);
                self.store.update(|s| s.connected_account = Some(account)).await.map(|()| RelayResponse::Ack)
            }
            RelayRequest::Disconnect => {
                self.store.update(|s| s.connected_account = None).await.map(|()| RelayResponse::Ack)
            }
            RelayRequest::CheckDailySync { account_id, is_manual } => {
                Ok(RelayResponse::DailySync(self.check_daily_sync(&account_id, is_manual).await))
            }
            RelayRequest::Sync { payload, trigger } => {
                return match self.sync(payload, trigger).await {
                    Ok(receipt) => RelayResponse::Synced(receipt),
                    Err(e) => RelayResponse::Failed(e),
                };
            }
            RelayRequest::GetStatus { account_id } => {
                Ok(RelayResponse::Status(self.store.read(|s| s.daily_state(&account_id)).await))
            }
            RelayRequest::GetSettings => Ok(RelayResponse::Settings(self.settings.clone())),
            RelayRequest::SettingsUpdated(settings) => return self.apply_settings(settings).await,
        };

        outcome.unwrap_or_else(|e: StateStoreError| {
            error!("Companion state update failed: {}", e);
            RelayResponse::Failed(e.into())
        })
    }

    async fn check_daily_sync(&self, account_id: &str, is_manual: bool) -> DailySyncDecision {
        if is_manual {
            return DailySyncDecision::proceed();
        }
        if !self.settings.auto_sync {
            return DailySyncDecision::skip(AUTO_SYNC_DISABLED);
        }
        let today = self.clock.today();
        self.store.read(|s| s.auto_sync_decision(account_id, today)).await
    }

    /// Settings saved by another process (`shopee-bot settings`) replace ours
    async fn adopt_stored_settings(&mut self) {
        let stored = self.store.read(|s| s.settings.clone()).await;
        if stored == self.settings {
            return;
        }
        match (self.factory)(&stored) {
            Ok(transport) => {
                info!("⚙️ Companion settings changed on disk: endpoint={}, auto_sync={}", stored.api_endpoint, stored.auto_sync);
                self.transport = transport;
                self.settings = stored;
            }
            Err(e) => warn!("Ignoring stored companion settings: {}", e),
        }
    }

    /// Reload means reconstruct: a new transport from the new settings
    async fn apply_settings(&mut self, settings: CompanionSettings) -> RelayResponse {
        if let Err(e) = settings.validate() {
            warn!("Rejected companion settings: {}", e);
            return RelayResponse::Failed(e.into());
        }
        let transport = match (self.factory)(&settings) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Rejected companion settings: {}", e);
                return RelayResponse::Failed(RelayError::Transport(e));
            }
        };
        let persisted = settings.clone();
        if let Err(e) = self.store.update(|s| s.settings = persisted).await {
            return RelayResponse::Failed(e.into());
        }
        self.transport = transport;
        self.settings = settings;
        info!("⚙️ Companion settings updated: endpoint={}, auto_sync={}", self.settings.api_endpoint, self.settings.auto_sync);
        RelayResponse::Ack
    }

    async fn sync(&self, payload: SyncPayload, trigger: SyncTrigger) -> Result<SyncReceipt, RelayError> {
        let account_id = payload.account.shopee_account_id.clone();
        let endpoint = payload.endpoint();
        let body = payload.to_body();

        let result = self.post_with_retry(endpoint, &body).await;
        let today = self.clock.today();

        match result {
            Ok((response, retried)) => {
                self.store.update(|s| s.record_success(&account_id, today, trigger)).await?;
                info!(account = %account_id, ?trigger, retried, "✅ Synced {} to {}", payload.kind, endpoint.path());
                Ok(SyncReceipt { account_id, endpoint, retried, response })
            }
            Err(e) => {
                let message = e.to_string();
                self.store.update(|s| s.record_failure(&account_id, message)).await?;
                error!(account = %account_id, ?trigger, "❌ Sync failed: {}", e);
                Err(e)
            }
        }
    }

    async fn post_with_retry(&self, endpoint: SyncEndpoint, body: &Value) -> Result<(Value, bool), RelayError> {
        let timeout = self.settings.request_timeout();
        let first = match tokio::time::timeout(timeout, self.transport.post(endpoint, body)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        match first {
            Ok(response) => Ok((response, false)),
            Err(e) if e.is_retryable() => {
                warn!("Sync attempt failed ({}), retrying once without timeout", e);
                self.transport
                    .post(endpoint, body)
                    .await
                    .map(|response| (response, true))
                    .map_err(RelayError::FailedAfterRetry)
            }
            Err(e) => Err(RelayError::Transport(e)),
        }
    }
}
