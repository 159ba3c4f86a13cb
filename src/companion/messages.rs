//! Typed messages between the foreground scraper and the background relay
//!
//! Every request travels over one mpsc channel with a oneshot for its reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::settings::{CompanionSettings, SettingsError};
use super::transport::{SyncEndpoint, TransportError};
use crate::domain::{ConnectedAccount, DailySyncDecision, DailySyncState, FieldMap, SnapshotKind, SyncTrigger};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Sync failed after retry: {0}")]
    FailedAfterRetry(TransportError),

    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),

    #[error("Companion state error: {0}")]
    State(String),

    #[error("Relay is not running")]
    Closed,

    #[error("Unexpected relay response")]
    UnexpectedResponse,
}

/// Scraped page data on its way to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub account: ConnectedAccount,
    pub kind: SnapshotKind,
    pub fields: FieldMap,
    pub page_url: String,
    pub scraped_at: DateTime<Utc>,
}

impl SyncPayload {
    pub const fn endpoint(&self) -> SyncEndpoint {
        SyncEndpoint::for_kind(self.kind)
    }

    pub fn to_body(&self) -> Value {
        json!({
            "shopee_account_id": self.account.shopee_account_id,
            "shop_name": self.account.shop_name,
            "page_type": self.kind,
            "data": self.fields,
            "page_url": self.page_url,
            "scraped_at": self.scraped_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReceipt {
    pub account_id: String,
    pub endpoint: SyncEndpoint,
    /// The first attempt failed and the retry went through
    pub retried: bool,
    pub response: Value,
}

#[derive(Debug, Clone)]
pub enum RelayRequest {
    GetConnectedAccount,
    ConnectAccount(ConnectedAccount),
    Disconnect,
    CheckDailySync { account_id: String, is_manual: bool },
    Sync { payload: SyncPayload, trigger: SyncTrigger },
    GetStatus { account_id: String },
    GetSettings,
    SettingsUpdated(CompanionSettings),
}

#[derive(Debug, Clone)]
pub enum RelayResponse {
    ConnectedAccount(Option<ConnectedAccount>),
    Ack,
    DailySync(DailySyncDecision),
    Synced(SyncReceipt),
    Status(DailySyncState),
    Settings(CompanionSettings),
    Failed(RelayError),
}

pub type RelayEnvelope = (RelayRequest, oneshot::Sender<RelayResponse>);

/// Cloneable client side of the relay channel
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayEnvelope>,
}

impl RelayHandle {
    pub const fn new(tx: mpsc::Sender<RelayEnvelope>) -> Self {
        Self { tx }
    }

    pub async fn request(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send((request, reply_tx)).await.map_err(|_| RelayError::Closed)?;
        match reply_rx.await.map_err(|_| RelayError::Closed)? {
            RelayResponse::Failed(e) => Err(e),
            other => Ok(other),
        }
    }

    pub async fn connected_account(&self) -> Result<Option<ConnectedAccount>, RelayError> {
        match self.request(RelayRequest::GetConnectedAccount).await? {
            RelayResponse::ConnectedAccount(account) => Ok(account),
            _ => Err(RelayError::UnexpectedResponse),
        }
    }

    pub async fn connect(&self, account: ConnectedAccount) -> Result<(), RelayError> {
        self.expect_ack(RelayRequest::ConnectAccount(account)).await
    }

    pub async fn disconnect(&self) -> Result<(), RelayError> {
        self.expect_ack(RelayRequest::Disconnect).await
    }

    pub async fn check_daily_sync(&self, account_id: &str, is_manual: bool) -> Result<DailySyncDecision, RelayError> {
        let request = RelayRequest::CheckDailySync { account_id: account_id.to_string(), is_manual };
        match self.request(request).await? {
            RelayResponse::DailySync(decision) => Ok(decision),
            _ => Err(RelayError::UnexpectedResponse),
        }
    }

    pub async fn sync(&self, payload: SyncPayload, trigger: SyncTrigger) -> Result<SyncReceipt, RelayError> {
        match self.request(RelayRequest::Sync { payload, trigger }).await? {
            RelayResponse::Synced(receipt) => Ok(receipt),
            _ => Err(RelayError::UnexpectedResponse),
        }
    }

    pub async fn status(&self, account_id: &str) -> Result<DailySyncState, RelayError> {
        match self.request(RelayRequest::GetStatus { account_id: account_id.to_string() }).await? {
            RelayResponse::Status(state) => Ok(state),
            _ => Err(RelayError::UnexpectedResponse),
        }
    }

    pub async fn settings(&self) -> Result<CompanionSettings, RelayError> {
        match self.request(RelayRequest::GetSettings).await? {
            RelayResponse::Settings(settings) => Ok(settings),
            _ => Err(RelayError::UnexpectedResponse),
        }
    }

    pub async fn update_settings(&self, settings: CompanionSettings) -> Result<(), RelayError> {
        self.expect_ack(RelayRequest::SettingsUpdated(settings)).await
    }

    async fn expect_ack(&self, request: RelayRequest) -> Result<(), RelayError> {
        match self.request(request).await? {
            RelayResponse::Ack => Ok(()),
            _ => Err(RelayError::UnexpectedResponse),
        }
    }
}
