//! Companion → backend transport
//!
//! The relay owns timeout and retry policy; a transport only performs one
//! POST and classifies the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::settings::CompanionSettings;
use crate::domain::SnapshotKind;

pub const SYNC_KEY_HEADER: &str = "X-Sync-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEndpoint {
    /// Live-session pages
    LiveProducts,
    /// Every other page type
    ShopeeData,
}

impl SyncEndpoint {
    pub const fn for_kind(kind: SnapshotKind) -> Self {
        match kind {
            SnapshotKind::LiveSession => Self::LiveProducts,
            SnapshotKind::CreatorLive | SnapshotKind::Ads => Self::ShopeeData,
        }
    }

    pub const fn path(self) -> &'static str {
        match self {
            Self::LiveProducts => "/live-products/sync",
            Self::ShopeeData => "/shopee-data/sync",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid sync API key")]
    Unauthorized,

    #[error("Your role is not allowed to sync data")]
    Forbidden,

    #[error("Server error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Failed to configure transport: {0}")]
    Config(String),
}

impl TransportError {
    /// Timeouts and connection-level failures get one more attempt
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
    }
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn post(&self, endpoint: SyncEndpoint, body: &Value) -> Result<Value, TransportError>;
}

/// Builds a transport from settings; swapped in whenever settings change
pub type TransportFactory =
    Arc<dyn Fn(&CompanionSettings) -> Result<Arc<dyn SyncTransport>, TransportError> + Send + Sync>;

pub fn http_transport_factory() -> TransportFactory {
    Arc::new(|settings: &CompanionSettings| {
        HttpSyncTransport::new(settings).map(|t| Arc::new(t) as Arc<dyn SyncTransport>)
    })
}

#[derive(Debug, Clone)]
pub struct HttpSyncTransport {
    client: Client,
    base: String,
    api_key: String,
}

impl HttpSyncTransport {
    pub fn new(settings: &CompanionSettings) -> Result<Self, TransportError> {
        url::Url::parse(&settings.api_endpoint)
            .map_err(|e| TransportError::Config(format!("api_endpoint: {e}")))?;
        let client = Client::builder()
            .user_agent(concat!("shopee-realtime-bot-companion/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base: settings.api_endpoint.trim_end_matches('/').to_string(),
            api_key: settings.sync_api_key.clone(),
        })
    }

    fn classify_status(status: StatusCode, body: &str) -> TransportError {
        match status {
            StatusCode::UNAUTHORIZED => TransportError::Unauthorized,
            StatusCode::FORBIDDEN => TransportError::Forbidden,
            other => {
                let message = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| v.get("detail").and_then(Value::as_str).map(ToString::to_string))
                    .unwrap_or_else(|| other.canonical_reason().unwrap_or("unknown").to_string());
                TransportError::Http { status: other.as_u16(), message }
            }
        }
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn post(&self, endpoint: SyncEndpoint, body: &Value) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.base, endpoint.path());
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(SYNC_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TransportError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Http {
            status: status.as_u16(),
            message: format!("unreadable response: {e}"),
        })
    }
}
