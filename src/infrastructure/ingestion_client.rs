//! HTTP client for the fleet's snapshot ingestion endpoints
//!
//! Every call carries `X-Access-Code` and a hard timeout. There is no
//! automatic retry on this path: the next supervisor cycle is the retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::FleetConfig;
use crate::domain::{IngestPayload, Snapshot};

pub const ACCESS_CODE_HEADER: &str = "X-Access-Code";
const INGEST_PATH: &str = "/bot/realtime-snapshots/ingest";
const INGEST_BATCH_PATH: &str = "/bot/realtime-snapshots/ingest-batch";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestionError {
    #[error("Ingestion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ingestion request failed: {0}")]
    Transport(String),

    /// Non-2xx answer; `detail` is the server's own message when it sent one
    #[error("{detail}")]
    Rejected { status: u16, detail: String },

    #[error("Unreadable ingestion response: {0}")]
    Decode(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl IngestionError {
    fn from_reqwest(error: &reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Server acknowledgement of one snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IngestReceipt {
    #[serde(default)]
    pub snapshot_id: Option<serde_json::Value>,
}

/// Server acknowledgement of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub ingested: usize,
    pub total: usize,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    snapshots: &'a [IngestPayload],
}

/// Where snapshots go; the agent only sees this seam
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn submit(&self, snapshot: &Snapshot) -> Result<IngestReceipt, IngestionError>;
}

/// Connection settings for [`IngestionClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    pub api_base: String,
    pub access_code: String,
    pub timeout: Duration,
    pub batch_timeout: Duration,
}

impl From<&FleetConfig> for IngestionConfig {
    fn from(config: &FleetConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            access_code: config.access_code.clone(),
            timeout: config.ingest_timeout(),
            batch_timeout: config.ingest_batch_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionClient {
    client: Client,
    config: IngestionConfig,
}

impl IngestionClient {
    pub fn new(config: IngestionConfig) -> Result<Self, IngestionError> {
        let client = ClientBuilder::new()
            .user_agent(concat!("shopee-realtime-bot/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(|e| IngestionError::Client(e.to_string()))?;

        info!("📡 Ingestion client ready: {}", config.api_base);
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// POST one snapshot to `/bot/realtime-snapshots/ingest`
    pub async fn submit(&self, snapshot: &Snapshot) -> Result<IngestReceipt, IngestionError> {
        let payload = snapshot.to_payload();
        let response = self
            .client
            .post(self.endpoint(INGEST_PATH))
            .header(ACCESS_CODE_HEADER, &self.config.access_code)
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| IngestionError::from_reqwest(&e, self.config.timeout))?;

        let receipt: IngestReceipt = Self::read_success(response, self.config.timeout).await?;
        info!(
            account = %snapshot.account_id(),
            kind = %snapshot.kind(),
            snapshot_id = ?receipt.snapshot_id,
            "✅ Snapshot ingested"
        );
        Ok(receipt)
    }

    /// POST several snapshots in one call; any failure fails the whole call
    pub async fn submit_batch(&self, snapshots: &[Snapshot]) -> Result<BatchReceipt, IngestionError> {
        let payloads: Vec<IngestPayload> = snapshots.iter().map(Snapshot::to_payload).collect();
        let response = self
            .client
            .post(self.endpoint(INGEST_BATCH_PATH))
            .header(ACCESS_CODE_HEADER, &self.config.access_code)
            .timeout(self.config.batch_timeout)
            .json(&BatchBody { snapshots: &payloads })
            .send()
            .await
            .map_err(|e| IngestionError::from_reqwest(&e, self.config.batch_timeout))?;

        let receipt: BatchReceipt = Self::read_success(response, self.config.batch_timeout).await?;
        info!("✅ Batch ingested: {}/{}", receipt.ingested, receipt.total);
        Ok(receipt)
    }

    async fn read_success<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        timeout: Duration,
    ) -> Result<T, IngestionError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| IngestionError::from_reqwest(&e, timeout))?;

        if !status.is_success() {
            let detail = rejection_detail(status, &body);
            warn!("Ingestion rejected ({}): {}", status.as_u16(), detail);
            return Err(IngestionError::Rejected { status: status.as_u16(), detail });
        }

        debug!("Ingestion response: {}", body);
        if body.trim().is_empty() {
            return serde_json::from_str("{}").map_err(|e| IngestionError::Decode(e.to_string()));
        }
        serde_json::from_str(&body).map_err(|e| IngestionError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SnapshotSink for IngestionClient {
    async fn submit(&self, snapshot: &Snapshot) -> Result<IngestReceipt, IngestionError> {
        Self::submit(self, snapshot).await
    }
}

/// Server `detail` when present, otherwise `HTTP <status>`
fn rejection_detail(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json.get("detail").cloned())
        .map(|detail| match detail {
            serde_json::Value::String(message) => message,
            other => other.to_string(),
        })
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}
