//! Snapshots: one page's worth of extracted metrics for one account

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::Account;

/// Page types the extractor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Creator center order counts
    CreatorLive,
    /// Ads center spend, budget and coins
    Ads,
    /// Live streaming dashboard
    LiveSession,
}

impl SnapshotKind {
    pub const ALL: [Self; 3] = [Self::CreatorLive, Self::Ads, Self::LiveSession];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatorLive => "creator_live",
            Self::Ads => "ads",
            Self::LiveSession => "live_session",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single extracted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

/// Immutable record of one extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    account_id: String,
    shop_name: String,
    kind: SnapshotKind,
    scraped_at: DateTime<Utc>,
    fields: FieldMap,
    source_url: String,
}

impl Snapshot {
    pub fn new(account: &Account, kind: SnapshotKind, fields: FieldMap, source_url: impl Into<String>) -> Self {
        Self::captured_at(account, kind, fields, source_url, Utc::now())
    }

    pub fn captured_at(
        account: &Account,
        kind: SnapshotKind,
        fields: FieldMap,
        source_url: impl Into<String>,
        scraped_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: account.shopee_account_id.clone(),
            shop_name: account.shop_name.clone(),
            kind,
            scraped_at,
            fields,
            source_url: source_url.into(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn shop_name(&self) -> &str {
        &self.shop_name
    }

    pub const fn kind(&self) -> SnapshotKind {
        self.kind
    }

    pub const fn scraped_at(&self) -> DateTime<Utc> {
        self.scraped_at
    }

    pub const fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Wire form; the source URL travels inside `data.page_url`.
    pub fn to_payload(&self) -> IngestPayload {
        let mut data = self.fields.clone();
        data.insert("page_url".to_string(), FieldValue::Text(self.source_url.clone()));
        IngestPayload {
            shopee_account_id: self.account_id.clone(),
            shop_name: self.shop_name.clone(),
            snapshot_type: self.kind,
            data,
            scraped_at: self.scraped_at,
        }
    }
}

/// Body of a fleet ingest request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPayload {
    pub shopee_account_id: String,
    pub shop_name: String,
    pub snapshot_type: SnapshotKind,
    pub data: FieldMap,
    pub scraped_at: DateTime<Utc>,
}
