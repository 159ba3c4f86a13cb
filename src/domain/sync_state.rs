//! Companion sync bookkeeping: who is connected and when each account last synced

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identity the companion syncs on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub shopee_account_id: String,
    pub shop_name: String,
}

impl ConnectedAccount {
    pub fn new(shopee_account_id: impl Into<String>, shop_name: impl Into<String>) -> Self {
        Self { shopee_account_id: shopee_account_id.into(), shop_name: shop_name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
}

/// What started a companion sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Page load; subject to daily dedup
    Auto,
    /// Operator pressed "sync now"
    Manual,
}

impl SyncTrigger {
    pub const fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// Per-account view over the companion state maps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySyncState {
    pub last_sync_date: Option<NaiveDate>,
    pub last_status: Option<SyncStatus>,
    pub last_error: Option<String>,
}

impl DailySyncState {
    pub fn synced_on(&self, date: NaiveDate) -> bool {
        self.last_sync_date == Some(date)
    }
}

/// Answer to "may this account auto-sync now?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySyncDecision {
    pub should_sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DailySyncDecision {
    pub const fn proceed() -> Self {
        Self { should_sync: true, reason: None }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self { should_sync: false, reason: Some(reason.into()) }
    }
}
