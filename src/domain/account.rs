//! Tracked storefront accounts as listed in the roster

use serde::{Deserialize, Serialize};

use super::snapshot::SnapshotKind;

/// One tracked account. Immutable for the duration of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub shopee_account_id: String,
    pub shop_name: String,

    /// Absent in the roster means enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Page types the agent visits, in order
    #[serde(default = "default_pages")]
    pub pages: Vec<SnapshotKind>,
}

const fn default_enabled() -> bool {
    true
}

fn default_pages() -> Vec<SnapshotKind> {
    vec![SnapshotKind::CreatorLive, SnapshotKind::Ads]
}

impl Account {
    pub fn new(shopee_account_id: impl Into<String>, shop_name: impl Into<String>) -> Self {
        Self {
            shopee_account_id: shopee_account_id.into(),
            shop_name: shop_name.into(),
            enabled: true,
            pages: default_pages(),
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn with_pages(mut self, pages: Vec<SnapshotKind>) -> Self {
        self.pages = pages;
        self
    }

    pub fn id(&self) -> &str {
        &self.shopee_account_id
    }
}
