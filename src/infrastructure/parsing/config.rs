//! Probe tables for every supported page type
//!
//! Built-in defaults mirror the storefront's current markup. A JSON file named
//! by `selectors_file` can replace individual page specs (matched by kind) and
//! the login-wall markers without a rebuild.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ExtractionError;
use super::probe::Probe;
use crate::domain::SnapshotKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Number,
    Text,
}

/// A named field and its ordered lookup candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    pub probes: Vec<Probe>,
}

impl FieldSpec {
    pub fn number(name: &str, probes: Vec<Probe>) -> Self {
        Self { name: name.to_string(), kind: FieldKind::Number, probes }
    }

    pub fn text(name: &str, probes: Vec<Probe>) -> Self {
        Self { name: name.to_string(), kind: FieldKind::Text, probes }
    }
}

/// Where a page type lives and how to read it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpec {
    pub kind: SnapshotKind,

    /// Navigation target for the fleet agent
    pub url: String,

    /// `host/path` prefixes that identify this page in the companion
    pub url_patterns: Vec<String>,

    pub fields: Vec<FieldSpec>,
}

/// All page specs plus the DOM markers of a login wall
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCatalog {
    pub pages: Vec<PageSpec>,
    #[serde(default)]
    pub login_markers: Vec<String>,
}

/// Partial override file; absent parts keep their defaults
#[derive(Debug, Default, Deserialize)]
struct CatalogOverride {
    #[serde(default)]
    pages: Vec<PageSpec>,
    #[serde(default)]
    login_markers: Vec<String>,
}

impl PageCatalog {
    pub fn spec(&self, kind: SnapshotKind) -> Option<&PageSpec> {
        self.pages.iter().find(|p| p.kind == kind)
    }

    /// Built-in tables, then `path` on top when given
    pub async fn load(path: Option<&Path>) -> Result<Self, ExtractionError> {
        let mut catalog = Self::default();
        let Some(path) = path else {
            return Ok(catalog);
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ExtractionError::Io { path: path.to_path_buf(), source })?;
        let overrides: CatalogOverride = serde_json::from_str(&content)
            .map_err(|source| ExtractionError::Format { path: path.to_path_buf(), source })?;

        catalog.apply(overrides);
        info!("🧭 Selector overrides loaded from {:?}", path);
        Ok(catalog)
    }

    fn apply(&mut self, overrides: CatalogOverride) {
        for page in overrides.pages {
            match self.pages.iter_mut().find(|p| p.kind == page.kind) {
                Some(existing) => *existing = page,
                None => self.pages.push(page),
            }
        }
        if !overrides.login_markers.is_empty() {
            self.login_markers = overrides.login_markers;
        }
    }
}

impl Default for PageCatalog {
    fn default() -> Self {
        Self {
            pages: vec![creator_live_page(), ads_page(), live_session_page()],
            login_markers: urls::LOGIN_MARKERS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Storefront endpoints and login markers
pub mod urls {
    pub const CREATOR_ORDERS: &str = "https://creator.shopee.co.id/portal/order/list";
    pub const CREATOR_LIVE_DASHBOARD: &str = "https://creator.shopee.co.id/live/dashboard";
    pub const ADS_CENTER: &str = "https://seller.shopee.co.id/portal/marketing/pas";

    pub const LOGIN_MARKERS: &[&str] = &[
        r#"form[action*="login"]"#,
        r#"input[name="username"]"#,
        ".login-container",
        ".login-modal",
        r#"[data-testid="login-prompt"]"#,
    ];
}

fn css(selectors: &[&str]) -> Vec<Probe> {
    selectors.iter().map(|s| Probe::css(*s)).collect()
}

fn creator_live_page() -> PageSpec {
    let mut ready_to_ship = css(&[
        r#".order-tab-count[data-status="ready_to_ship"]"#,
        r#"[data-testid="order-count-ready"]"#,
    ]);
    ready_to_ship.push(Probe::container(".tab-item", "Siap Kirim", ".count"));
    ready_to_ship.push(Probe::labelled("Siap Kirim"));
    ready_to_ship.push(Probe::css(".order-status-count"));

    let mut pending = css(&[r#".order-tab-count[data-status="pending"]"#, r#"[data-testid="order-count-pending"]"#]);
    pending.push(Probe::container(".tab-item", "Pending", ".count"));

    PageSpec {
        kind: SnapshotKind::CreatorLive,
        url: urls::CREATOR_ORDERS.to_string(),
        url_patterns: vec!["creator.shopee.co.id/portal/order".to_string()],
        fields: vec![
            FieldSpec::number("orders_ready_to_ship", ready_to_ship),
            FieldSpec::number("pending_orders", pending),
        ],
    }
}

fn ads_page() -> PageSpec {
    let mut spend = css(&[
        ".spend-today-value",
        r#"[data-testid="spend-today"]"#,
        ".ads-spend .amount",
        ".today-spend-amount",
    ]);
    spend.push(Probe::labelled("Pengeluaran Hari Ini"));

    let mut budget = css(&[".budget-value", r#"[data-testid="budget-available"]"#, ".ads-balance .amount", ".balance-amount"]);
    budget.push(Probe::labelled("Saldo Iklan"));

    let mut coins = css(&[".coins-balance", r#"[data-testid="coins"]"#, ".shopee-coins .amount"]);
    coins.push(Probe::labelled("Koin"));

    PageSpec {
        kind: SnapshotKind::Ads,
        url: urls::ADS_CENTER.to_string(),
        url_patterns: vec!["seller.shopee.co.id/portal/marketing".to_string()],
        fields: vec![
            FieldSpec::number("spend_today", spend),
            FieldSpec::number("budget_available", budget),
            FieldSpec::number("coins", coins),
        ],
    }
}

fn live_session_page() -> PageSpec {
    PageSpec {
        kind: SnapshotKind::LiveSession,
        url: urls::CREATOR_LIVE_DASHBOARD.to_string(),
        url_patterns: vec!["creator.shopee.co.id/live".to_string()],
        fields: vec![
            FieldSpec::number(
                "live_viewers",
                css(&[".live-viewer-count", r#"[data-testid="viewer-count"]"#, ".viewer-number"]),
            ),
            FieldSpec::number("live_orders", css(&[".live-order-count", r#"[data-testid="live-orders"]"#])),
            FieldSpec::text("live_title", css(&[".live-title", r#"[data-testid="live-title"]"#])),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn every_kind_has_a_default_spec() {
        let catalog = PageCatalog::default();
        for kind in SnapshotKind::ALL {
            let spec = catalog.spec(kind).unwrap();
            assert!(!spec.fields.is_empty(), "{kind} has no fields");
            assert!(!spec.url_patterns.is_empty());
        }
        assert_eq!(catalog.login_markers.len(), 5);
    }

    #[tokio::test]
    async fn override_file_replaces_matching_page_only() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"pages":[{{"kind":"ads","url":"https://ads.example/pas","url_patterns":["ads.example"],
                 "fields":[{{"name":"spend_today","probes":[".spend"]}}]}}]}}"#
        )
        .unwrap();

        let catalog = PageCatalog::load(Some(file.path())).await.unwrap();

        let ads = catalog.spec(SnapshotKind::Ads).unwrap();
        assert_eq!(ads.url, "https://ads.example/pas");
        assert_eq!(ads.fields[0].kind, FieldKind::Number);
        assert_eq!(catalog.spec(SnapshotKind::CreatorLive), PageCatalog::default().spec(SnapshotKind::CreatorLive));
        assert_eq!(catalog.login_markers.len(), 5);
    }

    #[tokio::test]
    async fn malformed_override_is_reported() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{not json").unwrap();

        let err = PageCatalog::load(Some(file.path())).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Format { .. }));
    }
}
