//! Companion relay, scraper and host against a scripted transport and tab
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shopee_realtime_bot::companion::relay::AUTO_SYNC_DISABLED;
use shopee_realtime_bot::companion::state_store::ALREADY_SYNCED_TODAY;
use shopee_realtime_bot::companion::{
    CompanionHost, CompanionScraper, CompanionSettings, CompanionState, FixedClock, HostCommand, NoticeLevel, Relay,
    RelayError, RelayHandle, ScrapeOutcome, StateStore, SyncEndpoint, SyncPayload, TransportError,
};
use shopee_realtime_bot::domain::{ConnectedAccount, FieldMap, SnapshotKind, SyncStatus, SyncTrigger};
use shopee_realtime_bot::infrastructure::parsing::config::urls;
use shopee_realtime_bot::infrastructure::PageExtractor;
use shopee_realtime_bot::test_utils::{FakeReply, FakeTransport, ScriptedPage};

const ADS_HTML: &str = r#"<html><body><div class="spend-today-value">Rp 1500</div></body></html>"#;
const ORDERS_HTML: &str = r#"<html><body><span class="order-status-count">12</span></body></html>"#;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

fn settings() -> CompanionSettings {
    CompanionSettings { sync_api_key: "secret".into(), ..CompanionSettings::default() }
}

async fn start(store: Arc<StateStore>, transport: &Arc<FakeTransport>, today: NaiveDate) -> RelayHandle {
    let relay = Relay::new(store, Arc::new(FixedClock(today)), transport.factory()).await.unwrap();
    relay.spawn().0
}

async fn relay_with(transport: &Arc<FakeTransport>, settings: CompanionSettings) -> (RelayHandle, Arc<StateStore>) {
    let store = Arc::new(StateStore::in_memory(CompanionState { settings, ..CompanionState::default() }));
    (start(Arc::clone(&store), transport, day(14)).await, store)
}

fn payload(account_id: &str, kind: SnapshotKind) -> SyncPayload {
    SyncPayload {
        account: ConnectedAccount::new(account_id, "Toko Test"),
        kind,
        fields: FieldMap::new(),
        page_url: urls::ADS_CENTER.to_string(),
        scraped_at: Utc::now(),
    }
}

#[tokio::test]
async fn successful_auto_sync_blocks_further_auto_syncs_today() {
    let transport = FakeTransport::new();
    let (relay, _) = relay_with(&transport, settings()).await;

    assert!(relay.check_daily_sync("A1", false).await.unwrap().should_sync);
    relay.sync(payload("A1", SnapshotKind::Ads), SyncTrigger::Auto).await.unwrap();

    let decision = relay.check_daily_sync("A1", false).await.unwrap();
    assert!(!decision.should_sync);
    assert_eq!(decision.reason.as_deref(), Some(ALREADY_SYNCED_TODAY));
    assert_eq!(transport.call_count(), 1);

    // other accounts keep their own slot
    assert!(relay.check_daily_sync("B2", false).await.unwrap().should_sync);
}

#[tokio::test]
async fn manual_sync_bypasses_dedup_and_keeps_the_auto_slot() {
    let transport = FakeTransport::new();
    let (relay, store) = relay_with(&transport, settings()).await;

    relay.sync(payload("A1", SnapshotKind::Ads), SyncTrigger::Manual).await.unwrap();

    assert!(relay.check_daily_sync("A1", false).await.unwrap().should_sync);
    assert_eq!(store.read(|s| s.daily_state("A1")).await.last_status, Some(SyncStatus::Success));

    relay.sync(payload("A1", SnapshotKind::Ads), SyncTrigger::Auto).await.unwrap();
    assert!(relay.check_daily_sync("A1", true).await.unwrap().should_sync);
}

#[tokio::test]
async fn next_day_allows_auto_sync_again() {
    let transport = FakeTransport::new();
    let store = Arc::new(StateStore::in_memory(CompanionState { settings: settings(), ..CompanionState::default() }));

    let monday = start(Arc::clone(&store), &transport, day(14)).await;
    monday.sync(payload("A1", SnapshotKind::Ads), SyncTrigger::Auto).await.unwrap();
    assert!(!monday.check_daily_sync("A1", false).await.unwrap().should_sync);

    let tuesday = start(store, &transport, day(15)).await;
    assert!(tuesday.check_daily_sync("A1", false).await.unwrap().should_sync);
}

#[tokio::test]
async fn disabled_auto_sync_skips_but_manual_proceeds() {
    let transport = FakeTransport::new();
    let (relay, _) = relay_with(&transport, CompanionSettings { auto_sync: false, ..settings() }).await;

    let decision = relay.check_daily_sync("A1", false).await.unwrap();
    assert_eq!(decision.reason.as_deref(), Some(AUTO_SYNC_DISABLED));
    assert!(relay.check_daily_sync("A1", true).await.unwrap().should_sync);
}

#[tokio::test(start_paused = true)]
async fn timed_out_first_attempt_is_retried_once_without_a_bound() {
    let transport = FakeTransport::with_replies([FakeReply::Hang, FakeReply::Slow(Duration::from_secs(30), json!({"id": 9}))]);
    let (relay, _) = relay_with(&transport, settings()).await;

    let receipt = relay.sync(payload("A1", SnapshotKind::Ads), SyncTrigger::Auto).await.unwrap();

    assert!(receipt.retried);
    assert_eq!(receipt.response, json!({"id": 9}));
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_retry_is_reported_and_recorded() {
    let transport = FakeTransport::with_replies([
        FakeReply::Hang,
        FakeReply::Err(TransportError::Network("connection reset".into())),
    ]);
    let (relay, store) = relay_with(&transport, settings()).await;

    let err = relay.sync(payload("A1", SnapshotKind::Ads), SyncTrigger::Auto).await.unwrap_err();

    assert!(matches!(err, RelayError::FailedAfterRetry(TransportError::Network(_))));
    assert_eq!(transport.call_count(), 2);
    let state = store.read(|s| s.daily_state("A1")).await;
    assert_eq!(state.last_status, Some(SyncStatus::Failed));
    assert!(state.last_error.unwrap().contains("after retry"));
    assert!(state.last_sync_date.is_none());
}

#[tokio::test]
async fn auth_rejection_is_not_retried() {
    let transport = FakeTransport::with_replies([FakeReply::Err(TransportError::Unauthorized)]);
    let (relay, _) = relay_with(&transport, settings()).await;

    let err = relay.sync(payload("A1", SnapshotKind::Ads), SyncTrigger::Manual).await.unwrap_err();

    assert_eq!(err, RelayError::Transport(TransportError::Unauthorized));
    assert_eq!(err.to_string(), "Invalid sync API key");
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn live_session_pages_use_the_live_products_endpoint() {
    let transport = FakeTransport::new();
    let (relay, _) = relay_with(&transport, settings()).await;

    relay.sync(payload("A1", SnapshotKind::LiveSession), SyncTrigger::Manual).await.unwrap();

    let (endpoint, body) = transport.calls().remove(0);
    assert_eq!(endpoint, SyncEndpoint::LiveProducts);
    assert_eq!(body["page_type"], "live_session");
    assert_eq!(body["shopee_account_id"], "A1");
}

#[tokio::test]
async fn settings_update_rebuilds_transport_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let transport = FakeTransport::new();
    let relay = start(Arc::new(StateStore::open(&path).await.unwrap()), &transport, day(14)).await;
    assert_eq!(transport.build_count(), 1);

    relay.connect(ConnectedAccount::new("A1", "Toko Test")).await.unwrap();
    relay.update_settings(CompanionSettings { auto_sync: false, ..settings() }).await.unwrap();

    assert_eq!(transport.build_count(), 2);
    assert!(!relay.settings().await.unwrap().auto_sync);

    let reopened = StateStore::open(&path).await.unwrap().snapshot().await;
    assert!(!reopened.settings.auto_sync);
    assert_eq!(reopened.connected_account, Some(ConnectedAccount::new("A1", "Toko Test")));
}

fn scraper(relay: RelayHandle) -> CompanionScraper {
    CompanionScraper::new(relay, Arc::new(PageExtractor::with_defaults().unwrap()), Duration::from_secs(3))
}

#[tokio::test(start_paused = true)]
async fn scraper_needs_a_connected_account() {
    let transport = FakeTransport::new();
    let (relay, _) = relay_with(&transport, settings()).await;
    let page = ScriptedPage::new().at(urls::ADS_CENTER, ADS_HTML);

    let outcome = scraper(relay).on_page_loaded(&page).await;

    assert!(matches!(&outcome, ScrapeOutcome::NotConnected(n) if n.level == NoticeLevel::Warning));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn scraper_ignores_unknown_pages() {
    let transport = FakeTransport::new();
    let (relay, _) = relay_with(&transport, settings()).await;
    relay.connect(ConnectedAccount::new("A1", "Toko Test")).await.unwrap();
    let page = ScriptedPage::new().at("https://shopee.co.id/cart", "<html></html>");

    assert_eq!(scraper(relay).sync_now(&page).await, ScrapeOutcome::Ignored);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn scraper_extracts_syncs_and_then_dedups() {
    let transport = FakeTransport::new();
    let (relay, _) = relay_with(&transport, settings()).await;
    relay.connect(ConnectedAccount::new("A1", "Toko Test")).await.unwrap();
    let page = ScriptedPage::new().at(urls::ADS_CENTER, ADS_HTML);
    let scraper = scraper(relay);

    let first = scraper.on_page_loaded(&page).await;
    assert!(matches!(&first, ScrapeOutcome::Synced(n) if n.level == NoticeLevel::Success));
    let (endpoint, body) = transport.calls().remove(0);
    assert_eq!(endpoint, SyncEndpoint::ShopeeData);
    assert_eq!(body["data"]["spend_today"], json!(1500.0));
    assert_eq!(body["data"]["coins"], json!(0.0));
    assert_eq!(body["page_url"], urls::ADS_CENTER);

    let second = scraper.on_page_loaded(&page).await;
    assert!(matches!(&second, ScrapeOutcome::Skipped(n) if n.message.contains(ALREADY_SYNCED_TODAY)));
    assert_eq!(transport.call_count(), 1);

    let forced = scraper.sync_now(&page).await;
    assert!(matches!(forced, ScrapeOutcome::Synced(_)));
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn scraper_surfaces_sync_failures() {
    let transport = FakeTransport::with_replies([FakeReply::Err(TransportError::Forbidden)]);
    let (relay, _) = relay_with(&transport, settings()).await;
    relay.connect(ConnectedAccount::new("A1", "Toko Test")).await.unwrap();
    let page = ScriptedPage::new().at(urls::ADS_CENTER, ADS_HTML);

    let outcome = scraper(relay).sync_now(&page).await;

    assert!(matches!(&outcome, ScrapeOutcome::Failed(n) if n.level == NoticeLevel::Error && n.message.contains("role")));
}

#[tokio::test(start_paused = true)]
async fn host_syncs_on_navigation_and_on_operator_request() {
    let transport = FakeTransport::new();
    let (relay, _) = relay_with(&transport, settings()).await;
    relay.connect(ConnectedAccount::new("A1", "Toko Test")).await.unwrap();

    let page = ScriptedPage::new().at(urls::ADS_CENTER, ADS_HTML);
    let (notice_tx, mut notices) = mpsc::unbounded_channel();
    let host = CompanionHost::new(scraper(relay), Duration::from_secs(2), Duration::from_secs(300), notice_tx);
    let (commands, command_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let page = page.clone();
        let cancel = cancel.clone();
        async move { host.run(&page, command_rx, cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.call_count(), 1);

    page.show(urls::CREATOR_ORDERS, ORDERS_HTML);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.call_count(), 1);

    commands.send(HostCommand::SyncNow).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(transport.call_count(), 2);
    let (_, body) = transport.calls().remove(1);
    assert_eq!(body["page_type"], "creator_live");
    assert_eq!(body["data"]["orders_ready_to_ship"], json!(12.0));

    let mut levels = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        levels.push(notice.level);
    }
    assert_eq!(levels, vec![NoticeLevel::Success, NoticeLevel::Info, NoticeLevel::Success]);
}

#[tokio::test]
async fn invalid_settings_update_is_rejected_and_keeps_the_transport() {
    let transport = FakeTransport::new();
    let (relay, store) = relay_with(&transport, settings()).await;

    let err = relay
        .update_settings(CompanionSettings { sync_interval_ms: 0, ..settings() })
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidSettings(_)));

    let err = relay
        .update_settings(CompanionSettings { request_timeout_ms: 0, ..settings() })
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidSettings(_)));

    assert_eq!(transport.build_count(), 1);
    assert_eq!(relay.settings().await.unwrap(), settings());
    assert_eq!(store.snapshot().await.settings, settings());
}

#[tokio::test]
async fn relay_refuses_to_start_on_invalid_stored_settings() {
    let transport = FakeTransport::new();
    let state = CompanionState { settings: CompanionSettings { sync_interval_ms: 0, ..settings() }, ..CompanionState::default() };

    let result = Relay::new(Arc::new(StateStore::in_memory(state)), Arc::new(FixedClock(day(14))), transport.factory()).await;

    assert!(matches!(result, Err(RelayError::InvalidSettings(_))));
    assert_eq!(transport.build_count(), 0);
}

#[tokio::test]
async fn changes_saved_by_another_process_reach_the_running_relay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let transport = FakeTransport::new();
    let relay = start(Arc::new(StateStore::open(&path).await.unwrap()), &transport, day(14)).await;
    relay.sync(payload("A1", SnapshotKind::Ads), SyncTrigger::Auto).await.unwrap();

    // a separate `connect` / `settings` invocation writes the same file
    let cli = StateStore::open(&path).await.unwrap();
    cli.update(|s| {
        s.connected_account = Some(ConnectedAccount::new("B2", "Toko B"));
        s.settings.auto_sync = false;
    })
    .await
    .unwrap();

    assert_eq!(relay.connected_account().await.unwrap(), Some(ConnectedAccount::new("B2", "Toko B")));
    let decision = relay.check_daily_sync("B2", false).await.unwrap();
    assert_eq!(decision.reason.as_deref(), Some(AUTO_SYNC_DISABLED));
    assert_eq!(transport.build_count(), 2);

    relay.sync(payload("B2", SnapshotKind::Ads), SyncTrigger::Manual).await.unwrap();
    let on_disk = StateStore::open(&path).await.unwrap().snapshot().await;
    assert_eq!(on_disk.connected_account, Some(ConnectedAccount::new("B2", "Toko B")));
    assert!(!on_disk.settings.auto_sync);
    assert_eq!(on_disk.daily_state("A1").last_sync_date, Some(day(14)));
    assert_eq!(on_disk.daily_state("B2").last_status, Some(SyncStatus::Success));
}

#[tokio::test(start_paused = true)]
async fn host_tolerates_zero_intervals() {
    let transport = FakeTransport::new();
    let (relay, _) = relay_with(&transport, settings()).await;
    relay.connect(ConnectedAccount::new("A1", "Toko Test")).await.unwrap();

    let page = ScriptedPage::new().at(urls::ADS_CENTER, ADS_HTML);
    let (notice_tx, _notices) = mpsc::unbounded_channel();
    let host = CompanionHost::new(scraper(relay), Duration::ZERO, Duration::ZERO, notice_tx);
    let (_commands, command_rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let page = page.clone();
        let cancel = cancel.clone();
        async move { host.run(&page, command_rx, cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(transport.call_count(), 1);
}
