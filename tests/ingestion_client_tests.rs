//! Ingestion client against a local HTTP server
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use shopee_realtime_bot::domain::{Account, FieldMap, FieldValue, Snapshot, SnapshotKind};
use shopee_realtime_bot::infrastructure::ingestion_client::ACCESS_CODE_HEADER;
use shopee_realtime_bot::infrastructure::{IngestionClient, IngestionConfig, IngestionError};

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

async fn record(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let code = headers.get(ACCESS_CODE_HEADER).and_then(|v| v.to_str().ok()).map(ToString::to_string);
    let authorized = code.as_deref() == Some("letmein");
    let count = body["snapshots"].as_array().map_or(1, Vec::len);
    seen.lock().unwrap().push((code, body));

    if authorized {
        (StatusCode::OK, Json(json!({ "snapshot_id": 42, "ingested": count, "total": count })))
    } else {
        (StatusCode::FORBIDDEN, Json(json!({ "detail": "Invalid access code" })))
    }
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({}))
}

async fn serve(seen: Seen) -> String {
    let app = Router::new()
        .route("/api/bot/realtime-snapshots/ingest", post(record))
        .route("/api/bot/realtime-snapshots/ingest-batch", post(record))
        .route("/slow/bot/realtime-snapshots/ingest", post(slow))
        .with_state(seen);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn client(base: &str, path: &str, access_code: &str) -> IngestionClient {
    IngestionClient::new(IngestionConfig {
        api_base: format!("{base}{path}"),
        access_code: access_code.to_string(),
        timeout: Duration::from_millis(300),
        batch_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn snapshot(kind: SnapshotKind) -> Snapshot {
    let mut fields = FieldMap::new();
    fields.insert("spend_today".into(), FieldValue::Number(1500.0));
    Snapshot::new(&Account::new("A1", "Toko A"), kind, fields, "https://seller.shopee.co.id/portal/marketing/pas")
}

#[tokio::test]
async fn submit_sends_access_code_and_payload() {
    let seen = Seen::default();
    let base = serve(Arc::clone(&seen)).await;

    let receipt = client(&base, "/api", "letmein").submit(&snapshot(SnapshotKind::Ads)).await.unwrap();

    assert_eq!(receipt.snapshot_id, Some(json!(42)));
    let (code, body) = seen.lock().unwrap().remove(0);
    assert_eq!(code.as_deref(), Some("letmein"));
    assert_eq!(body["shopee_account_id"], "A1");
    assert_eq!(body["snapshot_type"], "ads");
    assert_eq!(body["data"]["spend_today"], 1500.0);
    assert_eq!(body["data"]["page_url"], "https://seller.shopee.co.id/portal/marketing/pas");
}

#[tokio::test]
async fn rejection_surfaces_server_detail() {
    let base = serve(Seen::default()).await;

    let err = client(&base, "/api", "wrong").submit(&snapshot(SnapshotKind::Ads)).await.unwrap_err();

    assert_eq!(err, IngestionError::Rejected { status: 403, detail: "Invalid access code".into() });
    assert_eq!(err.to_string(), "Invalid access code");
}

#[tokio::test]
async fn slow_server_hits_the_request_timeout() {
    let base = serve(Seen::default()).await;

    let err = client(&base, "/slow", "letmein").submit(&snapshot(SnapshotKind::Ads)).await.unwrap_err();

    assert_eq!(err, IngestionError::Timeout(Duration::from_millis(300)));
}

#[tokio::test]
async fn batch_wraps_snapshots_in_one_call() {
    let seen = Seen::default();
    let base = serve(Arc::clone(&seen)).await;
    let batch = [snapshot(SnapshotKind::Ads), snapshot(SnapshotKind::CreatorLive)];

    let receipt = client(&base, "/api", "letmein").submit_batch(&batch).await.unwrap();

    assert_eq!(receipt.ingested, 2);
    assert_eq!(receipt.total, 2);
    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1["snapshots"][1]["snapshot_type"], "creator_live");
}
