//! End-to-end regeneration through the serving stack, with downstream
//! consumers stubbed by a local HTTP server.

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{spawn_local, TestHarness};
use serde_json::{json, Value};
use sitemap_export::testing::seeded_catalog;
use sitemap_export::{
    BuilderConfig, CdnCredentials, Notifier, NotifierConfig, Orchestrator, RegenerationConfig,
    RegistrySnapshot, RunOutcome, SecretString, SitemapBuilder, StepStatus,
};

const BASE_URL: &str = "https://parts.example.com";

/// Everything the stub consumers received.
#[derive(Default)]
struct Received {
    indexnow: Vec<Value>,
    pings: Vec<String>,
    purges: Vec<(String, Option<String>, Value)>,
}

#[derive(Clone)]
struct Downstream {
    received: Arc<Mutex<Received>>,
    indexnow_status: StatusCode,
    purge_success: bool,
}

async fn indexnow(State(stub): State<Downstream>, Json(body): Json<Value>) -> StatusCode {
    stub.received.lock().unwrap().indexnow.push(body);
    stub.indexnow_status
}

async fn ping(
    State(stub): State<Downstream>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    let sitemap = params.get("sitemap").cloned().unwrap_or_default();
    stub.received.lock().unwrap().pings.push(sitemap);
    StatusCode::OK
}

async fn purge(
    State(stub): State<Downstream>,
    Path(zone): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    stub.received.lock().unwrap().purges.push((zone, auth, body));
    if stub.purge_success {
        Json(json!({ "success": true, "errors": [] }))
    } else {
        Json(json!({ "success": false, "errors": [{ "code": 10000, "message": "Authentication error" }] }))
    }
}

async fn start_downstream(indexnow_status: StatusCode, purge_success: bool) -> (Downstream, SocketAddr) {
    let stub = Downstream {
        received: Arc::new(Mutex::new(Received::default())),
        indexnow_status,
        purge_success,
    };
    let router = Router::new()
        .route("/indexnow", post(indexnow))
        .route("/ping", get(ping))
        .route("/client/v4/zones/:zone/purge_cache", post(purge))
        .with_state(stub.clone());
    let addr = spawn_local(router).await.unwrap();
    (stub, addr)
}

fn notifier(addr: SocketAddr) -> Notifier {
    let mut config = NotifierConfig::new(BASE_URL);
    config.indexnow_endpoint = format!("http://{}/indexnow", addr);
    config.indexnow_key = Some(SecretString::new("abc123"));
    config.ping_url = Some(format!("http://{}/ping", addr));
    config.cdn = Some(CdnCredentials::new("zone-1", "cf-token"));
    config.cdn_api_base = format!("http://{}/client/v4", addr);
    Notifier::new(config).unwrap()
}

struct Workspace {
    _root: tempfile::TempDir,
    publish: std::path::PathBuf,
    backups: std::path::PathBuf,
}

fn workspace() -> Workspace {
    let root = tempfile::tempdir().unwrap();
    let publish = root.path().join("public");
    let backups = root.path().join("backups");
    std::fs::create_dir_all(&publish).unwrap();
    Workspace {
        publish,
        backups,
        _root: root,
    }
}

fn orchestrator(harness: &TestHarness, ws: &Workspace, notifier: Notifier) -> Orchestrator {
    let builder = SitemapBuilder::new(
        harness.deps.exporter.clone(),
        BuilderConfig::new(BASE_URL, &ws.publish),
    );
    let mut config = RegenerationConfig::new(&ws.publish, &ws.backups);
    config.min_free_disk_bytes = 0;
    Orchestrator::new(Arc::new(builder), harness.deps.store.clone(), config)
        .with_notifier(Arc::new(notifier))
}

#[tokio::test]
async fn test_publish_announces_changed_files() {
    let (stub, addr) = start_downstream(StatusCode::ACCEPTED, true).await;
    let harness = TestHarness::with_ids([10, 2500]).unwrap();
    let ws = workspace();

    let report = orchestrator(&harness, &ws, notifier(addr)).run().await.unwrap();

    assert_eq!(report.summary.outcome, Some(RunOutcome::Published));
    assert!(ws.publish.join("sitemap.xml").is_file());
    assert!(ws.publish.join("sitemap-1-2000.xml").is_file());
    assert!(ws.publish.join("sitemap-2001-4000.xml").is_file());

    let notification = report.notification.unwrap();
    assert_eq!(notification.indexnow, StepStatus::Sent);
    assert_eq!(notification.ping, StepStatus::Sent);
    assert_eq!(notification.purge, StepStatus::Sent);
    assert_eq!(notification.urls[0], format!("{}/sitemap.xml", BASE_URL));

    let received = stub.received.lock().unwrap();
    let submission = &received.indexnow[0];
    assert_eq!(submission["host"], "parts.example.com");
    assert_eq!(submission["key"], "abc123");
    assert_eq!(submission["keyLocation"], format!("{}/abc123.txt", BASE_URL));
    let urls = submission["urlList"].as_array().unwrap();
    assert!(urls.contains(&json!(format!("{}/sitemap-1-2000.xml", BASE_URL))));
    assert!(urls.contains(&json!(format!("{}/sitemap-2001-4000.xml", BASE_URL))));

    assert_eq!(received.pings, vec![format!("{}/sitemap.xml", BASE_URL)]);

    let (zone, auth, body) = &received.purges[0];
    assert_eq!(zone, "zone-1");
    assert_eq!(auth.as_deref(), Some("Bearer cf-token"));
    assert_eq!(body["files"].as_array().unwrap().len(), urls.len());
}

#[tokio::test]
async fn test_unchanged_rerun_only_announces_index() {
    let (stub, addr) = start_downstream(StatusCode::OK, true).await;
    let harness = TestHarness::with_ids([10, 2500]).unwrap();
    let ws = workspace();

    orchestrator(&harness, &ws, notifier(addr)).run().await.unwrap();
    let report = orchestrator(&harness, &ws, notifier(addr)).run().await.unwrap();

    assert!(report.changed_files.is_empty());
    let notification = report.notification.unwrap();
    assert_eq!(notification.urls, vec![format!("{}/sitemap.xml", BASE_URL)]);
    assert_eq!(stub.received.lock().unwrap().indexnow.len(), 2);
}

#[tokio::test]
async fn test_purge_is_batched() {
    let (stub, addr) = start_downstream(StatusCode::OK, true).await;
    // 40 shards of width 10, one record each.
    let harness = TestHarness::build(
        seeded_catalog((0..40).map(|i| i * 10 + 1)),
        RegistrySnapshot::default(),
        |_| {},
    )
    .unwrap();
    let ws = workspace();
    let builder = SitemapBuilder::new(
        harness.deps.exporter.clone(),
        BuilderConfig::new(BASE_URL, &ws.publish).with_shard_width(10),
    );
    let mut config = RegenerationConfig::new(&ws.publish, &ws.backups);
    config.min_free_disk_bytes = 0;
    let orchestrator = Orchestrator::new(Arc::new(builder), harness.deps.store.clone(), config)
        .with_notifier(Arc::new(notifier(addr)));

    let report = orchestrator.run().await.unwrap();

    let notification = report.notification.unwrap();
    assert_eq!(notification.urls.len(), 41);
    assert_eq!(notification.purge_batches, 2);
    let received = stub.received.lock().unwrap();
    assert_eq!(received.purges.len(), 2);
    assert_eq!(received.purges[0].2["files"].as_array().unwrap().len(), 30);
    assert_eq!(received.purges[1].2["files"].as_array().unwrap().len(), 11);
}

#[tokio::test]
async fn test_downstream_failures_do_not_fail_the_run() {
    let (_stub, addr) = start_downstream(StatusCode::INTERNAL_SERVER_ERROR, false).await;
    let harness = TestHarness::with_ids([10]).unwrap();
    let ws = workspace();

    let report = orchestrator(&harness, &ws, notifier(addr)).run().await.unwrap();

    assert_eq!(report.summary.outcome, Some(RunOutcome::Published));
    let notification = report.notification.unwrap();
    assert!(matches!(notification.indexnow, StepStatus::Failed(_)));
    assert_eq!(notification.ping, StepStatus::Sent);
    assert!(matches!(notification.purge, StepStatus::Failed(_)));
}

#[tokio::test]
async fn test_failed_run_sends_nothing() {
    let (stub, addr) = start_downstream(StatusCode::OK, true).await;
    let harness = TestHarness::with_ids([10]).unwrap();
    harness.catalog.set_unreachable(true);
    let ws = workspace();

    let result = orchestrator(&harness, &ws, notifier(addr)).run().await;

    assert!(result.is_err());
    let received = stub.received.lock().unwrap();
    assert!(received.indexnow.is_empty());
    assert!(received.pings.is_empty());
    assert!(received.purges.is_empty());
}
