//! Integration tests for the export endpoint.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use server_core::server::routes::{CACHE_EMPTY, CACHE_KNOWN_EMPTY, CACHE_PARTS};
use sitemap_export::testing::{seeded_catalog, InjectedFailure};
use sitemap_export::{IdRange, RegistrySnapshot, RegistryStats, SparseRange};

fn range(start: i64, end: i64) -> IdRange {
    IdRange::new(start, end).unwrap()
}

#[tokio::test]
async fn test_returns_enriched_parts_with_metadata_headers() {
    let harness = TestHarness::with_ids(1..=5).unwrap();

    let response = harness.get("/sitemap-parts?offset=0&limit=10").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-range"), Some("1-10"));
    assert_eq!(response.header("x-parts-count"), Some("5"));
    assert_eq!(response.header("x-query-strategy"), Some("partition"));
    assert_eq!(response.header("x-partition"), Some("part_info_p1"));
    assert_eq!(response.header("cache-control"), Some(CACHE_PARTS));
    assert!(response.header("x-query-time").is_some());
    assert!(response.header("x-known-empty").is_none());

    let parts = response.body.as_array().unwrap();
    assert_eq!(parts.len(), 5);
    assert_eq!(parts[0]["catalogId"], "1560-00-0000001");
    assert_eq!(parts[0]["categoryTitle"], "Aircraft Components");
    assert_eq!(parts[0]["subCategoryTitle"], "Airframe Structural Components");
}

#[tokio::test]
async fn test_known_empty_range_never_queries() {
    let snapshot = RegistrySnapshot::new(vec![range(3001, 6000)], vec![], RegistryStats::default());
    let harness = TestHarness::build(seeded_catalog([10, 9500]), snapshot, |_| {}).unwrap();

    let response = harness.get("/sitemap-parts?offset=3000&limit=2000").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, serde_json::json!([]));
    assert_eq!(response.header("x-known-empty"), Some("true"));
    assert_eq!(response.header("x-query-strategy"), Some("known-empty"));
    assert_eq!(response.header("cache-control"), Some(CACHE_KNOWN_EMPTY));
    assert_eq!(harness.catalog.fetch_calls(), 0);
}

#[tokio::test]
async fn test_partially_empty_range_is_queried() {
    let snapshot = RegistrySnapshot::new(vec![range(3001, 6000)], vec![], RegistryStats::default());
    let harness = TestHarness::build(seeded_catalog([10, 6001]), snapshot, |_| {}).unwrap();

    let response = harness.get("/sitemap-parts?offset=5000&limit=2000").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-parts-count"), Some("1"));
    assert_eq!(harness.catalog.fetch_calls(), 1);
}

#[tokio::test]
async fn test_empty_result_gets_shorter_cache() {
    let harness = TestHarness::with_ids([10]).unwrap();

    let response = harness.get("/sitemap-parts?offset=100&limit=100").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, serde_json::json!([]));
    assert_eq!(response.header("x-parts-count"), Some("0"));
    assert_eq!(response.header("cache-control"), Some(CACHE_EMPTY));
}

#[tokio::test]
async fn test_high_id_failure_degrades_to_empty() {
    let harness = TestHarness::with_ids([1_500_010]).unwrap();
    harness
        .catalog
        .fail_range(range(1_500_001, 1_502_000), InjectedFailure::Permanent);

    let response = harness.get("/sitemap-parts?offset=1500000&limit=2000").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, serde_json::json!([]));
    assert_eq!(response.header("x-error-fallback"), Some("true"));
    assert_eq!(response.header("x-query-strategy"), Some("error-fallback"));
    assert_eq!(response.header("cache-control"), Some("public, max-age=300"));
}

#[tokio::test]
async fn test_degraded_sparse_range_is_cached_for_a_week() {
    let sparse = SparseRange {
        start: 1_500_001,
        end: 1_503_000,
        count: 2,
    };
    let snapshot = RegistrySnapshot::new(vec![], vec![sparse], RegistryStats::default());
    let harness = TestHarness::build(seeded_catalog([1_500_010]), snapshot, |_| {}).unwrap();
    harness
        .catalog
        .fail_range(range(1_500_001, 1_502_000), InjectedFailure::Permanent);

    let response = harness.get("/sitemap-parts?offset=1500000&limit=2000").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("cache-control"), Some("public, max-age=604800"));
}

#[tokio::test]
async fn test_low_id_failure_is_a_server_error() {
    let harness = TestHarness::with_ids(1..=5).unwrap();
    harness
        .catalog
        .fail_range(range(1, 2000), InjectedFailure::Permanent);

    let response = harness.get("/sitemap-parts?offset=0&limit=2000").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["error"], "Database query failed");
    assert_eq!(response.body["code"], "DATABASE_ERROR");
    assert_eq!(response.body["range"], "1-2000");
}

#[tokio::test]
async fn test_rejected_when_ceiling_reached() {
    let harness = TestHarness::build(seeded_catalog(1..=5), RegistrySnapshot::default(), |c| {
        c.max_in_flight_exports = 1;
    })
    .unwrap();

    let held = harness.deps.admission.try_acquire().unwrap();
    let response = harness.get("/sitemap-parts?offset=0&limit=10").await;

    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.header("retry-after"), Some("1"));
    assert_eq!(response.body["code"], "ADMISSION_REJECTED");
    assert_eq!(harness.catalog.fetch_calls(), 0);

    drop(held);
    let response = harness.get("/sitemap-parts?offset=0&limit=10").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(harness.deps.admission.in_flight(), 0);
}

#[tokio::test]
async fn test_known_empty_bypasses_admission() {
    let snapshot = RegistrySnapshot::new(vec![range(1, 6000)], vec![], RegistryStats::default());
    let harness = TestHarness::build(seeded_catalog([9000]), snapshot, |c| {
        c.max_in_flight_exports = 0;
    })
    .unwrap();

    let response = harness.get("/sitemap-parts?offset=0&limit=2000").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-known-empty"), Some("true"));

    let response = harness.get("/sitemap-parts?offset=8000&limit=2000").await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_served_on_both_paths() {
    let harness = TestHarness::with_ids(1..=3).unwrap();

    let plain = harness.get("/sitemap-parts?offset=0&limit=10").await;
    let api = harness.get("/api/sitemap-parts?offset=0&limit=10").await;

    assert_eq!(plain.status, StatusCode::OK);
    assert_eq!(plain.body, api.body);
}

#[tokio::test]
async fn test_limit_is_clamped() {
    let harness = TestHarness::with_ids([1, 2500]).unwrap();

    let response = harness.get("/sitemap-parts?offset=0&limit=5000").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-range"), Some("1-2000"));
    assert_eq!(response.header("x-parts-count"), Some("1"));
}

#[tokio::test]
async fn test_invalid_params_are_rejected() {
    let harness = TestHarness::with_ids(1..=3).unwrap();

    for uri in [
        "/sitemap-parts?offset=abc",
        "/sitemap-parts?offset=-5&limit=10",
        "/sitemap-parts?offset=0&limit=ten",
    ] {
        let response = harness.get(uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(response.body["code"], "INVALID_RANGE", "{}", uri);
    }
    assert_eq!(harness.catalog.fetch_calls(), 0);
}

#[tokio::test]
async fn test_health_reports_database_state() {
    let harness = TestHarness::with_ids(1..=3).unwrap();

    let response = harness.get("/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["admission"]["ceiling"], 32);

    harness.catalog.set_unreachable(true);
    let response = harness.get("/health").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["database"]["status"], "error");
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_has_json_body() {
    let harness = TestHarness::build(seeded_catalog(1..=5), RegistrySnapshot::default(), |c| {
        c.request_timeout = std::time::Duration::from_secs(1);
    })
    .unwrap();
    harness
        .catalog
        .set_fetch_delay(std::time::Duration::from_secs(60));

    let response = harness.get("/sitemap-parts?offset=0&limit=10").await;

    assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.body["code"], "REQUEST_TIMEOUT");
    assert_eq!(response.body["error"], "Request timed out");
    // The abandoned export gave its admission slot back.
    assert_eq!(harness.deps.admission.in_flight(), 0);
}
