use std::time::{Duration, Instant};

use axum::{extract::Extension, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sitemap_export::{HealthConfig, HealthMonitor, HealthStatus};

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    admission: AdmissionHealth,
    registry: RegistryHealth,
    title_cache: TitleCacheHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    sitemap: Option<SitemapFreshness>,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct AdmissionHealth {
    in_flight: usize,
    ceiling: usize,
}

#[derive(Serialize)]
pub struct RegistryHealth {
    generated: DateTime<Utc>,
    empty_ranges: usize,
    sparse_ranges: usize,
}

#[derive(Serialize)]
pub struct TitleCacheHealth {
    reloads: u64,
}

#[derive(Serialize)]
pub struct SitemapFreshness {
    status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<DateTime<Utc>>,
    message: String,
}

/// Health check endpoint
///
/// Checks:
/// - Database connectivity and responsiveness
/// - Admission controller utilization
/// - Registry and title cache state
/// - Freshness of the published sitemap index, when one exists locally
///
/// Returns 200 OK if the database answers, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let deps = &state.deps;

    // Check database connection and measure latency
    let started = Instant::now();
    let db_health = match tokio::time::timeout(Duration::from_secs(5), deps.store.ping()).await {
        Ok(Ok(())) => DatabaseHealth {
            status: "ok".to_string(),
            response_time_ms: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Ok(Err(e)) => DatabaseHealth {
            status: "error".to_string(),
            response_time_ms: None,
            error: Some(format!("Query failed: {}", e.code())),
        },
        Err(_) => DatabaseHealth {
            status: "error".to_string(),
            response_time_ms: None,
            error: Some("Query timeout (>5s)".to_string()),
        },
    };

    let snapshot = deps.registry.snapshot();
    let registry = RegistryHealth {
        generated: snapshot.generated,
        empty_ranges: snapshot.empty_ranges.len(),
        sparse_ranges: snapshot.sparse_ranges.len(),
    };

    // Freshness only; the public fetch belongs to the health CLI.
    let index = deps
        .config
        .publish_dir
        .join(&sitemap_export::PublishLayout::default().index_filename);
    let sitemap = if index.is_file() {
        let mut check = HealthConfig::new(&deps.config.publish_dir, &deps.config.sitemap_base_url);
        check.reachability_timeout = None;
        HealthMonitor::new(check).ok().map(|monitor| {
            let freshness = monitor.freshness(Utc::now());
            SitemapFreshness {
                status: freshness.status,
                last_modified: freshness.last_modified,
                message: freshness.message,
            }
        })
    } else {
        None
    };

    let is_healthy = db_health.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            database: db_health,
            admission: AdmissionHealth {
                in_flight: deps.admission.in_flight(),
                ceiling: deps.admission.ceiling(),
            },
            registry,
            title_cache: TitleCacheHealth {
                reloads: deps.titles.reload_count(),
            },
            sitemap,
        }),
    )
}
