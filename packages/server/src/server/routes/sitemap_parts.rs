//! `GET /sitemap-parts?offset=<int>&limit=<int>`
//!
//! Returns one range of exportable records as a JSON array. Crawler-facing
//! caches sit in front of this endpoint, so every response carries a cache
//! directive chosen by how trustworthy the result is.

use axum::{
    extract::{Extension, Query},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sitemap_export::{ExportOutcome, IdRange, RangeExport, SitemapError, SitemapPart};

use crate::server::app::AppState;

pub const CACHE_KNOWN_EMPTY: &str = "public, max-age=604800, immutable";
pub const CACHE_EMPTY: &str = "public, max-age=86400, stale-while-revalidate=604800";
pub const CACHE_PARTS: &str = "public, max-age=3600, stale-while-revalidate=86400";

/// Seconds a rejected client should wait before retrying.
pub const RETRY_AFTER_SECS: u64 = 1;

static X_RANGE: HeaderName = HeaderName::from_static("x-range");
static X_PARTS_COUNT: HeaderName = HeaderName::from_static("x-parts-count");
static X_QUERY_TIME: HeaderName = HeaderName::from_static("x-query-time");
static X_PARTITION: HeaderName = HeaderName::from_static("x-partition");
static X_QUERY_STRATEGY: HeaderName = HeaderName::from_static("x-query-strategy");
static X_KNOWN_EMPTY: HeaderName = HeaderName::from_static("x-known-empty");
static X_ERROR_FALLBACK: HeaderName = HeaderName::from_static("x-error-fallback");

/// Raw query parameters; parsed by hand so bad input gets the JSON error body.
#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub offset: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

pub(crate) fn error_response(
    status: StatusCode,
    error: &str,
    code: &'static str,
    range: Option<IdRange>,
) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            code,
            range: range.map(|r| r.to_string()),
        }),
    )
        .into_response()
}

fn parse_param(name: &str, raw: Option<&str>) -> Result<Option<i64>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| format!("{} must be an integer, got {:?}", name, value)),
    }
}

fn requested_range(params: &ExportParams, max_limit: i64) -> Result<IdRange, String> {
    let offset = parse_param("offset", params.offset.as_deref())?.unwrap_or(0);
    let limit = parse_param("limit", params.limit.as_deref())?;
    IdRange::from_offset_limit(offset, limit, max_limit).map_err(|e| e.to_string())
}

/// Export endpoint handler
pub async fn sitemap_parts_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<ExportParams>,
) -> Response {
    let deps = &state.deps;
    let range = match requested_range(&params, deps.config.max_export_limit) {
        Ok(range) => range,
        Err(reason) => {
            return error_response(StatusCode::BAD_REQUEST, &reason, "INVALID_RANGE", None)
        }
    };

    // Known-empty ranges never touch the database, so they skip admission.
    let _permit = if deps.registry.is_known_empty(&range) {
        None
    } else {
        match deps.admission.try_acquire() {
            Some(permit) => Some(permit),
            None => {
                tracing::warn!(
                    range = %range,
                    in_flight = deps.admission.in_flight(),
                    ceiling = deps.admission.ceiling(),
                    "Export rejected by admission control"
                );
                let mut response = error_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "Too many concurrent export requests",
                    "ADMISSION_REJECTED",
                    Some(range),
                );
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
                return response;
            }
        }
    };

    match deps.exporter.export(range).await {
        Ok(export) => {
            tracing::info!(
                range = %range,
                strategy = export.strategy(),
                parts = export.parts().len(),
                elapsed_ms = export.elapsed.as_millis() as u64,
                "Served export range"
            );
            export_response(export)
        }
        Err(e) => {
            tracing::error!(range = %range, error = %e, code = e.code(), "Export failed");
            failure_response(&e, range)
        }
    }
}

fn failure_response(err: &SitemapError, range: IdRange) -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Database query failed",
        err.code(),
        Some(range),
    )
}

/// Body, metadata headers and cache directive for a completed export.
pub fn export_response(export: RangeExport) -> Response {
    let mut headers = HeaderMap::new();
    insert(&mut headers, &X_RANGE, export.range.to_string());
    insert(&mut headers, &X_QUERY_TIME, export.elapsed.as_millis().to_string());
    insert(&mut headers, &X_QUERY_STRATEGY, export.strategy().to_string());
    if let Some(name) = export.route().and_then(|r| r.partition_name()) {
        insert(&mut headers, &X_PARTITION, name.to_string());
    }

    let cache_control = match &export.outcome {
        ExportOutcome::KnownEmpty => {
            insert(&mut headers, &X_KNOWN_EMPTY, "true".to_string());
            CACHE_KNOWN_EMPTY.to_string()
        }
        ExportOutcome::Degraded { cache_ttl, .. } => {
            insert(&mut headers, &X_ERROR_FALLBACK, "true".to_string());
            format!("public, max-age={}", cache_ttl.as_secs())
        }
        ExportOutcome::Parts { parts, .. } if parts.is_empty() => CACHE_EMPTY.to_string(),
        ExportOutcome::Parts { .. } => CACHE_PARTS.to_string(),
    };
    insert(&mut headers, &header::CACHE_CONTROL, cache_control);

    let parts: Vec<SitemapPart> = export.into_parts();
    insert(&mut headers, &X_PARTS_COUNT, parts.len().to_string());

    (StatusCode::OK, headers, Json(parts)).into_response()
}

fn insert(headers: &mut HeaderMap, name: &HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name.clone(), value);
    }
}
