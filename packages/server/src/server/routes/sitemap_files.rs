//! `GET /sitemap.xml`, `GET /sitemap_index.xml` and `GET /sitemap-{start}-{end}.xml`
//!
//! Serves the published sitemap set straight from the publish directory.
//! Only names the publish layout recognizes as the index or a shard are
//! reachable; everything else in the directory stays private.

use axum::{
    body::Body,
    extract::{Extension, Path, Request},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use sitemap_export::PublishLayout;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::server::app::AppState;
use crate::server::routes::sitemap_parts::error_response;

pub const CACHE_SITEMAP_FILE: &str = "public, max-age=3600, stale-while-revalidate=86400";
const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Index or shard by file name
pub async fn sitemap_file_handler(
    Extension(state): Extension<AppState>,
    Path(file): Path<String>,
    request: Request,
) -> Response {
    let layout = PublishLayout::default();
    if file != layout.index_filename && !layout.is_shard(&file) {
        return not_found(&file);
    }
    serve_published(&state, &file, request).await
}

/// Legacy index location some crawlers were given
pub async fn sitemap_index_alias_handler(
    Extension(state): Extension<AppState>,
    request: Request,
) -> Response {
    let index = PublishLayout::default().index_filename;
    serve_published(&state, &index, request).await
}

async fn serve_published(state: &AppState, file: &str, request: Request) -> Response {
    let path = state.deps.config.publish_dir.join(file);
    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    if response.status() == StatusCode::NOT_FOUND {
        return not_found(file);
    }

    let mut response = response.map(Body::new);
    if response.status().is_success() {
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_SITEMAP_FILE));
    }
    response
}

fn not_found(file: &str) -> Response {
    tracing::debug!(file, "Sitemap file not found");
    error_response(
        StatusCode::NOT_FOUND,
        &format!("No published sitemap file {}", file),
        "NOT_FOUND",
        None,
    )
}
