//! Application setup and server configuration.

use axum::{
    error_handling::HandleErrorLayer, extract::Extension, http::StatusCode, response::Response,
    routing::get, BoxError, Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::routes::sitemap_parts::error_response;
use crate::server::routes::{
    health_handler, sitemap_file_handler, sitemap_index_alias_handler, sitemap_parts_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: ServerDeps,
}

/// Build the Axum application router
///
/// The export endpoint answers on both `/sitemap-parts` and
/// `/api/sitemap-parts`. Published sitemap files are served from the
/// publish directory at the site root.
pub fn build_app(deps: ServerDeps) -> Router {
    let request_timeout = deps.config.request_timeout;
    let app_state = AppState { deps };

    Router::new()
        .route("/sitemap-parts", get(sitemap_parts_handler))
        .route("/api/sitemap-parts", get(sitemap_parts_handler))
        .route("/sitemap_index.xml", get(sitemap_index_alias_handler))
        .route("/:file", get(sitemap_file_handler))
        // Health check (not subject to admission)
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(app_state))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(request_timeout),
        )
        .layer(TraceLayer::new_for_http())
}

/// Give middleware failures the same JSON body as handler errors.
async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!("Request exceeded the server timeout");
        error_response(
            StatusCode::REQUEST_TIMEOUT,
            "Request timed out",
            "REQUEST_TIMEOUT",
            None,
        )
    } else {
        tracing::error!(error = %err, "Unhandled middleware error");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            "INTERNAL_ERROR",
            None,
        )
    }
}
