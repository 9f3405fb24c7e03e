// Main entry point for the export server

use anyhow::{Context, Result};
use server_core::{
    kernel::{init_tracing, start_scheduler, ServerDeps},
    server::build_app,
    Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    tracing::info!("Starting sitemap export server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    let port = config.port;
    let deps = ServerDeps::connect(config).await?;

    // Registry refresh runs in the background for the life of the process
    let _scheduler = start_scheduler(deps.clone())
        .await
        .context("Failed to start scheduled tasks")?;

    let app = build_app(deps);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Export endpoint: http://localhost:{}/sitemap-parts", port);
    tracing::info!("Health check: http://localhost:{}/health", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
