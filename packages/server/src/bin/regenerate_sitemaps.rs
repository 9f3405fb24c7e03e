//! CLI for a full, safe sitemap regeneration
//!
//! Backs up the published set, regenerates every shard through the same
//! export path the server uses, validates, then publishes or rolls back.
//! Prints the run summary as JSON; exits non-zero on failure.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use server_core::kernel::{build_orchestrator, init_tracing, ServerDeps};
use server_core::Config;
use sitemap_export::{RunSummary, StepStatus};

#[derive(Parser)]
#[command(name = "regenerate_sitemaps")]
#[command(about = "Regenerate the published sitemap set with backup and rollback")]
struct Cli {
    /// Override SITEMAP_PUBLISH_DIR
    #[arg(long)]
    publish_dir: Option<PathBuf>,

    /// Override SITEMAP_BASE_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Skip search engine and CDN notifications
    #[arg(long)]
    no_notify: bool,
}

#[derive(Serialize)]
struct Response {
    success: bool,
    summary: RunSummary,
    changed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    notifications: Option<Notifications>,
}

#[derive(Serialize)]
struct Notifications {
    indexnow: String,
    ping: String,
    purge: String,
    purge_batches: usize,
}

fn describe(status: &StepStatus) -> String {
    match status {
        StepStatus::Sent => "sent".to_string(),
        StepStatus::Skipped => "skipped".to_string(),
        StepStatus::Failed(reason) => format!("failed: {}", reason),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.publish_dir {
        config.publish_dir = dir;
    }
    if let Some(base_url) = cli.base_url {
        config.sitemap_base_url = base_url;
    }
    if cli.no_notify {
        config.indexnow_api_key = None;
        config.search_ping_url = None;
        config.cdn = None;
    }

    let deps = ServerDeps::connect(config).await?;
    let orchestrator = build_orchestrator(&deps)?;

    // Failures were already rolled back and logged by the orchestrator.
    let report = orchestrator
        .run()
        .await
        .context("Sitemap regeneration failed")?;

    let response = Response {
        success: true,
        changed_files: report.changed_files.len(),
        notifications: report.notification.as_ref().map(|n| Notifications {
            indexnow: describe(&n.indexnow),
            ping: describe(&n.ping),
            purge: describe(&n.purge),
            purge_batches: n.purge_batches,
        }),
        summary: report.summary,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
