//! Sitemap health check
//!
//! Checks freshness, structure and public reachability of the published
//! sitemap. Exit code 0 when healthy, 1 on warnings, 2 when critical.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use server_core::kernel::init_tracing;
use sitemap_export::{HealthConfig, HealthMonitor, HealthStatus};

#[derive(Parser)]
#[command(name = "sitemap_health")]
#[command(about = "Check freshness, structure and reachability of the published sitemap")]
struct Cli {
    /// Directory holding the published sitemap (defaults to SITEMAP_PUBLISH_DIR)
    #[arg(long)]
    publish_dir: Option<PathBuf>,

    /// Public base URL (defaults to SITEMAP_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Skip the live HTTP fetch of the index
    #[arg(long)]
    offline: bool,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let publish_dir = cli
        .publish_dir
        .unwrap_or_else(|| env_or("SITEMAP_PUBLISH_DIR", "public").into());
    let base_url = cli
        .base_url
        .unwrap_or_else(|| env_or("SITEMAP_BASE_URL", "https://localhost"));

    let mut config = HealthConfig::new(publish_dir, base_url);
    if cli.offline {
        config.reachability_timeout = None;
    }

    let report = HealthMonitor::new(config)?.check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == HealthStatus::Critical {
        eprintln!("Sitemap is critically stale: run regenerate_sitemaps");
    }
    std::process::exit(report.exit_code());
}
