//! Offline analysis pass for the empty-range registry
//!
//! Counts exportable records per chunk over the ID space and writes the
//! registry file the server loads at startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use server_core::kernel::init_tracing;
use server_core::Config;
use sitemap_export::{analyze_ranges, AnalysisConfig, IdRange, PgCatalogStore, PgStoreConfig};

#[derive(Parser)]
#[command(name = "analyze_ranges")]
#[command(about = "Build the empty/sparse range registry from the catalog")]
struct Cli {
    /// First ID to check
    #[arg(long, default_value_t = 1)]
    start: i64,

    /// Last ID to check
    #[arg(long, default_value_t = 100_000_000)]
    end: i64,

    /// IDs per counted chunk
    #[arg(long, default_value_t = 3000)]
    chunk_width: i64,

    /// Chunks with fewer records than this are recorded as sparse
    #[arg(long, default_value_t = 10)]
    threshold: u64,

    /// Per-count statement timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Output file (defaults to EMPTY_RANGES_FILE)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let analysis = AnalysisConfig {
        span: IdRange::new(cli.start, cli.end).context("Invalid --start/--end")?,
        chunk_width: cli.chunk_width,
        materiality_threshold: cli.threshold,
        statement_timeout: Duration::from_secs(cli.timeout_secs),
    };

    let store = PgCatalogStore::connect(
        &config.database_url,
        PgStoreConfig {
            max_connections: 2,
            acquire_timeout: config.database_acquire_timeout,
            ..Default::default()
        },
    )
    .await
    .context("Failed to connect to database")?;

    let snapshot = analyze_ranges(&store, &analysis).await?;
    let output = cli.output.unwrap_or(config.empty_ranges_file);
    snapshot
        .save(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("{}", serde_json::to_string_pretty(&snapshot.stats)?);
    tracing::info!(path = %output.display(), "Registry written");
    Ok(())
}
