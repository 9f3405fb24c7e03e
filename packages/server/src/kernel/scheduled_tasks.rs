//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (REGISTRY_REFRESH_CRON, daily 03:00 by default)
//!     │
//!     └─► analyze_ranges() over the whole ID space
//!             ├─► swap the live registry (readers never block)
//!             └─► persist EMPTY_RANGES_FILE for the next restart
//! ```

use anyhow::{Context, Result};
use sitemap_export::{analyze_ranges, AnalysisConfig};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::kernel::deps::ServerDeps;

/// Start all scheduled tasks
pub async fn start_scheduler(deps: ServerDeps) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let schedule = deps.config.registry_refresh_cron.clone();

    let refresh_job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
        let deps = deps.clone();
        Box::pin(async move {
            if let Err(e) = refresh_registry(&deps, &AnalysisConfig::default()).await {
                tracing::error!(error = %e, "Registry refresh task failed");
            }
        })
    })
    .with_context(|| format!("Invalid REGISTRY_REFRESH_CRON {:?}", schedule))?;

    scheduler.add(refresh_job).await?;
    scheduler.start().await?;

    tracing::info!(cron = %schedule, "Scheduled tasks started (registry refresh)");
    Ok(scheduler)
}

/// Re-run the range analysis and swap the result in.
///
/// The file is written before the swap so a crash in between never leaves
/// the live registry newer than what the next start would load.
pub async fn refresh_registry(deps: &ServerDeps, analysis: &AnalysisConfig) -> Result<()> {
    tracing::info!("Running registry refresh task");

    let snapshot = analyze_ranges(deps.store.as_ref(), analysis)
        .await
        .context("Range analysis failed")?;

    snapshot
        .save(&deps.config.empty_ranges_file)
        .with_context(|| {
            format!(
                "Failed to write {}",
                deps.config.empty_ranges_file.display()
            )
        })?;

    tracing::info!(
        empty = snapshot.empty_ranges.len(),
        sparse = snapshot.sparse_ranges.len(),
        failed = snapshot.stats.total_failed,
        "Registry refresh complete"
    );
    deps.registry.replace(snapshot);
    Ok(())
}
