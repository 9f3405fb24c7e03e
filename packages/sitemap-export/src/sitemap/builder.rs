//! Full-catalog sitemap generation.
//!
//! Walks the ID space with a keyset cursor instead of OFFSET: each step asks
//! for the next exportable ID after the last window, then exports the
//! fixed-width window containing it. Windows are aligned to the shard width,
//! so shard names are stable between runs and empty stretches of the ID space
//! cost one cursor query no matter how long they are.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::executor::RangeExporter;
use crate::fs_util::{ensure_dir, write_atomic};
use crate::sitemap::xml::{file_url, render_index, render_shard};
use crate::traits::generator::{GenerationReport, SitemapGenerator};
use crate::types::part::SitemapPart;
use crate::types::range::IdRange;
use crate::types::shard::{IndexEntry, PublishLayout, SitemapIndex, SitemapShard};
use crate::types::summary::RunSummary;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub base_url: String,
    pub publish_dir: PathBuf,
    pub layout: PublishLayout,
    /// IDs per shard window
    pub shard_width: i64,
    pub cursor_timeout: Duration,
}

impl BuilderConfig {
    pub fn new(base_url: impl Into<String>, publish_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            publish_dir: publish_dir.into(),
            layout: PublishLayout::default(),
            shard_width: 2000,
            cursor_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_shard_width(mut self, width: i64) -> Self {
        self.shard_width = width;
        self
    }
}

pub struct SitemapBuilder {
    exporter: Arc<RangeExporter>,
    config: BuilderConfig,
}

impl SitemapBuilder {
    pub fn new(exporter: Arc<RangeExporter>, config: BuilderConfig) -> Self {
        Self { exporter, config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    fn write_shard(
        &self,
        window: IdRange,
        parts: &[SitemapPart],
        last_modified: DateTime<Utc>,
    ) -> Result<SitemapShard> {
        let filename = self.config.layout.shard_filename(&window);
        let xml = render_shard(&self.config.base_url, parts, &last_modified);
        write_atomic(&self.config.publish_dir.join(&filename), xml.as_bytes())?;
        debug!(file = %filename, urls = parts.len(), "Wrote shard");

        Ok(SitemapShard {
            filename,
            range_start: window.start,
            range_end: window.end,
            url_count: parts.len(),
            last_modified,
        })
    }
}

#[async_trait]
impl SitemapGenerator for SitemapBuilder {
    #[instrument(skip(self, summary), fields(run_id = %summary.run_id))]
    async fn generate(&self, summary: &mut RunSummary) -> Result<GenerationReport> {
        ensure_dir(&self.config.publish_dir)?;

        let width = self.config.shard_width;
        let store = self.exporter.executor().store().clone();
        let registry = self.exporter.registry().clone();
        let last_modified = Utc::now();

        let mut report = GenerationReport::default();
        let mut index = SitemapIndex::default();
        let mut cursor: i64 = 0;

        while let Some(next_id) = store
            .next_exportable_id(cursor, self.config.cursor_timeout)
            .await?
        {
            let window = IdRange::window_containing(next_id, width)?;

            // Windows the cursor jumped over hold no exportable records.
            summary.empty_ranges += ((window.start - cursor - 1) / width) as usize;

            if registry.is_known_empty(&window) {
                summary.stale_registry_windows += 1;
                warn!(
                    range = %window,
                    first_id = next_id,
                    "Registry marks a non-empty window as empty, querying anyway"
                );
            }

            let parts = match self.exporter.fetch(window).await {
                Ok(parts) => parts,
                Err(e) => {
                    summary.failed_ranges += 1;
                    warn!(range = %window, error = %e, "Shard query failed, aborting generation");
                    return Err(e);
                }
            };

            if parts.is_empty() {
                // The record the cursor saw was removed before the fetch.
                summary.empty_ranges += 1;
            } else {
                let shard = self.write_shard(window, &parts, last_modified)?;
                summary.shards_written += 1;
                summary.urls_written += shard.url_count;
                index.push(IndexEntry {
                    loc: file_url(&self.config.base_url, &shard.filename),
                    last_modified,
                });
                report.shards.push(shard);
            }

            if window.end == i64::MAX {
                break;
            }
            cursor = window.end;
        }

        // The index is written once, after every shard it references exists.
        let index_path = self.config.publish_dir.join(&self.config.layout.index_filename);
        write_atomic(&index_path, render_index(&index).as_bytes())?;

        info!(
            shards = report.shards.len(),
            urls = report.url_count(),
            empty_ranges = summary.empty_ranges,
            stale_registry_windows = summary.stale_registry_windows,
            "Sitemap generation complete"
        );
        Ok(report)
    }
}
