//! The Generate step of a regeneration run.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::shard::SitemapShard;
use crate::types::summary::RunSummary;

/// What a generation pass wrote into the publish directory.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub shards: Vec<SitemapShard>,
}

impl GenerationReport {
    pub fn url_count(&self) -> usize {
        self.shards.iter().map(|s| s.url_count).sum()
    }
}

/// Writes a full shard set and its index into the publish directory.
///
/// Implementations record per-range counts in `summary` as they go. Any error
/// aborts the run and triggers rollback.
#[async_trait]
pub trait SitemapGenerator: Send + Sync {
    async fn generate(&self, summary: &mut RunSummary) -> Result<GenerationReport>;
}
