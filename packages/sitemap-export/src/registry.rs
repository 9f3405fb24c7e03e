//! Empty/sparse range registry.
//!
//! A precomputed set of ID intervals confirmed to hold no (or almost no)
//! exportable records. It is consulted before any query and may only be wrong
//! in the conservative direction: a range is reported empty only when a single
//! registered interval fully contains it.
//!
//! ```text
//! analyze_ranges (offline, chunked COUNT)  ──►  RegistrySnapshot  ──►  JSON file
//!                                                     │
//!                                  EmptyRangeRegistry::replace (atomic swap)
//!                                                     │
//!                              is_known_empty / sparse_count (lock-free reads)
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SitemapError};
use crate::fs_util::write_atomic;
use crate::traits::store::CatalogStore;
use crate::types::range::{coalesce, IdRange};

/// A chunk with some records, but fewer than the materiality threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseRange {
    pub start: i64,
    pub end: i64,
    pub count: u64,
}

impl SparseRange {
    pub fn range(&self) -> IdRange {
        IdRange {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_empty: usize,
    pub total_sparse: usize,
    pub total_valid: usize,
    /// Chunks whose count query failed; never registered as empty
    #[serde(default)]
    pub total_failed: usize,
    pub checked_from: i64,
    pub checked_to: i64,
}

/// Immutable registry contents. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub generated: DateTime<Utc>,
    pub empty_ranges: Vec<IdRange>,
    pub sparse_ranges: Vec<SparseRange>,
    #[serde(default)]
    pub stats: RegistryStats,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            generated: DateTime::<Utc>::UNIX_EPOCH,
            empty_ranges: Vec::new(),
            sparse_ranges: Vec::new(),
            stats: RegistryStats::default(),
        }
    }
}

impl RegistrySnapshot {
    /// Build a normalized snapshot.
    ///
    /// Empty entries are sorted and coalesced (overlapping and adjacent
    /// intervals merge). Sparse entries that fall inside an empty interval are
    /// dropped, the rest are sorted.
    pub fn new(
        empty_ranges: Vec<IdRange>,
        mut sparse_ranges: Vec<SparseRange>,
        stats: RegistryStats,
    ) -> Self {
        let empty_ranges = coalesce(empty_ranges);
        sparse_ranges.retain(|s| !covered_by(&empty_ranges, &s.range()));
        sparse_ranges.sort_by_key(|s| (s.start, s.end));
        sparse_ranges.dedup_by_key(|s| (s.start, s.end));

        Self {
            generated: Utc::now(),
            empty_ranges,
            sparse_ranges,
            stats,
        }
    }

    /// Read a snapshot from JSON, normalizing hand-edited files.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| SitemapError::io(path, e))?;
        let parsed: RegistrySnapshot = serde_json::from_str(&raw)?;
        let generated = parsed.generated;
        let mut snapshot = Self::new(parsed.empty_ranges, parsed.sparse_ranges, parsed.stats);
        snapshot.generated = generated;
        Ok(snapshot)
    }

    /// Persist atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }

    pub fn is_known_empty(&self, range: &IdRange) -> bool {
        covered_by(&self.empty_ranges, range)
    }

    /// Smallest recorded count among sparse chunks overlapping `range`.
    pub fn sparse_count(&self, range: &IdRange) -> Option<u64> {
        self.sparse_ranges
            .iter()
            .filter(|s| s.range().overlaps(range))
            .map(|s| s.count)
            .min()
    }
}

/// True if a single interval of the (sorted, disjoint) list contains `range`.
fn covered_by(sorted: &[IdRange], range: &IdRange) -> bool {
    let idx = sorted.partition_point(|r| r.start <= range.start);
    idx > 0 && sorted[idx - 1].contains(range)
}

/// Process-wide registry handle. Readers never block; refresh swaps the whole
/// snapshot.
#[derive(Debug, Default)]
pub struct EmptyRangeRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
}

impl EmptyRangeRegistry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Load from a file, or start empty if the file is missing or unreadable.
    pub fn load_or_empty(path: &Path) -> Self {
        match RegistrySnapshot::load(path) {
            Ok(snapshot) => {
                info!(
                    path = %path.display(),
                    empty = snapshot.empty_ranges.len(),
                    sparse = snapshot.sparse_ranges.len(),
                    generated = %snapshot.generated,
                    "Loaded empty-range registry"
                );
                Self::new(snapshot)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "No usable empty-range registry, starting empty");
                Self::default()
            }
        }
    }

    pub fn is_known_empty(&self, range: &IdRange) -> bool {
        self.snapshot.load().is_known_empty(range)
    }

    pub fn sparse_count(&self, range: &IdRange) -> Option<u64> {
        self.snapshot.load().sparse_count(range)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn replace(&self, snapshot: RegistrySnapshot) {
        debug!(
            empty = snapshot.empty_ranges.len(),
            sparse = snapshot.sparse_ranges.len(),
            "Swapping empty-range registry"
        );
        self.snapshot.store(Arc::new(snapshot));
    }
}

/// Parameters of the offline analysis pass.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub span: IdRange,
    pub chunk_width: i64,
    /// Chunks with fewer records than this are sparse
    pub materiality_threshold: u64,
    pub statement_timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            span: IdRange {
                start: 1,
                end: 100_000_000,
            },
            chunk_width: 3000,
            materiality_threshold: 10,
            statement_timeout: Duration::from_secs(30),
        }
    }
}

/// Count every chunk of the span and classify it.
///
/// Chunks whose count fails are treated as unknown, so a flaky database can
/// only make the registry smaller, never claim a non-empty range is empty.
pub async fn analyze_ranges(
    store: &dyn CatalogStore,
    config: &AnalysisConfig,
) -> Result<RegistrySnapshot> {
    if config.chunk_width < 1 {
        return Err(SitemapError::Config(format!(
            "chunk width must be >= 1, got {}",
            config.chunk_width
        )));
    }

    let span = config.span;
    let mut empty = Vec::new();
    let mut sparse = Vec::new();
    let mut stats = RegistryStats {
        checked_from: span.start,
        checked_to: span.end,
        ..Default::default()
    };

    let total_chunks = (span.width() + config.chunk_width - 1) / config.chunk_width;
    let progress_every = (total_chunks / 20).max(1);

    info!(
        span = %span,
        chunk_width = config.chunk_width,
        chunks = total_chunks,
        "Analyzing ID space for empty ranges"
    );

    let mut start = span.start;
    let mut chunk_no: i64 = 0;
    while start <= span.end {
        let end = start.saturating_add(config.chunk_width - 1).min(span.end);
        let chunk = IdRange { start, end };

        match store.count_range(chunk, config.statement_timeout).await {
            Ok(0) => {
                stats.total_empty += 1;
                empty.push(chunk);
            }
            Ok(count) if count < config.materiality_threshold => {
                stats.total_sparse += 1;
                sparse.push(SparseRange { start, end, count });
            }
            Ok(_) => stats.total_valid += 1,
            Err(e) => {
                stats.total_failed += 1;
                warn!(range = %chunk, error = %e, "Count failed, leaving chunk unclassified");
            }
        }

        chunk_no += 1;
        if chunk_no % progress_every == 0 {
            info!(
                "Analysis progress: {:.1}%",
                chunk_no as f64 / total_chunks as f64 * 100.0
            );
        }

        if end == span.end {
            break;
        }
        start = end + 1;
    }

    let snapshot = RegistrySnapshot::new(empty, sparse, stats);
    info!(
        empty_intervals = snapshot.empty_ranges.len(),
        sparse = snapshot.sparse_ranges.len(),
        valid = snapshot.stats.total_valid,
        failed = snapshot.stats.total_failed,
        "Analysis complete"
    );
    Ok(snapshot)
}
