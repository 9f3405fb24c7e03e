//! Bounded range queries and the export path shared by the HTTP endpoint and
//! the sitemap builder.
//!
//! ```text
//! range ─► registry.is_known_empty? ──yes──► KnownEmpty (no query)
//!              │ no
//!              ▼
//!          router.route ─► QueryExecutor (statement timeout, bounded retry)
//!              │                     │ error in high-ID range
//!              ▼                     ▼
//!          TitleCache::enrich    Degraded (empty, short or long cache)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cache::TitleCache;
use crate::error::{Result, SitemapError};
use crate::partition::{PartitionRouter, RouteDecision};
use crate::registry::EmptyRangeRegistry;
use crate::retry::{RetryPolicy, HIGH_ID_THRESHOLD};
use crate::traits::store::{CatalogStore, RangeQuery};
use crate::types::part::{CatalogPart, SitemapPart};
use crate::types::range::IdRange;

/// Extra time the client-side hard bound allows past the statement timeout,
/// so the server-side timeout normally fires first.
const HARD_BOUND_SLACK: Duration = Duration::from_secs(2);

/// Smallest per-attempt budget worth starting a retry with.
const MIN_ATTEMPT_BUDGET: Duration = Duration::from_secs(1);

pub const DEGRADED_SPARSE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEGRADED_UNKNOWN_TTL: Duration = Duration::from_secs(5 * 60);

/// Statement timeout as a function of where the range sits and how wide it is.
///
/// High-ID partitions are cold and scanned rarely, so they get more room,
/// but every budget is capped.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    pub base: Duration,
    pub high: Duration,
    pub very_high: Duration,
    pub high_threshold: i64,
    pub very_high_threshold: i64,
    /// Added for ranges wider than `wide_range_width`
    pub wide_range_extra: Duration,
    pub wide_range_width: i64,
    pub max: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            high: Duration::from_secs(20),
            very_high: Duration::from_secs(25),
            high_threshold: HIGH_ID_THRESHOLD,
            very_high_threshold: 3_000_000,
            wide_range_extra: Duration::from_secs(5),
            wide_range_width: 2000,
            max: Duration::from_secs(30),
        }
    }
}

impl TimeoutPolicy {
    pub fn for_range(&self, range: &IdRange) -> Duration {
        let mut timeout = if range.start >= self.very_high_threshold {
            self.very_high
        } else if range.start > self.high_threshold {
            self.high
        } else {
            self.base
        };
        if range.width() > self.wide_range_width {
            timeout += self.wide_range_extra;
        }
        timeout.min(self.max)
    }
}

/// Issues one range query with a statement timeout and bounded retries.
pub struct QueryExecutor {
    store: Arc<dyn CatalogStore>,
    timeouts: TimeoutPolicy,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            timeouts: TimeoutPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    /// Run the narrowest query the route allows.
    ///
    /// Records come back ordered by ID ascending. Errors are returned only
    /// after the retry policy is exhausted.
    #[instrument(skip(self, route), fields(range = %range, partition = route.partition_name()))]
    pub async fn execute(&self, range: IdRange, route: &RouteDecision) -> Result<Vec<CatalogPart>> {
        let started = Instant::now();
        let statement_timeout = self.timeouts.for_range(&range);
        let mut query = RangeQuery {
            range,
            partition: route.partition_name().map(str::to_string),
            statement_timeout,
        };
        let mut attempt: u32 = 1;

        loop {
            let hard_bound = query.statement_timeout + HARD_BOUND_SLACK;
            let result = match tokio::time::timeout(hard_bound, self.store.fetch_range(&query)).await
            {
                Ok(result) => result,
                Err(_) => Err(SitemapError::QueryStatementTimeout {
                    range,
                    timeout_ms: query.statement_timeout.as_millis() as u64,
                }),
            };

            let error = match result {
                Ok(parts) => {
                    debug!(
                        attempt,
                        parts = parts.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Range query complete"
                    );
                    return Ok(parts);
                }
                Err(e) => e,
            };

            if !self.retry.should_retry(&error, &range, attempt) {
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            let remaining = self
                .retry
                .deadline
                .checked_sub(started.elapsed() + delay)
                .filter(|r| *r >= MIN_ATTEMPT_BUDGET);
            let Some(remaining) = remaining else {
                warn!(attempt, error = %error, "Retry budget exhausted");
                return Err(error);
            };

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Range query failed, retrying"
            );
            tokio::time::sleep(delay).await;
            query.statement_timeout = statement_timeout.min(remaining);
            attempt += 1;
        }
    }
}

/// What an export request produced.
#[derive(Debug)]
pub enum ExportOutcome {
    /// The registry proved the range empty; no query ran
    KnownEmpty,
    Parts {
        parts: Vec<SitemapPart>,
        route: RouteDecision,
    },
    /// The query failed in an unreliable region and was turned into an
    /// empty result
    Degraded {
        route: RouteDecision,
        cache_ttl: Duration,
        error: SitemapError,
    },
}

#[derive(Debug)]
pub struct RangeExport {
    pub range: IdRange,
    pub outcome: ExportOutcome,
    pub elapsed: Duration,
}

impl RangeExport {
    pub fn parts(&self) -> &[SitemapPart] {
        match &self.outcome {
            ExportOutcome::Parts { parts, .. } => parts,
            _ => &[],
        }
    }

    pub fn into_parts(self) -> Vec<SitemapPart> {
        match self.outcome {
            ExportOutcome::Parts { parts, .. } => parts,
            _ => Vec::new(),
        }
    }

    pub fn route(&self) -> Option<&RouteDecision> {
        match &self.outcome {
            ExportOutcome::KnownEmpty => None,
            ExportOutcome::Parts { route, .. } | ExportOutcome::Degraded { route, .. } => {
                Some(route)
            }
        }
    }

    /// Value for the `X-Query-Strategy` response header.
    pub fn strategy(&self) -> &'static str {
        match &self.outcome {
            ExportOutcome::KnownEmpty => "known-empty",
            ExportOutcome::Degraded { .. } => "error-fallback",
            ExportOutcome::Parts { route, .. } => route.strategy(),
        }
    }
}

/// Registry check, routing, bounded query and title enrichment in one place,
/// so serving and regeneration agree on what "empty" and "valid" mean.
pub struct RangeExporter {
    registry: Arc<EmptyRangeRegistry>,
    router: Arc<PartitionRouter>,
    executor: QueryExecutor,
    titles: Arc<TitleCache>,
    degrade_from: i64,
}

impl RangeExporter {
    pub fn new(
        registry: Arc<EmptyRangeRegistry>,
        router: Arc<PartitionRouter>,
        executor: QueryExecutor,
        titles: Arc<TitleCache>,
    ) -> Self {
        Self {
            registry,
            router,
            executor,
            titles,
            degrade_from: HIGH_ID_THRESHOLD,
        }
    }

    /// Failures in ranges starting above this ID degrade to empty.
    pub fn with_degrade_threshold(mut self, threshold: i64) -> Self {
        self.degrade_from = threshold;
        self
    }

    pub fn registry(&self) -> &Arc<EmptyRangeRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &PartitionRouter {
        &self.router
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Serving path: consult the registry, query, and degrade failures in the
    /// high-ID region. Low-ID failures are returned as errors.
    #[instrument(skip(self), fields(range = %range))]
    pub async fn export(&self, range: IdRange) -> Result<RangeExport> {
        let started = Instant::now();

        if self.registry.is_known_empty(&range) {
            debug!("Known empty range, skipping query");
            return Ok(RangeExport {
                range,
                outcome: ExportOutcome::KnownEmpty,
                elapsed: started.elapsed(),
            });
        }

        let route = self.router.route(&range);
        let outcome = match self.executor.execute(range, &route).await {
            Ok(parts) => ExportOutcome::Parts {
                parts: self.titles.enrich(parts).await,
                route,
            },
            Err(error) if range.start > self.degrade_from => {
                let cache_ttl = if self.registry.sparse_count(&range).is_some() {
                    DEGRADED_SPARSE_TTL
                } else {
                    DEGRADED_UNKNOWN_TTL
                };
                info!(
                    error = %error,
                    code = error.code(),
                    cache_ttl_secs = cache_ttl.as_secs(),
                    "Degrading failed high-ID range to empty result"
                );
                ExportOutcome::Degraded {
                    route,
                    cache_ttl,
                    error,
                }
            }
            Err(error) => return Err(error),
        };

        Ok(RangeExport {
            range,
            outcome,
            elapsed: started.elapsed(),
        })
    }

    /// Regeneration path: query the range directly, never degrade.
    ///
    /// The registry is not consulted; the caller decides whether a window is
    /// worth querying.
    pub async fn fetch(&self, range: IdRange) -> Result<Vec<SitemapPart>> {
        let route = self.router.route(&range);
        let parts = self.executor.execute(range, &route).await?;
        Ok(self.titles.enrich(parts).await)
    }
}
