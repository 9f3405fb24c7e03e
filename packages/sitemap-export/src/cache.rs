//! TTL cache of the category title table.
//!
//! The title table is tiny and read on every export, so it is loaded in one
//! bulk query and served from memory instead of joining per request. Expiry
//! is checked lazily on access; a reload builds a fresh snapshot and swaps it
//! in, so readers never observe a half-populated map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SitemapError;
use crate::traits::store::TitleSource;
use crate::types::part::{CatalogPart, CategoryKey, SitemapPart};

pub const DEFAULT_TITLE_TTL: Duration = Duration::from_secs(60 * 60);

/// How long to serve the previous snapshot after a failed reload before
/// trying again.
pub const DEFAULT_RELOAD_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound on one bulk reload. Readers wait on the reload, so a stuck
/// title query must not hold them longer than this.
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Display titles for one category code pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CategoryKey,
    pub title: String,
    pub subtitle: String,
    pub expires_at: Instant,
}

#[derive(Debug)]
struct TitleSnapshot {
    entries: HashMap<CategoryKey, CacheEntry>,
    expires_at: Instant,
}

impl TitleSnapshot {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    fn with_expiry(&self, expires_at: Instant) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(k, v)| {
                let mut entry = v.clone();
                entry.expires_at = expires_at;
                (k.clone(), entry)
            })
            .collect();
        Self {
            entries,
            expires_at,
        }
    }
}

/// Lazily refreshed, atomically swapped title cache.
pub struct TitleCache {
    source: Arc<dyn TitleSource>,
    ttl: Duration,
    reload_backoff: Duration,
    reload_timeout: Duration,
    snapshot: ArcSwapOption<TitleSnapshot>,
    reload_lock: Mutex<()>,
    reloads: AtomicU64,
}

impl TitleCache {
    pub fn new(source: Arc<dyn TitleSource>) -> Self {
        Self::with_ttl(source, DEFAULT_TITLE_TTL)
    }

    pub fn with_ttl(source: Arc<dyn TitleSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            reload_backoff: DEFAULT_RELOAD_BACKOFF,
            reload_timeout: DEFAULT_RELOAD_TIMEOUT,
            snapshot: ArcSwapOption::empty(),
            reload_lock: Mutex::new(()),
            reloads: AtomicU64::new(0),
        }
    }

    pub fn with_reload_backoff(mut self, backoff: Duration) -> Self {
        self.reload_backoff = backoff;
        self
    }

    pub fn with_reload_timeout(mut self, timeout: Duration) -> Self {
        self.reload_timeout = timeout;
        self
    }

    /// Look up titles, reloading the table first if it is cold or expired.
    ///
    /// `None` means "no title available"; callers degrade to empty strings.
    pub async fn get(&self, category_code: &str, sub_category_code: &str) -> Option<CacheEntry> {
        let key = CategoryKey::new(category_code, sub_category_code);
        self.current().await.entries.get(&key).cloned()
    }

    /// Attach titles to a batch of parts using a single snapshot.
    pub async fn enrich(&self, parts: Vec<CatalogPart>) -> Vec<SitemapPart> {
        let snapshot = self.current().await;
        parts
            .into_iter()
            .map(|part| {
                let titles = snapshot
                    .entries
                    .get(&part.key())
                    .map(|e| (e.title.as_str(), e.subtitle.as_str()));
                SitemapPart::from_part(part, titles)
            })
            .collect()
    }

    /// Number of bulk reloads attempted so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Drop the current snapshot so the next access reloads.
    pub fn invalidate(&self) {
        self.snapshot.store(None);
    }

    async fn current(&self) -> Arc<TitleSnapshot> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return snapshot;
        }

        // Single-flight: one task reloads, the rest wait and reuse its result.
        let _guard = self.reload_lock.lock().await;
        if let Some(snapshot) = self.fresh_snapshot() {
            return snapshot;
        }

        let snapshot = Arc::new(self.reload().await);
        self.snapshot.store(Some(snapshot.clone()));
        snapshot
    }

    fn fresh_snapshot(&self) -> Option<Arc<TitleSnapshot>> {
        self.snapshot
            .load_full()
            .filter(|s| s.is_fresh(Instant::now()))
    }

    async fn reload(&self) -> TitleSnapshot {
        self.reloads.fetch_add(1, Ordering::Relaxed);

        let loaded = match tokio::time::timeout(self.reload_timeout, self.source.load_titles()).await
        {
            Ok(result) => result,
            Err(_) => Err(SitemapError::Transient(format!(
                "title reload timed out after {}ms",
                self.reload_timeout.as_millis()
            ))),
        };

        match loaded {
            Ok(rows) => {
                let expires_at = Instant::now() + self.ttl;
                let entries: HashMap<_, _> = rows
                    .into_iter()
                    .map(|row| {
                        let key = CategoryKey::new(row.category_code, row.sub_category_code);
                        let entry = CacheEntry {
                            key: key.clone(),
                            title: row.title,
                            subtitle: row.subtitle,
                            expires_at,
                        };
                        (key, entry)
                    })
                    .collect();
                debug!(entries = entries.len(), "Reloaded category title cache");
                TitleSnapshot {
                    entries,
                    expires_at,
                }
            }
            Err(e) => {
                let retry_at = Instant::now() + self.reload_backoff;
                match self.snapshot.load_full() {
                    Some(stale) => {
                        warn!(error = %e, "Title reload failed, serving previous titles");
                        stale.with_expiry(retry_at)
                    }
                    None => {
                        warn!(error = %e, "Title reload failed, exporting without titles");
                        TitleSnapshot {
                            entries: HashMap::new(),
                            expires_at: retry_at,
                        }
                    }
                }
            }
        }
    }
}
