//! In-memory catalog implementation for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crate::error::{Result, SitemapError};
use crate::traits::store::{CatalogStore, RangeQuery, TitleSource};
use crate::types::part::{CatalogPart, TitleRow};
use crate::types::range::IdRange;

/// A failure the memory catalog can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    StatementTimeout,
    ConnectionAcquisition,
    Transient,
    Permanent,
}

impl InjectedFailure {
    fn to_error(self, range: IdRange, timeout: Duration) -> SitemapError {
        match self {
            InjectedFailure::StatementTimeout => SitemapError::QueryStatementTimeout {
                range,
                timeout_ms: timeout.as_millis() as u64,
            },
            InjectedFailure::ConnectionAcquisition => SitemapError::ConnectionAcquisitionTimeout,
            InjectedFailure::Transient => SitemapError::Transient("connection reset by peer".into()),
            InjectedFailure::Permanent => SitemapError::Database(
                format!("relation \"part_info\" does not exist (range {})", range).into(),
            ),
        }
    }
}

/// In-memory catalog and title table.
///
/// Applies the same exportable-record predicate as the SQL store and can
/// simulate latency and failures. Not suitable for production as data is
/// lost on restart.
pub struct MemoryCatalog {
    parts: RwLock<BTreeMap<i64, CatalogPart>>,
    titles: RwLock<Vec<TitleRow>>,
    queued_failures: Mutex<VecDeque<InjectedFailure>>,
    range_failures: RwLock<Vec<(IdRange, InjectedFailure)>>,
    fetch_delay: RwLock<Duration>,
    fetch_log: Mutex<Vec<RangeQuery>>,
    fail_titles: AtomicBool,
    unreachable: AtomicBool,
    fetch_calls: AtomicUsize,
    count_calls: AtomicUsize,
    cursor_calls: AtomicUsize,
    title_loads: AtomicUsize,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self {
            parts: RwLock::new(BTreeMap::new()),
            titles: RwLock::new(Vec::new()),
            queued_failures: Mutex::new(VecDeque::new()),
            range_failures: RwLock::new(Vec::new()),
            fetch_delay: RwLock::new(Duration::ZERO),
            fetch_log: Mutex::new(Vec::new()),
            fail_titles: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            cursor_calls: AtomicUsize::new(0),
            title_loads: AtomicUsize::new(0),
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, part: CatalogPart) {
        self.parts.write().unwrap().insert(part.id, part);
    }

    pub fn insert_many(&self, parts: impl IntoIterator<Item = CatalogPart>) {
        let mut map = self.parts.write().unwrap();
        for part in parts {
            map.insert(part.id, part);
        }
    }

    pub fn remove(&self, id: i64) {
        self.parts.write().unwrap().remove(&id);
    }

    /// Replace the title table.
    pub fn set_titles(&self, titles: Vec<TitleRow>) {
        *self.titles.write().unwrap() = titles;
    }

    /// Make the next `n` fetch or count queries fail.
    pub fn fail_next_queries(&self, n: usize, failure: InjectedFailure) {
        let mut queue = self.queued_failures.lock().unwrap();
        queue.extend(std::iter::repeat(failure).take(n));
    }

    /// Make every fetch overlapping `range` fail until cleared.
    pub fn fail_range(&self, range: IdRange, failure: InjectedFailure) {
        self.range_failures.write().unwrap().push((range, failure));
    }

    pub fn clear_failures(&self) {
        self.queued_failures.lock().unwrap().clear();
        self.range_failures.write().unwrap().clear();
    }

    /// Delay every fetch. A delay longer than the statement timeout surfaces
    /// as a statement timeout, like the database would.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.write().unwrap() = delay;
    }

    pub fn fail_title_loads(&self, fail: bool) {
        self.fail_titles.store(fail, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn cursor_calls(&self) -> usize {
        self.cursor_calls.load(Ordering::SeqCst)
    }

    pub fn title_loads(&self) -> usize {
        self.title_loads.load(Ordering::SeqCst)
    }

    /// Every fetch issued so far, in order.
    pub fn fetch_log(&self) -> Vec<RangeQuery> {
        self.fetch_log.lock().unwrap().clone()
    }

    /// Number of stored records, exportable or not.
    pub fn len(&self) -> usize {
        self.parts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_queued_failure(&self) -> Option<InjectedFailure> {
        self.queued_failures.lock().unwrap().pop_front()
    }

    fn range_failure(&self, range: &IdRange) -> Option<InjectedFailure> {
        self.range_failures
            .read()
            .unwrap()
            .iter()
            .find(|(r, _)| r.overlaps(range))
            .map(|(_, f)| *f)
    }

    fn exportable_in(&self, range: IdRange) -> Vec<CatalogPart> {
        self.parts
            .read()
            .unwrap()
            .range(range.start..=range.end)
            .map(|(_, part)| part)
            .filter(|part| is_exportable(part))
            .cloned()
            .collect()
    }
}

fn is_exportable(part: &CatalogPart) -> bool {
    !part.category_code.is_empty()
        && !part.sub_category_code.is_empty()
        && !part.catalog_id.is_empty()
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn fetch_range(&self, query: &RangeQuery) -> Result<Vec<CatalogPart>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_log.lock().unwrap().push(query.clone());

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(InjectedFailure::ConnectionAcquisition
                .to_error(query.range, query.statement_timeout));
        }

        let delay = *self.fetch_delay.read().unwrap();
        if delay > query.statement_timeout {
            tokio::time::sleep(query.statement_timeout).await;
            return Err(InjectedFailure::StatementTimeout
                .to_error(query.range, query.statement_timeout));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = self
            .take_queued_failure()
            .or_else(|| self.range_failure(&query.range))
        {
            return Err(failure.to_error(query.range, query.statement_timeout));
        }

        Ok(self.exportable_in(query.range))
    }

    async fn count_range(&self, range: IdRange, statement_timeout: Duration) -> Result<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.take_queued_failure() {
            return Err(failure.to_error(range, statement_timeout));
        }
        Ok(self.exportable_in(range).len() as u64)
    }

    async fn next_exportable_id(
        &self,
        after: i64,
        _statement_timeout: Duration,
    ) -> Result<Option<i64>> {
        self.cursor_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SitemapError::ConnectionAcquisitionTimeout);
        }
        let Some(from) = after.checked_add(1) else {
            return Ok(None);
        };
        Ok(self
            .parts
            .read()
            .unwrap()
            .range(from..)
            .map(|(_, part)| part)
            .find(|part| is_exportable(part))
            .map(|part| part.id))
    }

    async fn ping(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SitemapError::ConnectionAcquisitionTimeout);
        }
        Ok(())
    }
}

#[async_trait]
impl TitleSource for MemoryCatalog {
    async fn load_titles(&self) -> Result<Vec<TitleRow>> {
        self.title_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_titles.load(Ordering::SeqCst) {
            return Err(SitemapError::Transient("title table unavailable".into()));
        }
        Ok(self.titles.read().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(start: i64, end: i64) -> RangeQuery {
        RangeQuery {
            range: IdRange::new(start, end).unwrap(),
            partition: None,
            statement_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_fetch_is_ordered_and_filters_incomplete_records() {
        let store = MemoryCatalog::new();
        store.insert(CatalogPart::new(30, "15", "1560", "c"));
        store.insert(CatalogPart::new(10, "15", "1560", "a"));
        store.insert(CatalogPart::new(20, "15", "", "b"));
        store.insert(CatalogPart::new(40, "15", "1560", "d"));

        let parts = store.fetch_range(&query(1, 30)).await.unwrap();
        let ids: Vec<_> = parts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![10, 30]);
        assert_eq!(store.count_range(query(1, 40).range, Duration::ZERO).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cursor_skips_incomplete_records() {
        let store = MemoryCatalog::new();
        store.insert(CatalogPart::new(5, "15", "1560", ""));
        store.insert(CatalogPart::new(9, "15", "1560", "x"));

        let t = Duration::from_secs(1);
        assert_eq!(store.next_exportable_id(0, t).await.unwrap(), Some(9));
        assert_eq!(store.next_exportable_id(9, t).await.unwrap(), None);
        assert_eq!(store.next_exportable_id(i64::MAX, t).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_queued_failures_are_consumed_in_order() {
        let store = MemoryCatalog::new();
        store.fail_next_queries(1, InjectedFailure::Transient);

        let err = store.fetch_range(&query(1, 10)).await.unwrap_err();
        assert!(matches!(err, SitemapError::Transient(_)));
        assert!(store.fetch_range(&query(1, 10)).await.is_ok());
        assert_eq!(store.fetch_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_surfaces_statement_timeout() {
        let store = MemoryCatalog::new();
        store.set_fetch_delay(Duration::from_secs(60));

        let err = store.fetch_range(&query(1, 10)).await.unwrap_err();
        assert!(matches!(err, SitemapError::QueryStatementTimeout { .. }));
    }
}
