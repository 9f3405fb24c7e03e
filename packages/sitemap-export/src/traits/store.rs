//! Storage traits for the catalog and its category title table.
//!
//! The catalog schema is owned elsewhere; this library only needs:
//! - `CatalogStore`: range lookups, counts, keyset cursor and liveness
//! - `TitleSource`: one bulk read of the small title reference table

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::part::{CatalogPart, TitleRow};
use crate::types::range::IdRange;

/// One bounded range lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub range: IdRange,
    /// Partition to scope the query to; `None` means the full table
    pub partition: Option<String>,
    pub statement_timeout: Duration,
}

/// Read access to exportable catalog records.
///
/// "Exportable" means every required field is present and non-empty.
/// Implementations must apply the same predicate in every method so the
/// serving path, the cursor and the analysis pass agree.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Exportable records with `range.start <= id <= range.end`, ordered by ID
    /// ascending, bounded by the statement timeout.
    async fn fetch_range(&self, query: &RangeQuery) -> Result<Vec<CatalogPart>>;

    /// Number of exportable records in the range.
    async fn count_range(&self, range: IdRange, statement_timeout: Duration) -> Result<u64>;

    /// Smallest exportable ID strictly greater than `after` (keyset cursor).
    async fn next_exportable_id(&self, after: i64, statement_timeout: Duration)
        -> Result<Option<i64>>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()>;
}

/// Bulk source for the category title table.
#[async_trait]
pub trait TitleSource: Send + Sync {
    /// Load the entire table in one query.
    async fn load_titles(&self) -> Result<Vec<TitleRow>>;
}
