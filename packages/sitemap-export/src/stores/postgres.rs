//! PostgreSQL catalog store.
//!
//! Reads the existing parts table and its title reference table; the schema
//! is owned elsewhere and never migrated from here.
//!
//! Every statement runs inside a short transaction that sets
//! `statement_timeout` with `set_config(..., true)`, the bindable form of
//! `SET LOCAL`, so the setting dies with the transaction and never leaks to
//! the next borrower of the pooled connection.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, info, instrument};

use crate::error::{Result, SitemapError};
use crate::partition::is_safe_identifier;
use crate::traits::store::{CatalogStore, RangeQuery, TitleSource};
use crate::types::part::{CatalogPart, TitleRow};
use crate::types::range::IdRange;

/// SQLSTATE `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";

const DEFAULT_PARTS_TABLE: &str = "part_info";
const DEFAULT_TITLES_TABLE: &str = "wp_fsgs_new";

/// The title table is small; a bulk read slower than this is a stuck query.
const TITLE_STATEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool settings for [`PgCatalogStore::connect`].
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub parts_table: String,
    pub titles_table: String,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            parts_table: DEFAULT_PARTS_TABLE.to_string(),
            titles_table: DEFAULT_TITLES_TABLE.to_string(),
        }
    }
}

#[derive(Debug, FromRow)]
struct PartRow {
    id: i64,
    fsg: String,
    fsc: String,
    nsn: String,
}

impl From<PartRow> for CatalogPart {
    fn from(row: PartRow) -> Self {
        CatalogPart::new(row.id, row.fsg, row.fsc, row.nsn)
    }
}

#[derive(Debug, FromRow)]
struct TitleRecord {
    fsg: String,
    fsc: String,
    fsg_title: String,
    fsc_title: String,
}

/// PostgreSQL-backed [`CatalogStore`] and [`TitleSource`].
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
    parts_table: String,
    titles_table: String,
}

impl PgCatalogStore {
    /// Connect with a bounded pool.
    pub async fn connect(database_url: &str, config: PgStoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error(e, None, Duration::ZERO))?;
        info!(
            max_connections = config.max_connections,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "Connected catalog pool"
        );
        Self::from_pool(pool, &config.parts_table, &config.titles_table)
    }

    /// Use an existing pool, e.g. one shared with the server.
    pub fn from_pool(pool: PgPool, parts_table: &str, titles_table: &str) -> Result<Self> {
        for name in [parts_table, titles_table] {
            if !is_safe_identifier(name) {
                return Err(SitemapError::Config(format!("unsafe table name {:?}", name)));
            }
        }
        Ok(Self {
            pool,
            parts_table: parts_table.to_string(),
            titles_table: titles_table.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Table a query should read: the routed partition or the parent table.
    fn table_for<'a>(&'a self, partition: Option<&'a str>) -> Result<&'a str> {
        match partition {
            None => Ok(&self.parts_table),
            Some(name) if is_safe_identifier(name) => Ok(name),
            Some(name) => Err(SitemapError::InvalidPartitionLayout {
                reason: format!("unsafe partition name {:?}", name),
            }),
        }
    }

    async fn begin_bounded(
        &self,
        timeout: Duration,
        range: Option<IdRange>,
    ) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, range, timeout))?;
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(timeout.as_millis().max(1).to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(e, range, timeout))?;
        Ok(tx)
    }
}

/// Records missing any URL component are never exported.
const EXPORTABLE: &str = "fsg IS NOT NULL AND fsg <> '' \
     AND fsc IS NOT NULL AND fsc <> '' \
     AND nsn IS NOT NULL AND nsn <> ''";

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self), fields(range = %query.range, partition = ?query.partition))]
    async fn fetch_range(&self, query: &RangeQuery) -> Result<Vec<CatalogPart>> {
        let table = self.table_for(query.partition.as_deref())?;
        let sql = format!(
            "SELECT id::bigint AS id, fsg::text AS fsg, fsc::text AS fsc, nsn::text AS nsn \
             FROM {} WHERE id >= $1 AND id <= $2 AND {} ORDER BY id",
            table, EXPORTABLE
        );
        let map = |e: sqlx::Error| map_sqlx_error(e, Some(query.range), query.statement_timeout);

        let mut tx = self
            .begin_bounded(query.statement_timeout, Some(query.range))
            .await?;
        let rows: Vec<PartRow> = sqlx::query_as(&sql)
            .bind(query.range.start)
            .bind(query.range.end)
            .fetch_all(&mut *tx)
            .await
            .map_err(map)?;
        tx.commit().await.map_err(map)?;

        debug!(rows = rows.len(), table, "Range fetched");
        Ok(rows.into_iter().map(CatalogPart::from).collect())
    }

    async fn count_range(&self, range: IdRange, statement_timeout: Duration) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE id >= $1 AND id <= $2 AND {}",
            self.parts_table, EXPORTABLE
        );
        let map = |e: sqlx::Error| map_sqlx_error(e, Some(range), statement_timeout);

        let mut tx = self.begin_bounded(statement_timeout, Some(range)).await?;
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(range.start)
            .bind(range.end)
            .fetch_one(&mut *tx)
            .await
            .map_err(map)?;
        tx.commit().await.map_err(map)?;
        Ok(count.max(0) as u64)
    }

    async fn next_exportable_id(
        &self,
        after: i64,
        statement_timeout: Duration,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT id::bigint FROM {} WHERE id > $1 AND {} ORDER BY id LIMIT 1",
            self.parts_table, EXPORTABLE
        );
        let range = IdRange {
            start: after.saturating_add(1),
            end: i64::MAX,
        };
        let map = |e: sqlx::Error| map_sqlx_error(e, Some(range), statement_timeout);

        let mut tx = self.begin_bounded(statement_timeout, Some(range)).await?;
        let next: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(after)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map)?;
        tx.commit().await.map_err(map)?;
        Ok(next.map(|(id,)| id))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, None, Duration::ZERO))?;
        Ok(())
    }
}

#[async_trait]
impl TitleSource for PgCatalogStore {
    async fn load_titles(&self) -> Result<Vec<TitleRow>> {
        let sql = format!(
            "SELECT fsg::text AS fsg, fsc::text AS fsc, \
                    COALESCE(fsg_title, '')::text AS fsg_title, \
                    COALESCE(fsc_title, '')::text AS fsc_title \
             FROM {} WHERE fsg IS NOT NULL AND fsc IS NOT NULL",
            self.titles_table
        );
        let map = |e: sqlx::Error| map_sqlx_error(e, None, TITLE_STATEMENT_TIMEOUT);

        let mut tx = self.begin_bounded(TITLE_STATEMENT_TIMEOUT, None).await?;
        let rows: Vec<TitleRecord> = sqlx::query_as(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(map)?;
        tx.commit().await.map_err(map)?;

        Ok(rows
            .into_iter()
            .map(|r| TitleRow {
                category_code: r.fsg,
                sub_category_code: r.fsc,
                title: r.fsg_title,
                subtitle: r.fsc_title,
            })
            .collect())
    }
}

/// Classify a driver error into the retry taxonomy.
pub(crate) fn map_sqlx_error(
    err: sqlx::Error,
    range: Option<IdRange>,
    timeout: Duration,
) -> SitemapError {
    let canceled = matches!(
        &err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED)
    );
    match err {
        _ if canceled => match range {
            Some(range) => SitemapError::QueryStatementTimeout {
                range,
                timeout_ms: timeout.as_millis() as u64,
            },
            None => SitemapError::Transient("statement canceled".into()),
        },
        sqlx::Error::PoolTimedOut => SitemapError::ConnectionAcquisitionTimeout,
        sqlx::Error::Io(e) => SitemapError::Transient(e.to_string()),
        sqlx::Error::PoolClosed => SitemapError::Transient("connection pool closed".into()),
        sqlx::Error::WorkerCrashed => SitemapError::Transient("connection worker crashed".into()),
        other => SitemapError::Database(Box::new(other)),
    }
}
