//! Range export, sitemap generation and safe regeneration for large catalogs
//!
//! Serves a catalog of tens of millions of records to crawlers as a sharded
//! sitemap without timing out the database. The same range, partition and
//! retry logic backs both the on-demand export endpoint and the batch
//! regeneration job.
//!
//! # Design Philosophy
//!
//! - Never scan what is known to be empty
//! - Every query is bounded; a slow range degrades, it never hangs
//! - A regeneration publishes a complete validated set or changes nothing
//!
//! # Usage
//!
//! ```rust,ignore
//! use sitemap_export::{
//!     EmptyRangeRegistry, IdRange, PartitionRouter, QueryExecutor, RangeExporter, TitleCache,
//! };
//! use sitemap_export::testing::seeded_catalog;
//!
//! let catalog = Arc::new(seeded_catalog([5, 2500]));
//! let exporter = RangeExporter::new(
//!     Arc::new(EmptyRangeRegistry::default()),
//!     Arc::new(PartitionRouter::new(PartitionRouter::default_layout())?),
//!     QueryExecutor::new(catalog.clone()),
//!     Arc::new(TitleCache::new(catalog)),
//! );
//!
//! let export = exporter.export(IdRange::new(1, 2000)?).await?;
//! assert_eq!(export.parts().len(), 1);
//! ```
//!
//! # Modules
//!
//! - [`partition`] - Range → partition routing
//! - [`registry`] - Known-empty / sparse range registry and its analysis pass
//! - [`cache`] - Category title cache
//! - [`executor`] - Bounded, retried range queries and the serving export path
//! - [`admission`] - Concurrency ceiling for the export endpoint
//! - [`sitemap`] - Shard/index rendering, generation and validation
//! - [`regenerate`] - Backup, generate, validate, publish or roll back
//! - [`health`] - Freshness, structure and reachability checks
//! - [`notify`] - Search engine and CDN notifications after a publish
//! - [`stores`] - Catalog store implementations (memory, PostgreSQL)
//! - [`testing`] - Fakes for tests

pub mod admission;
pub mod cache;
pub mod error;
pub mod executor;
pub mod fs_util;
pub mod health;
pub mod notify;
pub mod partition;
pub mod regenerate;
pub mod registry;
pub mod retry;
pub mod security;
pub mod sitemap;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{ErrorClass, Result, SitemapError};
pub use traits::{
    generator::{GenerationReport, SitemapGenerator},
    store::{CatalogStore, RangeQuery, TitleSource},
};
pub use types::{
    part::{CatalogPart, CategoryKey, SitemapPart, TitleRow},
    range::{IdRange, DEFAULT_REQUEST_LIMIT},
    shard::{BackupSnapshot, IndexEntry, PublishLayout, SitemapIndex, SitemapShard},
    summary::{RunOutcome, RunSummary},
};

pub use admission::{AdmissionController, AdmissionPermit};
pub use cache::{CacheEntry, TitleCache};
pub use executor::{
    ExportOutcome, QueryExecutor, RangeExport, RangeExporter, TimeoutPolicy,
    DEGRADED_SPARSE_TTL, DEGRADED_UNKNOWN_TTL,
};
pub use health::{HealthConfig, HealthMonitor, HealthReport, HealthStatus};
pub use notify::{NotificationReport, Notifier, NotifierConfig, StepStatus};
pub use partition::{FallbackReason, Partition, PartitionRouter, RouteDecision};
pub use regenerate::{Orchestrator, RegenerationConfig, RunReport};
pub use registry::{
    analyze_ranges, AnalysisConfig, EmptyRangeRegistry, RegistrySnapshot, RegistryStats,
    SparseRange,
};
pub use retry::{RetryPolicy, HIGH_ID_THRESHOLD};
pub use security::{CdnCredentials, SecretString};
pub use sitemap::{BuilderConfig, SitemapBuilder, ValidationConfig, ValidationReport};

// Re-export stores
pub use stores::{MemoryCatalog, PgCatalogStore, PgStoreConfig};
