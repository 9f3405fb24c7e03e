//! Server dependencies shared by the HTTP handlers, the scheduler and the CLIs.
//!
//! Storage is held behind the library traits so tests can swap the
//! PostgreSQL store for an in-memory catalog.

use std::sync::Arc;

use anyhow::{Context, Result};
use sitemap_export::{
    AdmissionController, BuilderConfig, CatalogStore, EmptyRangeRegistry, Notifier,
    NotifierConfig, Orchestrator, PartitionRouter, PgCatalogStore, PgStoreConfig, QueryExecutor,
    RangeExporter, RegenerationConfig, SitemapBuilder, TitleCache, TitleSource,
};

use crate::config::Config;

/// Everything a request or job needs, built once at startup.
#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn CatalogStore>,
    pub registry: Arc<EmptyRangeRegistry>,
    pub titles: Arc<TitleCache>,
    pub exporter: Arc<RangeExporter>,
    pub admission: Arc<AdmissionController>,
    pub config: Arc<Config>,
}

impl ServerDeps {
    /// Wire the serving path over an arbitrary store.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        title_source: Arc<dyn TitleSource>,
        registry: Arc<EmptyRangeRegistry>,
        config: Config,
    ) -> Result<Self> {
        let router = match &config.partitions_file {
            Some(path) => PartitionRouter::from_file(path)
                .with_context(|| format!("Failed to load partition layout {}", path.display()))?,
            None => PartitionRouter::new(PartitionRouter::default_layout())
                .context("Built-in partition layout is invalid")?,
        };
        tracing::info!(
            partitions = router.partitions().len(),
            custom = config.partitions_file.is_some(),
            "Partition router ready"
        );

        let titles = Arc::new(TitleCache::new(title_source));
        let exporter = Arc::new(RangeExporter::new(
            registry.clone(),
            Arc::new(router),
            QueryExecutor::new(store.clone()),
            titles.clone(),
        ));

        Ok(Self {
            store,
            registry,
            titles,
            exporter,
            admission: Arc::new(AdmissionController::new(config.max_in_flight_exports)),
            config: Arc::new(config),
        })
    }

    /// Connect to PostgreSQL and load the registry file.
    pub async fn connect(config: Config) -> Result<Self> {
        tracing::info!("Connecting to database...");
        let store = PgCatalogStore::connect(
            &config.database_url,
            PgStoreConfig {
                max_connections: config.database_max_connections,
                acquire_timeout: config.database_acquire_timeout,
                ..Default::default()
            },
        )
        .await
        .context("Failed to connect to database")?;
        tracing::info!("Database connected");

        let store = Arc::new(store);
        let registry = Arc::new(EmptyRangeRegistry::load_or_empty(&config.empty_ranges_file));
        Self::new(store.clone(), store, registry, config)
    }
}

/// Notifier for the configured downstream consumers.
pub fn build_notifier(config: &Config) -> Result<Notifier> {
    let mut notifier = NotifierConfig::new(&config.sitemap_base_url);
    notifier.indexnow_key = config.indexnow_api_key.clone();
    notifier.ping_url = config.search_ping_url.clone();
    notifier.cdn = config.cdn.clone();
    Notifier::new(notifier).context("Failed to build notification client")
}

/// Orchestrator that regenerates the full sitemap set through the shared
/// export path.
pub fn build_orchestrator(deps: &ServerDeps) -> Result<Orchestrator> {
    let config = &deps.config;
    let builder = SitemapBuilder::new(
        deps.exporter.clone(),
        BuilderConfig::new(&config.sitemap_base_url, &config.publish_dir)
            .with_shard_width(config.shard_width),
    );

    let mut regeneration = RegenerationConfig::new(&config.publish_dir, &config.backup_dir);
    regeneration.backup_retention = config.backup_retention;
    regeneration.min_free_disk_bytes = config.min_free_disk_bytes;

    Ok(
        Orchestrator::new(Arc::new(builder), deps.store.clone(), regeneration)
            .with_notifier(Arc::new(build_notifier(config)?)),
    )
}
