//! Safe regeneration: publish a complete new sitemap set or leave the old
//! one exactly as it was.
//!
//! ```text
//! Preflight ─► Backup ─► Generate ─► Validate ─┬─► Publish ──┬─► Cleanup ─► Notify
//!    │            │          │           │      │             │
//!    └─ abort ◄───┘          └───────────┴──────┴─► Rollback ─┘
//! ```
//!
//! Preflight and Backup failures abort before anything is touched. Generate,
//! Validate and Publish failures restore the backup, so the publish directory ends
//! the run either in its pre-run state or in the new fully validated state.

pub mod backup;
pub mod lock;
pub mod preflight;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::error::{Result, SitemapError};
use crate::fs_util::{ensure_dir, list_managed, remove_file_if_exists, write_atomic};
use crate::notify::{changed_files, fingerprint_dir, NotificationReport, Notifier};
use crate::sitemap::validate::{validate_publish_dir, ValidationConfig, ValidationReport};
use crate::traits::generator::{GenerationReport, SitemapGenerator};
use crate::traits::store::CatalogStore;
use crate::types::shard::{BackupSnapshot, PublishLayout};
use crate::types::summary::{RunOutcome, RunSummary};

use lock::{RegenerationLock, RunFlag};

pub const FAILED_RUN_FILENAME: &str = "last-failed-run.json";

#[derive(Debug, Clone)]
pub struct RegenerationConfig {
    pub publish_dir: PathBuf,
    /// Holds backups, the lock file and the last failed run summary
    pub backup_root: PathBuf,
    pub layout: PublishLayout,
    pub backup_retention: usize,
    pub min_free_disk_bytes: u64,
    pub stale_lock_after: Duration,
    pub validation: ValidationConfig,
}

impl RegenerationConfig {
    pub fn new(publish_dir: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            publish_dir: publish_dir.into(),
            backup_root: backup_root.into(),
            layout: PublishLayout::default(),
            backup_retention: 5,
            min_free_disk_bytes: 100 * 1024 * 1024,
            stale_lock_after: Duration::from_secs(6 * 60 * 60),
            validation: ValidationConfig::default(),
        }
    }
}

/// Result of a published run.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub generation: GenerationReport,
    pub validation: ValidationReport,
    /// Published files whose content changed, including removed ones
    pub changed_files: Vec<String>,
    pub notification: Option<NotificationReport>,
}

pub struct Orchestrator {
    generator: Arc<dyn SitemapGenerator>,
    store: Arc<dyn CatalogStore>,
    notifier: Option<Arc<Notifier>>,
    config: RegenerationConfig,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn SitemapGenerator>,
        store: Arc<dyn CatalogStore>,
        config: RegenerationConfig,
    ) -> Self {
        Self {
            generator,
            store,
            notifier: None,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &RegenerationConfig {
        &self.config
    }

    /// Run one full regeneration.
    ///
    /// Returns `RegenerationInProgress` without side effects when another run
    /// holds the guard.
    #[instrument(skip(self), fields(publish_dir = %self.config.publish_dir.display()))]
    pub async fn run(&self) -> Result<RunReport> {
        let _flag = RunFlag::try_set(&self.running).ok_or_else(|| {
            SitemapError::RegenerationInProgress {
                lock_path: self.config.backup_root.join(lock::LOCK_FILENAME),
            }
        })?;
        ensure_dir(&self.config.backup_root)?;
        let _lock = RegenerationLock::acquire(&self.config.backup_root, self.config.stale_lock_after)?;

        let mut summary = RunSummary::start();
        info!(run_id = %summary.run_id, "Starting sitemap regeneration");

        // Preflight and Backup change nothing in the publish directory.
        let (backup, before) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(error = %e, "Regeneration aborted before any change");
                summary.finish(RunOutcome::Aborted, Some(e.to_string()));
                self.record_failure(&summary);
                return Err(e);
            }
        };

        let staged = match self.generate_and_validate(&mut summary).await {
            Ok((generation, validation)) => self
                .publish(&generation, &mut summary)
                .map(|()| (generation, validation)),
            Err(e) => Err(e),
        };
        let (generation, validation) = match staged {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "Regeneration failed, rolling back");
                let rollback = backup::restore(
                    backup.as_ref(),
                    &self.config.publish_dir,
                    &self.config.layout,
                );
                let message = match &rollback {
                    Ok(()) => e.to_string(),
                    Err(rb) => format!("{}; rollback failed: {}", e, rb),
                };
                summary.finish(RunOutcome::RolledBack, Some(message));
                self.record_failure(&summary);
                self.cleanup();
                rollback?;
                return Err(e);
            }
        };

        self.cleanup();

        let changed = match fingerprint_dir(&self.config.publish_dir, &self.config.layout) {
            Ok(after) => changed_files(&before, &after),
            Err(e) => {
                warn!(error = %e, "Could not diff published files, announcing index only");
                Vec::new()
            }
        };

        let notification = match &self.notifier {
            Some(notifier) => Some(notifier.announce(&changed).await),
            None => None,
        };

        info!(
            run_id = %summary.run_id,
            shards = summary.shards_written,
            urls = summary.urls_written,
            changed = changed.len(),
            duration_ms = summary.duration_ms,
            "Sitemap regeneration published"
        );

        Ok(RunReport {
            summary,
            generation,
            validation,
            changed_files: changed,
            notification,
        })
    }

    async fn prepare(&self) -> Result<(Option<BackupSnapshot>, BTreeMap<String, String>)> {
        preflight::check_writable(&self.config.publish_dir)?;
        preflight::check_writable(&self.config.backup_root)?;
        preflight::check_database(self.store.as_ref()).await?;
        preflight::check_free_disk(&self.config.publish_dir, self.config.min_free_disk_bytes)
            .await?;

        let before = fingerprint_dir(&self.config.publish_dir, &self.config.layout)?;
        let snapshot = backup::snapshot(
            &self.config.publish_dir,
            &self.config.backup_root,
            &self.config.layout,
            Utc::now(),
        )?;
        Ok((snapshot, before))
    }

    async fn generate_and_validate(
        &self,
        summary: &mut RunSummary,
    ) -> Result<(GenerationReport, ValidationReport)> {
        let generation = self.generator.generate(summary).await?;
        let validation = validate_publish_dir(
            &self.config.publish_dir,
            &self.config.layout,
            &self.config.validation,
        )
        .into_result()?;
        info!(
            shards_checked = validation.shards_checked,
            urls_in_sample = validation.urls_in_sample,
            "Validation passed"
        );
        Ok((generation, validation))
    }

    /// Drop files the new index no longer references and record the run.
    fn publish(&self, generation: &GenerationReport, summary: &mut RunSummary) -> Result<()> {
        let layout = &self.config.layout;
        for name in list_managed(&self.config.publish_dir, layout)? {
            let referenced = generation.shards.iter().any(|s| s.filename == name);
            if layout.is_temp(&name) || (layout.is_shard(&name) && !referenced) {
                info!(file = %name, "Removing stale file");
                remove_file_if_exists(&self.config.publish_dir.join(&name))?;
            }
        }

        summary.finish(RunOutcome::Published, None);
        let json = serde_json::to_vec_pretty(&summary)?;
        write_atomic(
            &self.config.publish_dir.join(&layout.summary_filename),
            &json,
        )
    }

    fn cleanup(&self) {
        if let Err(e) = backup::prune_backups(&self.config.backup_root, self.config.backup_retention)
        {
            warn!(error = %e, "Backup cleanup failed");
        }
    }

    /// The failed summary goes next to the backups, never into the publish
    /// directory.
    fn record_failure(&self, summary: &RunSummary) {
        let path = self.config.backup_root.join(FAILED_RUN_FILENAME);
        let result = serde_json::to_vec_pretty(summary)
            .map_err(SitemapError::from)
            .and_then(|json| write_atomic(&path, &json));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to record failed run summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::cache::TitleCache;
    use crate::executor::{QueryExecutor, RangeExporter};
    use crate::partition::PartitionRouter;
    use crate::registry::EmptyRangeRegistry;
    use crate::sitemap::builder::{BuilderConfig, SitemapBuilder};
    use crate::testing::{seeded_catalog, InjectedFailure, MemoryCatalog, ScriptedGenerator};
    use crate::types::range::IdRange;

    const INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemap-1-2000.xml</loc><lastmod>2026-01-01T00:00:00Z</lastmod></sitemap>
</sitemapindex>
"#;

    const INDEX_TWO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemap-1-2000.xml</loc><lastmod>2026-02-01T00:00:00Z</lastmod></sitemap>
  <sitemap><loc>https://example.com/sitemap-2001-4000.xml</loc><lastmod>2026-02-01T00:00:00Z</lastmod></sitemap>
</sitemapindex>
"#;

    const SHARD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/catalog/15/a/1560/b/1</loc></url>
</urlset>
"#;

    const EMPTY_SHARD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
</urlset>
"#;

    struct Dirs {
        _root: tempfile::TempDir,
        publish: PathBuf,
        backups: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = tempfile::tempdir().unwrap();
        let publish = root.path().join("public");
        let backups = root.path().join("backups");
        std::fs::create_dir_all(&publish).unwrap();
        Dirs {
            publish,
            backups,
            _root: root,
        }
    }

    fn config(dirs: &Dirs) -> RegenerationConfig {
        let mut config = RegenerationConfig::new(&dirs.publish, &dirs.backups);
        config.min_free_disk_bytes = 0;
        config
    }

    fn read_dir(dir: &Path) -> BTreeMap<String, Vec<u8>> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().unwrap().is_file())
            .map(|e| {
                (
                    e.file_name().into_string().unwrap(),
                    std::fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    fn builder_orchestrator(catalog: Arc<MemoryCatalog>, dirs: &Dirs) -> Orchestrator {
        let exporter = RangeExporter::new(
            Arc::new(EmptyRangeRegistry::default()),
            Arc::new(PartitionRouter::new(PartitionRouter::default_layout()).unwrap()),
            QueryExecutor::new(catalog.clone()),
            Arc::new(TitleCache::new(catalog.clone())),
        );
        let builder = SitemapBuilder::new(
            Arc::new(exporter),
            BuilderConfig::new("https://example.com", &dirs.publish),
        );
        Orchestrator::new(Arc::new(builder), catalog, config(dirs))
    }

    #[tokio::test]
    async fn test_invalid_output_rolls_back_to_exact_prior_state() {
        let dirs = dirs();
        std::fs::write(dirs.publish.join("sitemap.xml"), INDEX).unwrap();
        std::fs::write(dirs.publish.join("sitemap-1-2000.xml"), SHARD).unwrap();
        std::fs::write(dirs.publish.join("robots.txt"), "User-agent: *").unwrap();
        let before = read_dir(&dirs.publish);

        let generator = ScriptedGenerator::new(&dirs.publish)
            .with_file("sitemap-1-2000.xml", SHARD.replace("/1<", "/2<"))
            .with_file("sitemap-2001-4000.xml", EMPTY_SHARD)
            .with_file("sitemap.xml", INDEX_TWO);
        let orchestrator = Orchestrator::new(
            Arc::new(generator),
            Arc::new(MemoryCatalog::new()),
            config(&dirs),
        );

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, SitemapError::ValidationFailure { .. }));
        assert_eq!(read_dir(&dirs.publish), before);

        let failed: RunSummary = serde_json::from_slice(
            &std::fs::read(dirs.backups.join(FAILED_RUN_FILENAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(failed.outcome, Some(RunOutcome::RolledBack));
    }

    #[tokio::test]
    async fn test_generation_error_rolls_back() {
        let dirs = dirs();
        std::fs::write(dirs.publish.join("sitemap.xml"), INDEX).unwrap();
        std::fs::write(dirs.publish.join("sitemap-1-2000.xml"), SHARD).unwrap();
        let before = read_dir(&dirs.publish);

        let generator = ScriptedGenerator::new(&dirs.publish)
            .with_file("sitemap-4001-6000.xml", SHARD)
            .failing_with("connection reset");
        let orchestrator = Orchestrator::new(
            Arc::new(generator),
            Arc::new(MemoryCatalog::new()),
            config(&dirs),
        );

        assert!(orchestrator.run().await.is_err());
        assert_eq!(read_dir(&dirs.publish), before);
    }

    #[tokio::test]
    async fn test_publish_failure_rolls_back_and_is_recorded() {
        let dirs = dirs();
        std::fs::write(dirs.publish.join("sitemap.xml"), INDEX).unwrap();
        std::fs::write(dirs.publish.join("sitemap-1-2000.xml"), SHARD).unwrap();
        // A directory where the run summary goes makes the final write fail.
        std::fs::create_dir(dirs.publish.join("sitemap-run-summary.json")).unwrap();
        let before = read_dir(&dirs.publish);

        let generator = ScriptedGenerator::new(&dirs.publish)
            .with_file("sitemap-1-2000.xml", SHARD.replace("/1<", "/2<"))
            .with_file("sitemap-2001-4000.xml", SHARD)
            .with_file("sitemap.xml", INDEX_TWO);
        let orchestrator = Orchestrator::new(
            Arc::new(generator),
            Arc::new(MemoryCatalog::new()),
            config(&dirs),
        );

        assert!(orchestrator.run().await.is_err());
        assert_eq!(read_dir(&dirs.publish), before);

        let failed: RunSummary = serde_json::from_slice(
            &std::fs::read(dirs.backups.join(FAILED_RUN_FILENAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(failed.outcome, Some(RunOutcome::RolledBack));
    }

    #[tokio::test]
    async fn test_first_run_failure_leaves_no_managed_files() {
        let dirs = dirs();
        let generator = ScriptedGenerator::new(&dirs.publish)
            .with_file("sitemap-1-2000.xml", EMPTY_SHARD)
            .with_file("sitemap.xml", INDEX);
        let orchestrator = Orchestrator::new(
            Arc::new(generator),
            Arc::new(MemoryCatalog::new()),
            config(&dirs),
        );

        assert!(orchestrator.run().await.is_err());
        assert!(read_dir(&dirs.publish).is_empty());
    }

    #[tokio::test]
    async fn test_preflight_failure_aborts_before_backup() {
        let dirs = dirs();
        std::fs::write(dirs.publish.join("sitemap.xml"), INDEX).unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.set_unreachable(true);
        let generator = Arc::new(ScriptedGenerator::new(&dirs.publish));
        let orchestrator = Orchestrator::new(generator.clone(), catalog, config(&dirs));

        assert!(orchestrator.run().await.is_err());
        assert_eq!(generator.calls(), 0);
        let backups: Vec<_> = std::fs::read_dir(&dirs.backups)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_dir())
            .collect();
        assert!(backups.is_empty());
    }

    #[tokio::test]
    async fn test_publish_prunes_shards_no_longer_indexed() {
        let dirs = dirs();
        let catalog = Arc::new(seeded_catalog([10, 2500]));
        let orchestrator = builder_orchestrator(catalog.clone(), &dirs);

        let first = orchestrator.run().await.unwrap();
        assert_eq!(first.summary.shards_written, 2);
        assert!(dirs.publish.join("sitemap-2001-4000.xml").exists());

        catalog.remove(2500);
        std::fs::write(dirs.publish.join(".nginx-cache.tmp"), "not ours").unwrap();
        let second = orchestrator.run().await.unwrap();
        assert_eq!(second.summary.shards_written, 1);
        assert!(dirs.publish.join(".nginx-cache.tmp").exists());
        assert!(!dirs.publish.join("sitemap-2001-4000.xml").exists());
        assert!(dirs.publish.join("sitemap-run-summary.json").exists());
        assert!(second.changed_files.contains(&"sitemap-2001-4000.xml".to_string()));
        assert!(!second.changed_files.contains(&"sitemap-1-2000.xml".to_string()));
    }

    #[tokio::test]
    async fn test_unchanged_data_is_idempotent() {
        let dirs = dirs();
        let catalog = Arc::new(seeded_catalog([10, 2500, 1_200_000]));
        let orchestrator = builder_orchestrator(catalog, &dirs);

        let first = orchestrator.run().await.unwrap();
        let second = orchestrator.run().await.unwrap();
        let shape = |r: &RunReport| {
            r.generation
                .shards
                .iter()
                .map(|s| (s.filename.clone(), s.url_count))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&first), shape(&second));
        // Only lastmod moved, so nothing counts as changed.
        assert!(second.changed_files.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_run_query_failure_restores_previous_set() {
        let dirs = dirs();
        let catalog = Arc::new(seeded_catalog([10, 2500]));
        let orchestrator = builder_orchestrator(catalog.clone(), &dirs);
        orchestrator.run().await.unwrap();
        let before = read_dir(&dirs.publish);

        catalog.fail_range(IdRange::new(2001, 4000).unwrap(), InjectedFailure::Transient);
        assert!(orchestrator.run().await.is_err());
        assert_eq!(read_dir(&dirs.publish), before);
    }

    #[tokio::test]
    async fn test_backups_are_retained_up_to_limit() {
        let dirs = dirs();
        let catalog = Arc::new(seeded_catalog([10]));
        let mut orchestrator = builder_orchestrator(catalog, &dirs);
        orchestrator.config.backup_retention = 2;

        for _ in 0..4 {
            orchestrator.run().await.unwrap();
        }
        let backups = std::fs::read_dir(&dirs.backups)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_dir())
            .count();
        assert_eq!(backups, 2);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_refused() {
        let dirs = dirs();
        let orchestrator = builder_orchestrator(Arc::new(seeded_catalog([10])), &dirs);
        std::fs::create_dir_all(&dirs.backups).unwrap();
        let _held = RegenerationLock::acquire(&dirs.backups, Duration::from_secs(3600)).unwrap();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, SitemapError::RegenerationInProgress { .. }));
    }
}
