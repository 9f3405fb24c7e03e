//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the sitemap library
//! without a real database or a real generation pass.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use crate::error::{Result, SitemapError};
use crate::fs_util::write_atomic;
use crate::traits::generator::{GenerationReport, SitemapGenerator};
use crate::types::part::{CatalogPart, TitleRow};
use crate::types::shard::{PublishLayout, SitemapShard};
use crate::types::summary::RunSummary;

pub use crate::stores::memory::{InjectedFailure, MemoryCatalog};

/// A catalog with one exportable record per ID, all in the same category.
pub fn seeded_catalog(ids: impl IntoIterator<Item = i64>) -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    catalog.insert_many(
        ids.into_iter()
            .map(|id| CatalogPart::new(id, "15", "1560", format!("1560-00-{:07}", id))),
    );
    catalog.set_titles(vec![title_row(
        "15",
        "1560",
        "Aircraft Components",
        "Airframe Structural Components",
    )]);
    catalog
}

pub fn title_row(category: &str, sub_category: &str, title: &str, subtitle: &str) -> TitleRow {
    TitleRow {
        category_code: category.into(),
        sub_category_code: sub_category.into(),
        title: title.into(),
        subtitle: subtitle.into(),
    }
}

/// A generator that writes a fixed set of files into the publish directory.
///
/// Useful for driving the orchestrator through validation failures without
/// building real shards.
pub struct ScriptedGenerator {
    publish_dir: PathBuf,
    layout: PublishLayout,
    files: Mutex<Vec<(String, String)>>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(publish_dir: impl Into<PathBuf>) -> Self {
        Self {
            publish_dir: publish_dir.into(),
            layout: PublishLayout::default(),
            files: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Add a file to write on every run.
    pub fn with_file(self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files
            .lock()
            .unwrap()
            .push((name.into(), contents.into()));
        self
    }

    /// Fail after writing the files, as a database error mid-run would.
    pub fn failing_with(self, reason: impl Into<String>) -> Self {
        *self.failure.lock().unwrap() = Some(reason.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SitemapGenerator for ScriptedGenerator {
    async fn generate(&self, summary: &mut RunSummary) -> Result<GenerationReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap().clone();

        let mut report = GenerationReport::default();
        for (name, contents) in files {
            write_atomic(&self.publish_dir.join(&name), contents.as_bytes())?;
            if let Some(range) = self.layout.parse_shard_filename(&name) {
                let url_count = contents.matches("<url>").count();
                summary.shards_written += 1;
                summary.urls_written += url_count;
                report.shards.push(SitemapShard {
                    filename: name,
                    range_start: range.start,
                    range_end: range.end,
                    url_count,
                    last_modified: Utc::now(),
                });
            }
        }

        if let Some(reason) = self.failure.lock().unwrap().clone() {
            summary.failed_ranges += 1;
            return Err(SitemapError::Transient(reason));
        }
        Ok(report)
    }
}
