//! Published artifacts: shards, the index, and backup snapshots.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::range::IdRange;

/// Scratch file the regeneration pre-flight writes to prove a directory is
/// writable.
pub const PREFLIGHT_PROBE_FILENAME: &str = ".preflight-probe.tmp";

/// File naming for one publish directory.
///
/// Only files this layout recognizes are backed up, restored, pruned or
/// validated; anything else in the directory is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishLayout {
    pub index_filename: String,
    pub shard_prefix: String,
    pub summary_filename: String,
}

impl Default for PublishLayout {
    fn default() -> Self {
        Self {
            index_filename: "sitemap.xml".to_string(),
            shard_prefix: "sitemap-".to_string(),
            summary_filename: "sitemap-run-summary.json".to_string(),
        }
    }
}

impl PublishLayout {
    pub fn shard_filename(&self, range: &IdRange) -> String {
        format!("{}{}-{}.xml", self.shard_prefix, range.start, range.end)
    }

    /// Parse the range back out of a shard filename.
    pub fn parse_shard_filename(&self, filename: &str) -> Option<IdRange> {
        let stem = filename
            .strip_prefix(&self.shard_prefix)?
            .strip_suffix(".xml")?;
        let (start, end) = stem.split_once('-')?;
        IdRange::new(start.parse().ok()?, end.parse().ok()?).ok()
    }

    pub fn is_shard(&self, filename: &str) -> bool {
        self.parse_shard_filename(filename).is_some()
    }

    /// Files that belong to the published set.
    pub fn is_managed(&self, filename: &str) -> bool {
        filename == self.index_filename
            || filename == self.summary_filename
            || self.is_shard(filename)
    }

    /// Leftover temp files from an interrupted atomic write of a managed file,
    /// or a stray pre-flight probe. Other dotfiles are not ours.
    pub fn is_temp(&self, filename: &str) -> bool {
        filename == PREFLIGHT_PROBE_FILENAME
            || filename
                .strip_prefix('.')
                .and_then(|rest| rest.strip_suffix(".tmp"))
                .is_some_and(|name| self.is_managed(name))
    }
}

/// One exported file covering one ID range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapShard {
    pub filename: String,
    pub range_start: i64,
    pub range_end: i64,
    pub url_count: usize,
    pub last_modified: DateTime<Utc>,
}

impl SitemapShard {
    pub fn range(&self) -> IdRange {
        IdRange {
            start: self.range_start,
            end: self.range_end,
        }
    }
}

/// A locator in the sitemap index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub loc: String,
    pub last_modified: DateTime<Utc>,
}

/// The top-level file search engines fetch first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapIndex {
    pub entries: Vec<IndexEntry>,
}

impl SitemapIndex {
    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Copy of the previously published set, kept for rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub timestamp: DateTime<Utc>,
    pub dir: PathBuf,
    /// Filenames relative to the publish directory
    pub files: Vec<String>,
}
