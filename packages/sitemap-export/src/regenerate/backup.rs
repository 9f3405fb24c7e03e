//! Snapshots of the published set, restore, and retention.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Result, SitemapError};
use crate::fs_util::{ensure_dir, list_managed, remove_file_if_exists, write_atomic};
use crate::types::shard::{BackupSnapshot, PublishLayout};

pub const BACKUP_PREFIX: &str = "backup-";

/// Copy the managed files of `publish_dir` into a new timestamped directory.
///
/// Returns `None` when nothing is published yet.
pub fn snapshot(
    publish_dir: &Path,
    backup_root: &Path,
    layout: &PublishLayout,
    now: DateTime<Utc>,
) -> Result<Option<BackupSnapshot>> {
    let files: Vec<String> = list_managed(publish_dir, layout)?
        .into_iter()
        .filter(|name| !layout.is_temp(name))
        .collect();
    if files.is_empty() {
        info!("Nothing published yet, skipping backup");
        return Ok(None);
    }

    ensure_dir(backup_root)?;
    let dir = unique_backup_dir(backup_root, now);
    std::fs::create_dir(&dir).map_err(|e| SitemapError::io(&dir, e))?;

    for name in &files {
        let from = publish_dir.join(name);
        let to = dir.join(name);
        std::fs::copy(&from, &to).map_err(|e| SitemapError::io(&from, e))?;
    }
    info!(dir = %dir.display(), files = files.len(), "Backed up published sitemaps");

    Ok(Some(BackupSnapshot {
        timestamp: now,
        dir,
        files,
    }))
}

fn unique_backup_dir(backup_root: &Path, now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format("%Y%m%dT%H%M%S%.3fZ");
    let base = backup_root.join(format!("{}{}", BACKUP_PREFIX, stamp));
    let mut dir = base.clone();
    let mut n = 1;
    while dir.exists() {
        dir = PathBuf::from(format!("{}-{}", base.display(), n));
        n += 1;
    }
    dir
}

/// Put `publish_dir` back to the state captured by `snapshot`.
///
/// Managed files the snapshot does not list are deleted, so a run that added
/// shards leaves nothing behind. With no snapshot the directory returns to
/// having no managed files at all.
pub fn restore(
    snapshot: Option<&BackupSnapshot>,
    publish_dir: &Path,
    layout: &PublishLayout,
) -> Result<()> {
    if let Some(snapshot) = snapshot {
        if !snapshot.dir.is_dir() {
            return Err(SitemapError::BackupUnavailable {
                path: snapshot.dir.clone(),
            });
        }
    }
    let keep: &[String] = snapshot.map(|s| s.files.as_slice()).unwrap_or(&[]);

    for name in list_managed(publish_dir, layout)? {
        if !keep.contains(&name) {
            debug!(file = %name, "Removing file written by failed run");
            remove_file_if_exists(&publish_dir.join(&name))?;
        }
    }

    if let Some(snapshot) = snapshot {
        for name in &snapshot.files {
            let from = snapshot.dir.join(name);
            let bytes = std::fs::read(&from).map_err(|_| SitemapError::BackupUnavailable {
                path: from.clone(),
            })?;
            write_atomic(&publish_dir.join(name), &bytes)?;
        }
        info!(dir = %snapshot.dir.display(), files = snapshot.files.len(), "Restored backup");
    }
    Ok(())
}

/// Delete all but the newest `retain` backup directories.
pub fn prune_backups(backup_root: &Path, retain: usize) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(backup_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SitemapError::io(backup_root, e)),
    };

    let mut backups: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| e.file_name().to_string_lossy().starts_with(BACKUP_PREFIX))
        .map(|e| e.path())
        .collect();
    // Timestamped names sort chronologically.
    backups.sort();

    let excess = backups.len().saturating_sub(retain);
    let mut removed = Vec::with_capacity(excess);
    for dir in backups.into_iter().take(excess) {
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => removed.push(dir),
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to delete old backup"),
        }
    }
    if !removed.is_empty() {
        info!(removed = removed.len(), retained = retain, "Pruned old backups");
    }
    Ok(removed)
}
