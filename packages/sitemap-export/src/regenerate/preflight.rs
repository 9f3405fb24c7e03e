//! Checks that must pass before anything in the publish directory changes.

use std::path::Path;
use std::time::Duration;

use sysinfo::Disks;
use tracing::{debug, warn};

use crate::error::{Result, SitemapError};
use crate::fs_util::{ensure_dir, remove_file_if_exists};
use crate::traits::store::CatalogStore;
use crate::types::shard::PREFLIGHT_PROBE_FILENAME;

const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Create `dir` if needed and prove it is writable.
pub fn check_writable(dir: &Path) -> Result<()> {
    ensure_dir(dir).map_err(|e| SitemapError::DiskOrPermissionFailure(e.to_string()))?;
    let probe = dir.join(PREFLIGHT_PROBE_FILENAME);
    std::fs::write(&probe, b"probe").map_err(|e| {
        SitemapError::DiskOrPermissionFailure(format!("{} is not writable: {}", dir.display(), e))
    })?;
    remove_file_if_exists(&probe)
        .map_err(|e| SitemapError::DiskOrPermissionFailure(e.to_string()))
}

pub async fn check_database(store: &dyn CatalogStore) -> Result<()> {
    match tokio::time::timeout(PING_TIMEOUT, store.ping()).await {
        Ok(result) => result,
        Err(_) => Err(SitemapError::ConnectionAcquisitionTimeout),
    }
}

/// Available bytes on the filesystem holding `dir`, if it can be determined.
pub async fn free_disk_bytes(dir: &Path) -> Option<u64> {
    let dir = dir.canonicalize().ok()?;
    tokio::task::spawn_blocking(move || available_space_for(&dir))
        .await
        .ok()
        .flatten()
}

fn available_space_for(dir: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    // Longest mount point that prefixes the directory.
    disks
        .list()
        .iter()
        .filter(|d| dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

pub async fn check_free_disk(dir: &Path, min_free_bytes: u64) -> Result<()> {
    if min_free_bytes == 0 {
        return Ok(());
    }
    match free_disk_bytes(dir).await {
        Some(free) if free < min_free_bytes => Err(SitemapError::DiskOrPermissionFailure(format!(
            "only {} MB free under {}, need {} MB",
            free / (1024 * 1024),
            dir.display(),
            min_free_bytes / (1024 * 1024)
        ))),
        Some(free) => {
            debug!(free_mb = free / (1024 * 1024), "Free disk check passed");
            Ok(())
        }
        None => {
            warn!(dir = %dir.display(), "Could not determine free disk space, skipping check");
            Ok(())
        }
    }
}
