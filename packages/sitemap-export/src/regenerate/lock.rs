//! Guard against two regeneration runs on the same host.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SitemapError};

pub const LOCK_FILENAME: &str = ".regeneration.lock";

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: DateTime<Utc>,
}

/// Lock file held for the duration of a run and removed on drop.
#[derive(Debug)]
pub struct RegenerationLock {
    path: PathBuf,
}

impl RegenerationLock {
    /// Create the lock file with create-new semantics.
    ///
    /// A lock older than `stale_after` belongs to a run that died without
    /// cleaning up; it is replaced.
    pub fn acquire(dir: &Path, stale_after: Duration) -> Result<Self> {
        let path = dir.join(LOCK_FILENAME);
        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(SitemapError::RegenerationInProgress { .. }) if is_stale(&path, stale_after) => {
                warn!(lock = %path.display(), "Replacing abandoned regeneration lock");
                crate::fs_util::remove_file_if_exists(&path)?;
                Self::create(&path)
            }
            Err(e) => Err(e),
        }
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SitemapError::RegenerationInProgress {
                    lock_path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(SitemapError::io(path, e)),
        };

        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        let lock = Self {
            path: path.to_path_buf(),
        };
        file.write_all(&serde_json::to_vec(&info)?)
            .map_err(|e| SitemapError::io(path, e))?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegenerationLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to remove regeneration lock");
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let started_at = std::fs::read(path)
        .ok()
        .and_then(|raw| serde_json::from_slice::<LockInfo>(&raw).ok())
        .map(|info| info.started_at)
        .or_else(|| {
            // Unreadable contents: fall back to the file's age.
            let modified = std::fs::metadata(path).ok()?.modified().ok()?;
            Some(DateTime::<Utc>::from(modified))
        });

    match (started_at, chrono::Duration::from_std(stale_after)) {
        (Some(started_at), Ok(stale_after)) => Utc::now() - started_at > stale_after,
        _ => false,
    }
}

/// In-process half of the guard: one run per orchestrator at a time.
#[derive(Debug)]
pub(crate) struct RunFlag<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunFlag<'a> {
    pub(crate) fn try_set(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunFlag<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
