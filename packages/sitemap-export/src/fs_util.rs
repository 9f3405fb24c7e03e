//! Filesystem helpers shared by the builder, orchestrator and health check.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, SitemapError};
use crate::types::shard::PublishLayout;

/// Write `bytes` to `path` so readers see either the old file or the new one.
///
/// The data goes to a hidden temp file in the same directory, is fsynced, and
/// is then renamed over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SitemapError::Config(format!("not a file path: {}", path.display())))?;
    let tmp = dir.join(format!(".{}.tmp", name));

    let mut file = fs::File::create(&tmp).map_err(|e| SitemapError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| SitemapError::io(&tmp, e))?;
    file.sync_all().map_err(|e| SitemapError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        SitemapError::io(path, e)
    })
}

/// Sorted names of the managed files directly inside `dir`.
///
/// A missing directory has no managed files.
pub fn list_managed(dir: &Path, layout: &PublishLayout) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SitemapError::io(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SitemapError::io(dir, e))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if layout.is_managed(name) || layout.is_temp(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Sorted shard filenames directly inside `dir`.
pub fn list_shards(dir: &Path, layout: &PublishLayout) -> Result<Vec<String>> {
    Ok(list_managed(dir, layout)?
        .into_iter()
        .filter(|name| layout.is_shard(name))
        .collect())
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| SitemapError::io(dir, e))
}

pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SitemapError::io(path, e)),
    }
}
