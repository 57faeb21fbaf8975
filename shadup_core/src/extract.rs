//! Extraction: materialize catalogued paths back into real files.

use crate::catalog::CatalogRow;
use crate::error::{Error, Result};
use crate::paths::Prefix;
use crate::store::{Options, Store};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Statistics from an extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    /// Files materialized.
    pub files: usize,
    /// Bytes materialized.
    pub bytes: u64,
    /// Rows skipped because their blob is missing.
    pub skipped: usize,
}

impl Store {
    /// Materialize every catalogued path under the given prefixes.
    ///
    /// Relative prefixes select catalog rows by logical path. Newer rows win
    /// when two rows land on the same destination; a row whose blob is gone
    /// leaves the destination to the next older one. Any prefix that still
    /// names a symlink into the store afterwards is restored directly from
    /// its target.
    pub fn extract<S: AsRef<str>>(&self, prefixes: &[S], options: &Options) -> Result<ExtractStats> {
        let selectors = Prefix::parse_all(prefixes);
        let mut stats = ExtractStats::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        if !selectors.is_empty() {
            let rows = self.catalog().rows(options.include_deleted)?;
            for row in rows.iter().rev() {
                if !selectors.iter().any(|p| p.matches_recursive(&row.logical_path)) {
                    continue;
                }
                let dest = crate::paths::normalize(&row.location.absolute_path());
                if seen.contains(&dest) {
                    debug!(path = %dest.display(), "already written by a newer row");
                    continue;
                }
                if self.extract_row(row, &dest, &mut stats)? {
                    seen.insert(dest);
                }
            }
        }

        for prefix in prefixes {
            let abs = crate::paths::normalize(&self.resolve(Path::new(prefix.as_ref())));
            if seen.contains(&abs) {
                continue;
            }
            if let Some(bytes) = self.restore_orphan(&abs)? {
                stats.files += 1;
                stats.bytes += bytes;
                seen.insert(abs);
            }
        }

        info!(files = stats.files, bytes = stats.bytes, skipped = stats.skipped, "extract finished");
        Ok(stats)
    }

    /// Materialize one row. Returns true once `dest` holds the row's content.
    fn extract_row(&self, row: &CatalogRow, dest: &Path, stats: &mut ExtractStats) -> Result<bool> {
        let blob = self.blobs().locate(&row.digest);
        if !blob.is_file() {
            warn!(path = %row.logical_path, digest = %row.digest, "blob missing, skipping");
            stats.skipped += 1;
            return Ok(false);
        }

        let parent = dest.parent().unwrap_or(dest);
        ensure_directory(parent)?;
        if !clear_destination(dest, &blob)? {
            debug!(path = %dest.display(), "destination already is the blob");
            return Ok(true);
        }

        let bytes = link_or_copy(&blob, dest, parent)?;
        stats.files += 1;
        stats.bytes += bytes;
        info!(path = %row.logical_path, digest = %row.digest, "extracted");
        Ok(true)
    }

    /// Replace a store symlink the catalog has no row for with its content.
    /// Returns the bytes written, or `None` if `path` is not such a link.
    fn restore_orphan(&self, path: &Path) -> Result<Option<u64>> {
        match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.file_type().is_symlink() => {}
            _ => return Ok(None),
        }
        let Ok(target) = fs::canonicalize(path) else {
            debug!(path = %path.display(), "dangling link, not restoring");
            return Ok(None);
        };
        if !self.blobs().owns(&target) || !target.is_file() {
            return Ok(None);
        }

        let parent = path.parent().unwrap_or(path);
        fs::remove_file(path)?;
        let bytes = link_or_copy(&target, path, parent)?;
        info!(path = %path.display(), "restored uncatalogued link");
        Ok(Some(bytes))
    }
}

/// Create `dir` and its parents, failing if a non-directory is in the way.
fn ensure_directory(dir: &Path) -> Result<()> {
    if let Ok(metadata) = fs::metadata(dir) {
        if metadata.is_dir() {
            return Ok(());
        }
        return Err(Error::path_conflict(dir, "extract directory is a file"));
    }
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotADirectory | io::ErrorKind::AlreadyExists) => {
            Err(Error::path_conflict(dir, "extract directory is blocked by a file"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Make room for the blob at `dest`. Returns false if `dest` already is the
/// blob (same inode), in which case nothing needs writing.
fn clear_destination(dest: &Path, blob: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(dest) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };

    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        fs::remove_file(dest)?;
        return Ok(true);
    }
    if file_type.is_dir() {
        return Err(Error::path_conflict(dest, "extract target is a directory"));
    }
    if !file_type.is_file() {
        return Err(Error::path_conflict(dest, "extract target is not a regular file"));
    }

    let blob_meta = fs::metadata(blob)?;
    if metadata.dev() == blob_meta.dev() && metadata.ino() == blob_meta.ino() {
        return Ok(false);
    }
    fs::remove_file(dest)?;
    Ok(true)
}

/// Hard-link the blob into place when it shares a filesystem with the
/// destination directory, otherwise copy it. Returns the blob size.
fn link_or_copy(blob: &Path, dest: &Path, dest_dir: &Path) -> Result<u64> {
    let blob_meta = fs::metadata(blob)?;
    let dir_meta = fs::metadata(dest_dir)?;

    if blob_meta.dev() == dir_meta.dev() {
        match fs::hard_link(blob, dest) {
            Ok(()) => return Ok(blob_meta.len()),
            Err(e) => debug!(error = %e, "hard link failed, copying"),
        }
    }
    fs::copy(blob, dest)?;
    Ok(blob_meta.len())
}
