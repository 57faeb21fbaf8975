//! Link-only deduplication of files whose content is already stored.

use crate::error::{Error, Result};
use crate::ingest::hash_files;
use crate::store::{Options, RootKind, Store, base_dir, root_kind};
use crate::walk::walk_files;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory created next to a deduplicated file to hold its link.
pub const DEDUP_DIR: &str = ".dedup";

/// Statistics from a dedup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Files replaced (or, in a dry run, that would be replaced).
    pub linked: usize,
    /// Bytes those files occupied.
    pub bytes: u64,
    /// Files skipped because they could not be read or named.
    pub skipped: usize,
}

impl Store {
    /// Remove files whose content is already stored and catalogued at some
    /// other live path, leaving `<dir>/.dedup/<name>` pointing at the blob.
    ///
    /// Nothing is moved into the store and the catalog is not changed. With
    /// `dry_run` only the statistics are computed.
    pub fn dedup(&self, root: &Path, options: &Options, dry_run: bool) -> Result<DedupStats> {
        options.validate()?;
        let abs_root = self.resolve(root);
        let mut stats = DedupStats::default();
        let kind = root_kind(&abs_root)?;
        let files = match kind {
            RootKind::Dir => walk_files(&abs_root, self.root(), options.skip_dotfiles),
            RootKind::File => vec![abs_root.clone()],
            RootKind::Other => return Ok(stats),
        };
        let base = base_dir(&abs_root, kind == RootKind::Dir);

        for (path, hashed) in hash_files(&files, options)? {
            let fd = match hashed {
                Ok(Some(fd)) => fd,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    stats.skipped += 1;
                    continue;
                }
            };
            if !self.blobs().contains(&fd.digest) {
                continue;
            }
            let Some(location) = self.location_for(&base, &fd.path) else {
                warn!(path = %fd.path.display(), "skipping path that is not valid UTF-8");
                stats.skipped += 1;
                continue;
            };
            let logical = location.logical_path();
            let others = self.catalog().active_count_excluding(&fd.digest, &logical)?;
            debug!(path = %logical, others, "duplicate count");
            if others == 0 {
                continue;
            }

            if !dry_run {
                let link = dedup_link_path(&fd.path)?;
                self.blobs().link_to(&fd.digest, &link)?;
                fs::remove_file(&fd.path)?;
            }
            stats.linked += 1;
            stats.bytes += fd.size;
            info!(path = %logical, digest = %fd.digest, dry_run, "deduplicated");
        }

        info!(linked = stats.linked, bytes = stats.bytes, "dedup finished");
        Ok(stats)
    }
}

/// `<parent>/.dedup/<filename>`, creating the `.dedup` directory.
fn dedup_link_path(path: &Path) -> Result<PathBuf> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(Error::invalid_argument(format!(
            "cannot dedup {}",
            path.display()
        )));
    };
    let dir = parent.join(DEDUP_DIR);
    match fs::symlink_metadata(&dir) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(Error::path_conflict(&dir, "dedup path is not a directory")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&dir)?,
        Err(e) => return Err(e.into()),
    }
    Ok(dir.join(name))
}
