//! Catalog maintenance: soft deletion and symlink repair.

use crate::digest::{Digest, is_digest_str};
use crate::error::{Error, Result};
use crate::paths::{self, Prefix};
use crate::store::{Options, Paranoia, Store, base_dir};
use crate::walk::walk_symlinks;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Statistics from a delete-by-path run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteStats {
    /// Rows that went from live to deleted.
    pub deleted: usize,
    /// Directory prefixes left alone because recursion was off.
    pub skipped_prefixes: Vec<String>,
}

/// Statistics from a link repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FixStats {
    /// Symlinks examined.
    pub checked: usize,
    /// Symlinks rewritten.
    pub fixed: usize,
    /// Symlinks left alone because they could not be verified.
    pub skipped: usize,
}

impl Store {
    /// Soft-delete catalog rows by logical path.
    ///
    /// Without `options.recursive` only exact paths are deleted, and a prefix
    /// that only names a directory is reported back instead. Blobs and
    /// symlinks on disk are never touched.
    pub fn delete_paths<S: AsRef<str>>(&self, prefixes: &[S], options: &Options) -> Result<DeleteStats> {
        let selectors = Prefix::parse_all(prefixes);
        let mut stats = DeleteStats::default();
        if selectors.is_empty() {
            return Ok(stats);
        }

        let rows = self.catalog().rows(options.include_deleted)?;
        if !options.recursive {
            for prefix in &selectors {
                let exact = rows.iter().any(|r| prefix.matches_exact(&r.logical_path));
                let nested = rows.iter().any(|r| prefix.is_ancestor_of(&r.logical_path));
                if !exact && nested {
                    warn!(prefix = %prefix, "directory prefix needs --recursive, skipping");
                    stats.skipped_prefixes.push(prefix.to_string());
                }
            }
        }

        let ids: Vec<i64> = rows
            .iter()
            .filter(|r| selectors.iter().any(|p| p.matches(&r.logical_path, options.recursive)))
            .map(|r| r.id)
            .collect();
        stats.deleted = self.catalog().soft_delete_ids(&ids)?;
        info!(deleted = stats.deleted, "soft-deleted paths");
        Ok(stats)
    }

    /// Soft-delete every row for the given digests, across all paths.
    /// Arguments are resolved like [`Store::normalize_digest_arg`].
    pub fn delete_digests<S: AsRef<str>>(&self, args: &[S]) -> Result<usize> {
        let digests: Vec<Digest> = self.resolve_digest_args(args).into_iter().collect();
        if digests.is_empty() {
            return Ok(0);
        }
        let deleted = self.catalog().soft_delete_digests(&digests)?;
        info!(deleted, digests = digests.len(), "soft-deleted digests");
        Ok(deleted)
    }

    /// Rewrite symlinks so they point at the canonical blob path.
    ///
    /// The digest comes from the link target's file name when it looks like
    /// one, otherwise from the newest live catalog row at the link's logical
    /// path. `options.paranoia` decides whether the blob must exist or must
    /// also rehash correctly before the link is touched. Each rewritten
    /// link's row is made the only live row at its logical path.
    pub fn fixlinks<P: AsRef<Path>>(&self, roots: &[P], options: &Options) -> Result<FixStats> {
        check_roots(roots, self.cwd())?;
        let mut stats = FixStats::default();
        for root in roots {
            let abs_root = self.resolve(root.as_ref());
            let links = walk_symlinks(&abs_root, self.root(), options.skip_dotfiles, options.recursive)?;
            let is_dir = fs::symlink_metadata(&abs_root).is_ok_and(|m| m.is_dir());
            let base = base_dir(&abs_root, is_dir);

            for link in links {
                stats.checked += 1;
                self.fix_link(&base, &link, options.paranoia, &mut stats)?;
            }
        }
        info!(checked = stats.checked, fixed = stats.fixed, skipped = stats.skipped, "fixlinks finished");
        Ok(stats)
    }

    fn fix_link(&self, base: &Path, link: &Path, paranoia: Paranoia, stats: &mut FixStats) -> Result<()> {
        let Some(location) = self.location_for(base, link) else {
            warn!(path = %link.display(), "skipping path that is not valid UTF-8");
            stats.skipped += 1;
            return Ok(());
        };
        let logical = location.logical_path();

        let current = match fs::read_link(link) {
            Ok(target) => paths::absolutize(&target, link.parent().unwrap_or(base)),
            Err(e) => {
                warn!(path = %logical, error = %e, "unreadable link, skipping");
                stats.skipped += 1;
                return Ok(());
            }
        };

        let from_name = current
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|n| is_digest_str(n))
            .and_then(|n| Digest::from_hex(&n).ok());
        let digest = match from_name {
            Some(digest) => digest,
            None => match self.catalog().latest_active_digest(&logical)? {
                Some(digest) => digest,
                None => {
                    warn!(path = %logical, "no digest known for link, skipping");
                    stats.skipped += 1;
                    return Ok(());
                }
            },
        };

        let canonical = self.blobs().locate(&digest);
        if paranoia >= Paranoia::Exists && !canonical.is_file() {
            warn!(path = %logical, digest = %digest, "blob missing, not relinking");
            stats.skipped += 1;
            return Ok(());
        }
        if paranoia >= Paranoia::Verify {
            match self.blobs().verify(&digest) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(path = %logical, digest = %digest, "blob content does not match digest");
                    stats.skipped += 1;
                    return Ok(());
                }
                Err(e) => {
                    warn!(path = %logical, error = %e, "could not verify blob");
                    stats.skipped += 1;
                    return Ok(());
                }
            }
        }

        if current == canonical {
            return Ok(());
        }

        self.blobs().link_to(&digest, link)?;
        self.catalog().retire_other_digests(&logical, &digest)?;
        self.catalog().upsert_active(&digest, &location)?;
        stats.fixed += 1;
        info!(path = %logical, target = %canonical.display(), "relinked");
        Ok(())
    }
}

/// Reject a root that does not exist before a batch starts.
fn check_roots<P: AsRef<Path>>(roots: &[P], cwd: &Path) -> Result<()> {
    for root in roots {
        let abs = paths::absolutize(root.as_ref(), cwd);
        match fs::symlink_metadata(&abs) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::root_not_found(abs)),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
