//! Catalog queries: list by path, list by digest, and digest argument
//! resolution.

use crate::digest::{Digest, is_digest_str};
use crate::error::Result;
use crate::paths::Prefix;
use crate::store::{Options, Store};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::warn;

/// One logical path and the digest recorded for it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PathEntry {
    pub path: String,
    pub digest: Digest,
    pub deleted: bool,
}

/// A path recorded for a digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GroupMember {
    pub path: String,
    pub deleted: bool,
}

/// All paths recorded for one digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestGroup {
    pub digest: Digest,
    pub paths: Vec<GroupMember>,
}

impl DigestGroup {
    fn live_count(&self) -> usize {
        self.paths.iter().filter(|m| !m.deleted).count()
    }
}

fn parent_dir(logical: &str) -> &str {
    Path::new(logical)
        .parent()
        .and_then(|p| p.to_str())
        .unwrap_or("")
}

/// Keep entries whose digest occurs live at least `min` times, and only in
/// directories holding at least `min` of those occurrences.
fn filter_duplicates(entries: Vec<PathEntry>, min: usize) -> Vec<PathEntry> {
    let mut per_digest: HashMap<Digest, usize> = HashMap::new();
    for entry in entries.iter().filter(|e| !e.deleted) {
        *per_digest.entry(entry.digest).or_default() += 1;
    }
    let duplicated: HashSet<Digest> = per_digest
        .into_iter()
        .filter(|(_, count)| *count >= min)
        .map(|(digest, _)| digest)
        .collect();

    let mut per_dir: HashMap<&str, usize> = HashMap::new();
    for entry in entries
        .iter()
        .filter(|e| !e.deleted && duplicated.contains(&e.digest))
    {
        *per_dir.entry(parent_dir(&entry.path)).or_default() += 1;
    }
    let dirs: HashSet<String> = per_dir
        .into_iter()
        .filter(|(_, count)| *count >= min)
        .map(|(dir, _)| dir.to_string())
        .collect();

    entries
        .into_iter()
        .filter(|e| duplicated.contains(&e.digest) && dirs.contains(parent_dir(&e.path)))
        .collect()
}

impl Store {
    /// List catalogued paths, sorted by path.
    ///
    /// With no prefixes every path is listed. Otherwise a path is listed if
    /// it equals a prefix, or lies under one when `options.recursive` is set.
    pub fn list_paths<S: AsRef<str>>(&self, prefixes: &[S], options: &Options) -> Result<Vec<PathEntry>> {
        options.validate()?;
        let selectors = Prefix::parse_all(prefixes);

        let entries: BTreeSet<PathEntry> = self
            .catalog()
            .rows(options.include_deleted)?
            .into_iter()
            .filter(|row| {
                prefixes.is_empty()
                    || selectors
                        .iter()
                        .any(|p| p.matches(&row.logical_path, options.recursive))
            })
            .map(|row| PathEntry {
                path: row.logical_path,
                digest: row.digest,
                deleted: row.deleted,
            })
            .collect();
        let entries: Vec<PathEntry> = entries.into_iter().collect();

        if options.min_duplicates > 1 {
            return Ok(filter_duplicates(entries, options.min_duplicates));
        }
        Ok(entries)
    }

    /// List paths grouped by digest, sorted by digest.
    ///
    /// Arguments may be digests or paths (see
    /// [`Store::normalize_digest_arg`]). With no arguments every digest is
    /// listed. When `options.min_duplicates` is above one, groups with fewer
    /// live paths than that are dropped.
    pub fn list_digests<S: AsRef<str>>(&self, args: &[S], options: &Options) -> Result<Vec<DigestGroup>> {
        options.validate()?;
        let wanted: Option<HashSet<Digest>> = if args.is_empty() {
            None
        } else {
            Some(self.resolve_digest_args(args))
        };

        let mut groups: BTreeMap<Digest, BTreeSet<GroupMember>> = BTreeMap::new();
        for row in self.catalog().rows(options.include_deleted)? {
            if wanted.as_ref().is_some_and(|w| !w.contains(&row.digest)) {
                continue;
            }
            groups.entry(row.digest).or_default().insert(GroupMember {
                path: row.logical_path,
                deleted: row.deleted,
            });
        }

        Ok(groups
            .into_iter()
            .map(|(digest, paths)| DigestGroup {
                digest,
                paths: paths.into_iter().collect(),
            })
            .filter(|g| options.min_duplicates <= 1 || g.live_count() >= options.min_duplicates)
            .collect())
    }

    /// Resolve a digest argument.
    ///
    /// Accepts, in order: a 64-character hex digest in any case; a symlink
    /// into the blob store, whose file name is the digest; or any path to a
    /// regular file, which is hashed (through symlinks). Returns `None` if
    /// nothing matches.
    pub fn normalize_digest_arg(&self, value: &str) -> Option<Digest> {
        let raw = value.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(digest) = Digest::parse_loose(raw) {
            return Some(digest);
        }

        let path = self.resolve(Path::new(raw));
        let metadata = fs::symlink_metadata(&path).ok()?;
        let target = if metadata.file_type().is_symlink() {
            let resolved = fs::canonicalize(&path).ok()?;
            let name = resolved.file_name()?.to_str()?.to_ascii_lowercase();
            if is_digest_str(&name) && self.blobs().owns(&resolved) {
                return Digest::from_hex(&name).ok();
            }
            resolved
        } else {
            path
        };

        if !target.is_file() {
            return None;
        }
        match Digest::hash_file(&target) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(path = %target.display(), error = %e, "could not hash digest argument");
                None
            }
        }
    }

    pub(crate) fn resolve_digest_args<S: AsRef<str>>(&self, args: &[S]) -> HashSet<Digest> {
        args.iter()
            .filter_map(|arg| {
                let arg: &str = arg.as_ref();
                let digest = self.normalize_digest_arg(arg);
                if digest.is_none() {
                    warn!(arg, "not a digest or a readable file, ignoring");
                }
                digest
            })
            .collect()
    }
}
