//! Filesystem walking.
//!
//! Walks never follow symlinks and never descend into the store directory.
//! Unreadable entries are logged and skipped so one bad directory does not
//! abort a whole batch.

use crate::error::{Error, Result};
use crate::paths;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

fn walker(root: &Path, exclude: &Path, skip_dotfiles: bool, recursive: bool) -> ignore::Walk {
    let exclude = exclude.to_path_buf();
    ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(skip_dotfiles)
        .follow_links(false)
        .max_depth(if recursive { None } else { Some(1) })
        .filter_entry(move |entry| !paths::is_within(entry.path(), &exclude))
        .build()
}

/// Walk entries under the real location of `root`, with the store excluded
/// by its real location too. Paths are handed back spelled under `root`.
fn entries(
    root: &Path,
    exclude: &Path,
    skip_dotfiles: bool,
    recursive: bool,
) -> impl Iterator<Item = (usize, ignore::DirEntry, PathBuf)> {
    let real_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let real_exclude = fs::canonicalize(exclude).unwrap_or_else(|_| exclude.to_path_buf());
    let root = root.to_path_buf();
    walker(&real_root, &real_exclude, skip_dotfiles, recursive).filter_map(move |entry| {
        match entry {
            Ok(entry) => {
                let path = rebase(entry.path(), &real_root, &root);
                Some((entry.depth(), entry, path))
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        }
    })
}

fn rebase(path: &Path, from: &Path, onto: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(rest) if rest.as_os_str().is_empty() => onto.to_path_buf(),
        Ok(rest) => onto.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// All regular files under the directory `root`, in walk order. A root that
/// is a symlink to a directory is walked through the link.
pub(crate) fn walk_files(root: &Path, exclude: &Path, skip_dotfiles: bool) -> Vec<PathBuf> {
    entries(root, exclude, skip_dotfiles, true)
        .filter(|(_, entry, _)| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|(_, _, path)| path)
        .collect()
}

/// Symlinks at `root`.
///
/// A symlink root yields itself and a regular file yields nothing. A
/// directory yields its child links, or every descendant link when
/// `recursive` is set.
pub(crate) fn walk_symlinks(
    root: &Path,
    exclude: &Path,
    skip_dotfiles: bool,
    recursive: bool,
) -> Result<Vec<PathBuf>> {
    let metadata = match fs::symlink_metadata(root) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::root_not_found(root)),
        Err(e) => return Err(e.into()),
    };

    if metadata.file_type().is_symlink() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !metadata.is_dir() {
        return Ok(Vec::new());
    }

    Ok(entries(root, exclude, skip_dotfiles, recursive)
        .filter(|(depth, entry, _)| *depth > 0 && entry.file_type().is_some_and(|t| t.is_symlink()))
        .map(|(_, _, path)| path)
        .collect())
}
