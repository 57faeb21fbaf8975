//! Ingestion: move files into the blob store and leave symlinks behind.

use crate::digest::{FileDigest, file_digest};
use crate::error::Result;
use crate::store::{Options, RootKind, Store, base_dir, root_kind};
use crate::walk::walk_files;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Statistics from an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Files replaced by links.
    pub files: usize,
    /// Bytes of new content moved into the store.
    pub stored_bytes: u64,
    /// Bytes discarded because the content was already stored.
    pub skipped_bytes: u64,
    /// Files skipped because they could not be read or named.
    pub skipped: usize,
}

/// Build the hashing pool.
pub(crate) fn worker_pool(workers: usize) -> Result<rayon::ThreadPool> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("shadup-hash-{}", i))
        .build()?;
    Ok(pool)
}

/// Hash every path in parallel. Results keep the input order.
pub(crate) fn hash_files(
    files: &[PathBuf],
    options: &Options,
) -> Result<Vec<(PathBuf, Result<Option<FileDigest>>)>> {
    let pool = worker_pool(options.worker_count())?;
    debug!(files = files.len(), workers = pool.current_num_threads(), "hashing");
    Ok(pool.install(|| {
        files
            .par_iter()
            .map(|path| (path.clone(), file_digest(path)))
            .collect()
    }))
}

impl Store {
    /// Ingest a file or directory tree.
    ///
    /// Every regular file is hashed, moved into the blob store (or discarded
    /// if its content is already there), replaced by a symlink to the blob,
    /// and recorded in the catalog. Existing symlinks are left alone, so
    /// running twice over the same tree changes nothing the second time.
    pub fn ingest(&self, root: &Path, options: &Options) -> Result<IngestStats> {
        options.validate()?;
        let abs_root = self.resolve(root);

        let mut stats = IngestStats::default();
        let kind = root_kind(&abs_root)?;
        let files = match kind {
            RootKind::Dir => walk_files(&abs_root, self.root(), options.skip_dotfiles),
            RootKind::File => vec![abs_root.clone()],
            RootKind::Other => {
                debug!(root = %abs_root.display(), "not a regular file, nothing to store");
                return Ok(stats);
            }
        };
        let base = base_dir(&abs_root, kind == RootKind::Dir);
        self.store_files(&base, &files, options, &mut stats)?;

        info!(
            root = %abs_root.display(),
            files = stats.files,
            stored_bytes = stats.stored_bytes,
            skipped_bytes = stats.skipped_bytes,
            "ingest finished"
        );
        Ok(stats)
    }

    /// Hash `files` in parallel, then store each one in order. Files that
    /// cannot be read are counted as skipped.
    fn store_files(
        &self,
        base: &Path,
        files: &[PathBuf],
        options: &Options,
        stats: &mut IngestStats,
    ) -> Result<()> {
        for (path, hashed) in hash_files(files, options)? {
            match hashed {
                Ok(Some(fd)) => self.store_file(base, fd, stats)?,
                Ok(None) => debug!(path = %path.display(), "no longer a regular file"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    stats.skipped += 1;
                }
            }
        }
        Ok(())
    }

    /// Move one hashed file into the store, link it, and catalog it.
    fn store_file(&self, base: &Path, fd: FileDigest, stats: &mut IngestStats) -> Result<()> {
        let Some(location) = self.location_for(base, &fd.path) else {
            warn!(path = %fd.path.display(), "skipping path that is not valid UTF-8");
            stats.skipped += 1;
            return Ok(());
        };

        let outcome = self.blobs().put(&fd.path, &fd.digest)?;
        self.blobs().link_to(&fd.digest, &fd.path)?;
        self.catalog().upsert_active(&fd.digest, &location)?;

        stats.files += 1;
        if outcome.already_existed {
            stats.skipped_bytes += fd.size;
        } else {
            stats.stored_bytes += fd.size;
        }
        info!(
            path = %location.logical_path(),
            digest = %fd.digest,
            new = !outcome.already_existed,
            "stored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::StoreConfig;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let cwd = fs::canonicalize(temp_dir.path()).unwrap();
        let store = Store::open(&StoreConfig::new(cwd.join("store"), &cwd)).unwrap();
        (temp_dir, store)
    }

    fn work(store: &Store) -> PathBuf {
        let work = store.cwd().join("work");
        fs::create_dir_all(work.join("sub")).unwrap();
        fs::write(work.join("a.txt"), b"alpha").unwrap();
        fs::write(work.join("sub/b.txt"), b"beta").unwrap();
        fs::write(work.join("sub/dup.txt"), b"alpha").unwrap();
        work
    }

    #[test]
    fn test_ingest_replaces_files_with_links() {
        let (_temp_dir, store) = setup();
        let work = work(&store);

        let stats = store.ingest(Path::new("work"), &Options::default()).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.stored_bytes, 9);
        assert_eq!(stats.skipped_bytes, 5);

        for name in ["a.txt", "sub/b.txt", "sub/dup.txt"] {
            let path = work.join(name);
            assert!(fs::symlink_metadata(&path).unwrap().file_type().is_symlink());
            let target = fs::read_link(&path).unwrap();
            assert!(target.is_absolute());
            assert!(store.blobs().owns(&target));
        }
        assert_eq!(fs::read(work.join("sub/dup.txt")).unwrap(), b"alpha");

        let logical: Vec<String> = store
            .catalog()
            .rows(false)
            .unwrap()
            .into_iter()
            .map(|r| r.logical_path)
            .collect();
        assert_eq!(logical.len(), 3);
        assert!(logical.contains(&"work/sub/b.txt".to_string()));
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let (_temp_dir, store) = setup();
        work(&store);

        store.ingest(Path::new("work"), &Options::default()).unwrap();
        let rows = store.catalog().count(true).unwrap();

        let again = store.ingest(Path::new("work"), &Options::default()).unwrap();
        assert_eq!(again, IngestStats::default());
        assert_eq!(store.catalog().count(true).unwrap(), rows);
    }

    #[test]
    fn test_one_blob_per_digest() {
        let (_temp_dir, store) = setup();
        work(&store);
        store.ingest(Path::new("work"), &Options::default()).unwrap();

        let alpha = store.blobs().locate(&crate::Digest::hash_bytes(b"alpha"));
        let shard = alpha.parent().unwrap();
        let blobs: Vec<_> = fs::read_dir(shard).unwrap().collect();
        assert_eq!(blobs.len(), 1);
        assert_eq!(fs::read(&alpha).unwrap(), b"alpha");
    }

    #[test]
    fn test_ingest_single_file() {
        let (_temp_dir, store) = setup();
        let work = work(&store);

        let stats = store
            .ingest(Path::new("work/sub/b.txt"), &Options::default())
            .unwrap();
        assert_eq!(stats.files, 1);

        let rows = store.catalog().rows(false).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].logical_path, "work/sub/b.txt");
        assert_eq!(rows[0].location.directory, "");
        assert_eq!(rows[0].location.absolute_path(), work.join("sub/b.txt"));
        assert!(fs::symlink_metadata(work.join("a.txt")).unwrap().is_file());
    }

    #[test]
    fn test_ingest_skips_dotfiles_by_default() {
        let (_temp_dir, store) = setup();
        let work = work(&store);
        fs::write(work.join(".secret"), b"hidden").unwrap();

        store.ingest(Path::new("work"), &Options::default()).unwrap();
        assert!(fs::symlink_metadata(work.join(".secret")).unwrap().is_file());

        let with_dots = Options {
            skip_dotfiles: false,
            ..Options::default()
        };
        let stats = store.ingest(Path::new("work"), &with_dots).unwrap();
        assert_eq!(stats.files, 1);
        assert!(fs::symlink_metadata(work.join(".secret")).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_ingest_never_walks_into_store() {
        let (_temp_dir, store) = setup();
        fs::write(store.cwd().join("outer.txt"), b"outer").unwrap();

        let stats = store.ingest(Path::new("."), &Options::default()).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(store.catalog().rows(false).unwrap()[0].logical_path, "outer.txt");
        assert!(store.root().join(crate::catalog::CATALOG_FILE).is_file());
    }

    #[test]
    fn test_ingest_missing_root() {
        let (_temp_dir, store) = setup();
        let err = store.ingest(Path::new("nope"), &Options::default()).unwrap_err();
        assert!(matches!(err, Error::RootNotFound { .. }));
    }

    #[test]
    fn test_ingest_with_single_worker() {
        let (_temp_dir, store) = setup();
        work(&store);
        let options = Options {
            workers: Some(1),
            ..Options::default()
        };
        assert_eq!(store.ingest(Path::new("work"), &options).unwrap().files, 3);
    }

    #[test]
    fn test_ingest_symlinked_root_directory() {
        let (_temp_dir, store) = setup();
        let work = work(&store);
        symlink(&work, store.cwd().join("alias")).unwrap();

        let stats = store.ingest(Path::new("alias"), &Options::default()).unwrap();
        assert_eq!(stats.files, 3);
        assert!(fs::symlink_metadata(work.join("a.txt")).unwrap().file_type().is_symlink());

        let logical: Vec<String> = store
            .catalog()
            .rows(false)
            .unwrap()
            .into_iter()
            .map(|r| r.logical_path)
            .collect();
        assert!(logical.contains(&"alias/sub/b.txt".to_string()));
    }

    #[test]
    fn test_ingest_through_link_leaves_store_intact() {
        let (_temp_dir, store) = setup();
        let cwd = store.cwd().to_path_buf();
        fs::write(cwd.join("a.txt"), b"alpha").unwrap();
        store.ingest(Path::new("."), &Options::default()).unwrap();
        let rows = store.catalog().count(true).unwrap();

        symlink(&cwd, cwd.join("via")).unwrap();
        let stats = store.ingest(Path::new("via"), &Options::default()).unwrap();
        assert_eq!(stats, IngestStats::default());

        let blob = store.blobs().locate(&crate::Digest::hash_bytes(b"alpha"));
        assert!(fs::symlink_metadata(&blob).unwrap().is_file());
        assert_eq!(fs::read(cwd.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(store.catalog().count(true).unwrap(), rows);
    }

    #[test]
    fn test_unreadable_file_is_skipped_and_batch_continues() {
        let (_temp_dir, store) = setup();
        let work = work(&store);
        let files = vec![
            work.join("a.txt"),
            work.join("vanished.txt"),
            work.join("sub/b.txt"),
        ];

        let mut stats = IngestStats::default();
        store
            .store_files(&work, &files, &Options::default(), &mut stats)
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.files, 2);
        assert!(fs::symlink_metadata(work.join("sub/b.txt")).unwrap().file_type().is_symlink());
        assert_eq!(store.catalog().count(false).unwrap(), 2);
    }
}
