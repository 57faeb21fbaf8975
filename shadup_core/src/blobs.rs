//! Sharded on-disk blob storage.

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::paths;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, symlink};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of moving a file into the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Absolute path of the blob.
    pub path: PathBuf,
    /// True if the blob was already present and the source was discarded.
    pub already_existed: bool,
}

/// Holds exactly one physical copy of each digest's content at
/// `<root>/<digest[:2]>/<digest>`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a blob store rooted at `root`. The root should be absolute;
    /// symlinks written by [`BlobStore::link_to`] embed it verbatim.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root directory of the blob store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path of the blob for a digest.
    ///
    /// Returns: `{root}/{shard}/{digest}`
    pub fn locate(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.shard()).join(digest.to_hex())
    }

    /// True if a regular file exists at the digest's blob path.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.locate(digest).is_file()
    }

    /// True if the (already absolute) path lies inside the blob store.
    pub fn owns(&self, path: &Path) -> bool {
        paths::is_within(path, &self.root)
    }

    /// Move `source` into the store under `digest`.
    ///
    /// If the blob already exists the source is known-duplicate content and
    /// is removed. Otherwise it is renamed into place, or copied and removed
    /// when the store is on another filesystem. The caller is responsible for
    /// having computed `digest` from `source`.
    pub fn put(&self, source: &Path, digest: &Digest) -> Result<PutOutcome> {
        let dest = self.locate(digest);
        let shard_dir = self.root.join(digest.shard());
        fs::create_dir_all(&shard_dir)?;

        let existing = match fs::symlink_metadata(&dest) {
            Ok(metadata) => Some(metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if paths::normalize(source) == paths::normalize(&dest)
            || existing.as_ref().is_some_and(|blob| same_file(source, blob))
        {
            return Err(Error::invariant(format!(
                "source equals destination: {}",
                source.display()
            )));
        }

        let already_existed = existing.is_some();
        if already_existed {
            fs::remove_file(source)?;
        } else {
            move_file(source, &dest, &shard_dir)?;
        }

        Ok(PutOutcome {
            path: dest,
            already_existed,
        })
    }

    /// Point a symlink at `link` to the blob, replacing whatever is there.
    /// The link target is the blob's absolute path.
    pub fn link_to(&self, digest: &Digest, link: &Path) -> Result<PathBuf> {
        let target = self.locate(digest);
        match fs::symlink_metadata(link) {
            Ok(meta) if meta.is_dir() => {
                return Err(Error::path_conflict(link, "link path is a directory"));
            }
            Ok(_) => fs::remove_file(link)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        symlink(&target, link)?;
        Ok(target)
    }

    /// Rehash the blob and compare against its digest. Returns `Ok(false)` on
    /// a mismatch and an error if the blob cannot be read.
    pub fn verify(&self, digest: &Digest) -> Result<bool> {
        let actual = Digest::hash_file(&self.locate(digest))?;
        Ok(actual == *digest)
    }
}

/// True if `path` is the same inode as the already-stat'ed `blob`.
fn same_file(path: &Path, blob: &fs::Metadata) -> bool {
    fs::symlink_metadata(path)
        .is_ok_and(|metadata| metadata.dev() == blob.dev() && metadata.ino() == blob.ino())
}

/// Rename within a filesystem; across filesystems copy to a temp file in the
/// destination directory, persist it atomically, then remove the source.
fn move_file(source: &Path, dest: &Path, dest_dir: &Path) -> Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(source = %source.display(), "rename crosses devices, copying");
        }
        Err(e) => return Err(e.into()),
    }

    let mut input = fs::File::open(source)?;
    let permissions = input.metadata()?.permissions();
    let mut temp_file = tempfile::NamedTempFile::new_in(dest_dir)?;
    io::copy(&mut input, &mut temp_file)?;
    temp_file.flush()?;
    fs::set_permissions(temp_file.path(), permissions)?;
    temp_file.persist(dest)?;

    fs::remove_file(source)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BlobStore) {
        let temp_dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(temp_dir.path().join("data"));
        (temp_dir, blobs)
    }

    #[test]
    fn test_locate() {
        let blobs = BlobStore::new("/store/data");
        let digest = Digest::hash_bytes(b"hello world");
        assert_eq!(
            blobs.locate(&digest),
            PathBuf::from(
                "/store/data/b9/b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
            )
        );
    }

    #[test]
    fn test_put_moves_new_blob() {
        let (temp_dir, blobs) = setup();
        let source = temp_dir.path().join("a.txt");
        fs::write(&source, b"content").unwrap();
        let digest = Digest::hash_bytes(b"content");

        let outcome = blobs.put(&source, &digest).unwrap();
        assert!(!outcome.already_existed);
        assert_eq!(outcome.path, blobs.locate(&digest));
        assert!(!source.exists());
        assert_eq!(fs::read(&outcome.path).unwrap(), b"content");
        assert!(blobs.contains(&digest));
    }

    #[test]
    fn test_put_discards_duplicate_source() {
        let (temp_dir, blobs) = setup();
        let digest = Digest::hash_bytes(b"same");

        let first = temp_dir.path().join("first");
        fs::write(&first, b"same").unwrap();
        blobs.put(&first, &digest).unwrap();

        let second = temp_dir.path().join("second");
        fs::write(&second, b"same").unwrap();
        let outcome = blobs.put(&second, &digest).unwrap();

        assert!(outcome.already_existed);
        assert!(!second.exists());
        assert_eq!(fs::read(blobs.locate(&digest)).unwrap(), b"same");
    }

    #[test]
    fn test_put_self_move_is_invariant_violation() {
        let (_temp_dir, blobs) = setup();
        let digest = Digest::hash_bytes(b"x");
        let blob_path = blobs.locate(&digest);
        fs::create_dir_all(blob_path.parent().unwrap()).unwrap();
        fs::write(&blob_path, b"x").unwrap();

        let err = blobs.put(&blob_path, &digest).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { .. }));
        assert!(blob_path.exists());
    }

    #[test]
    fn test_put_self_move_through_symlinked_path() {
        let (temp_dir, blobs) = setup();
        let digest = Digest::hash_bytes(b"x");
        let blob_path = blobs.locate(&digest);
        fs::create_dir_all(blob_path.parent().unwrap()).unwrap();
        fs::write(&blob_path, b"x").unwrap();

        let alias = temp_dir.path().join("alias");
        symlink(temp_dir.path(), &alias).unwrap();
        let source = alias.join(blob_path.strip_prefix(temp_dir.path()).unwrap());

        let err = blobs.put(&source, &digest).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { .. }));
        assert_eq!(fs::read(&blob_path).unwrap(), b"x");
        assert!(fs::symlink_metadata(&blob_path).unwrap().is_file());
    }

    #[test]
    fn test_link_to_replaces_file_with_absolute_symlink() {
        let (temp_dir, blobs) = setup();
        let source = temp_dir.path().join("a.txt");
        fs::write(&source, b"content").unwrap();
        let digest = Digest::hash_bytes(b"content");
        blobs.put(&source, &digest).unwrap();

        let target = blobs.link_to(&digest, &source).unwrap();
        let read = fs::read_link(&source).unwrap();
        assert!(read.is_absolute());
        assert_eq!(read, target);
        assert_eq!(fs::read(&source).unwrap(), b"content");
    }

    #[test]
    fn test_link_to_refuses_directory() {
        let (temp_dir, blobs) = setup();
        let dir = temp_dir.path().join("dir");
        fs::create_dir(&dir).unwrap();
        let digest = Digest::hash_bytes(b"content");

        let err = blobs.link_to(&digest, &dir).unwrap_err();
        assert!(matches!(err, Error::PathConflict { .. }));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let (temp_dir, blobs) = setup();
        let source = temp_dir.path().join("a.txt");
        fs::write(&source, b"original").unwrap();
        let digest = Digest::hash_bytes(b"original");
        blobs.put(&source, &digest).unwrap();
        assert!(blobs.verify(&digest).unwrap());

        fs::write(blobs.locate(&digest), b"tampered").unwrap();
        assert!(!blobs.verify(&digest).unwrap());
    }

    #[test]
    fn test_owns() {
        let blobs = BlobStore::new("/store/data");
        assert!(blobs.owns(Path::new("/store/data/ab/abcd")));
        assert!(!blobs.owns(Path::new("/store/database")));
        assert!(!blobs.owns(Path::new("/elsewhere/ab/abcd")));
    }
}
