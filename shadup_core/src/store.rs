//! Store management: configuration, options and the `Store` handle that every
//! operation hangs off.

use crate::blobs::BlobStore;
use crate::catalog::{CATALOG_FILE, Catalog, Location};
use crate::error::{Error, Result};
use crate::paths;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Blob directory name inside the store root.
pub const DATA_DIR: &str = "data";

/// Upper bound on hashing workers.
pub const MAX_WORKERS: usize = 32;

/// Where the store lives and the context it is being used from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Store directory. Blobs live under `<root>/data`.
    pub root: PathBuf,
    /// Catalog file. `None` means `<root>/.shadup.db`.
    pub catalog: Option<PathBuf>,
    /// Absolute working directory the operation was invoked from. Logical
    /// paths are recorded relative to it.
    pub cwd: PathBuf,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            catalog: None,
            cwd: cwd.into(),
        }
    }

    /// Use a catalog file outside the store directory.
    pub fn with_catalog(mut self, catalog: impl Into<PathBuf>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }
}

/// Verification strictness for link repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Paranoia {
    /// No extra checks.
    #[default]
    Off,
    /// The canonical blob must exist.
    Exists,
    /// The canonical blob must exist and rehash to its digest.
    Verify,
}

impl Paranoia {
    /// Parse a numeric level (0, 1 or 2).
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Paranoia::Off),
            1 => Ok(Paranoia::Exists),
            2 => Ok(Paranoia::Verify),
            _ => Err(Error::invalid_argument(format!(
                "paranoia must be 0, 1, or 2 (got {})",
                level
            ))),
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Paranoia::Off => 0,
            Paranoia::Exists => 1,
            Paranoia::Verify => 2,
        }
    }
}

/// Per-operation behaviour switches. Each operation reads only the fields
/// that apply to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Skip files and directories whose name starts with `.`.
    pub skip_dotfiles: bool,
    /// Descend into child paths for list, delete and fixlinks.
    pub recursive: bool,
    /// Include soft-deleted catalog rows.
    pub include_deleted: bool,
    /// Minimum duplicate count for listing filters.
    pub min_duplicates: usize,
    /// Link repair verification level.
    pub paranoia: Paranoia,
    /// Hashing worker override.
    pub workers: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            skip_dotfiles: true,
            recursive: false,
            include_deleted: false,
            min_duplicates: 1,
            paranoia: Paranoia::Off,
            workers: None,
        }
    }
}

impl Options {
    /// Reject out-of-range values before anything is touched.
    pub fn validate(&self) -> Result<()> {
        if self.min_duplicates < 1 {
            return Err(Error::invalid_argument("minimum duplicate count must be >= 1"));
        }
        if self.workers == Some(0) {
            return Err(Error::invalid_argument("worker count must be >= 1"));
        }
        Ok(())
    }

    /// Size of the hashing pool: CPU count plus a few extra threads for
    /// I/O stalls, capped at [`MAX_WORKERS`].
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| (num_cpus::get() + 4).min(MAX_WORKERS))
    }
}

/// An open store: the blob directory, the catalog, and the working
/// directory logical paths are relative to.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    cwd: PathBuf,
    blobs: BlobStore,
    catalog: Catalog,
}

impl Store {
    /// Open the store described by `config`, creating its directories and
    /// catalog if they do not exist yet.
    ///
    /// Fails if the working directory is relative or lies inside the store.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if !config.cwd.is_absolute() {
            return Err(Error::invalid_argument(format!(
                "working directory must be absolute: {}",
                config.cwd.display()
            )));
        }
        let cwd = paths::normalize(&config.cwd);

        let root = paths::absolutize(&config.root, &cwd);
        if root.exists() && !root.is_dir() {
            return Err(Error::invalid_store(&root, "not a directory"));
        }
        fs::create_dir_all(&root)?;
        let root = fs::canonicalize(&root)?;

        let real_cwd = fs::canonicalize(&cwd).unwrap_or_else(|_| cwd.clone());
        if paths::is_within(&cwd, &root) || paths::is_within(&real_cwd, &root) {
            return Err(Error::invalid_store(
                &root,
                format!("working directory {} is inside the store", cwd.display()),
            ));
        }

        let data_dir = root.join(DATA_DIR);
        fs::create_dir_all(&data_dir)?;

        let catalog_path = match &config.catalog {
            Some(path) => paths::absolutize(path, &cwd),
            None => root.join(CATALOG_FILE),
        };
        debug!(catalog = %catalog_path.display(), "opening catalog");
        let catalog = Catalog::open(&catalog_path)?;

        Ok(Self {
            root,
            cwd,
            blobs: BlobStore::new(data_dir),
            catalog,
        })
    }

    /// Get the (canonical) root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the working directory logical paths are relative to.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the blob store.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Get the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve a user-supplied path against the working directory.
    pub(crate) fn resolve(&self, path: &Path) -> PathBuf {
        paths::absolutize(path, &self.cwd)
    }

    /// Catalog location of `file` found under the absolute directory `base`.
    ///
    /// Returns `None` when any component is not valid UTF-8.
    pub(crate) fn location_for(&self, base: &Path, file: &Path) -> Option<Location> {
        let parent = file.parent()?;
        let directory = paths::relative_to(parent, base);
        let directory = if directory == Path::new(".") {
            String::new()
        } else {
            directory.to_str()?.to_string()
        };

        Some(Location {
            root: base.to_str()?.to_string(),
            root_rel: paths::relative_to(base, &self.cwd).to_str()?.to_string(),
            directory,
            filename: file.file_name()?.to_str()?.to_string(),
        })
    }
}

/// What a command root turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RootKind {
    /// A directory, or a symlink to one.
    Dir,
    /// A regular file.
    File,
    /// Anything else, including links to files.
    Other,
}

/// Classify an absolute root. A symlink to a directory is walked like the
/// directory; any other symlink is left alone.
pub(crate) fn root_kind(abs_root: &Path) -> Result<RootKind> {
    let metadata = match fs::symlink_metadata(abs_root) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::root_not_found(abs_root));
        }
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        return Ok(RootKind::Dir);
    }
    if metadata.is_file() {
        return Ok(RootKind::File);
    }
    if metadata.file_type().is_symlink() && fs::metadata(abs_root).is_ok_and(|m| m.is_dir()) {
        debug!(root = %abs_root.display(), "following symlinked root directory");
        return Ok(RootKind::Dir);
    }
    Ok(RootKind::Other)
}

/// The directory a root's files are catalogued under: the root itself for a
/// directory, its parent for a single file or link.
pub(crate) fn base_dir(abs_root: &Path, root_is_dir: bool) -> PathBuf {
    if root_is_dir {
        abs_root.to_path_buf()
    } else {
        abs_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| abs_root.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_open_creates_layout() {
        let temp_dir = TempDir::new().unwrap();
        let work = temp_dir.path().join("work");
        fs::create_dir(&work).unwrap();

        let config = StoreConfig::new(temp_dir.path().join("store"), &work);
        let store = Store::open(&config).unwrap();

        assert!(store.root().join(DATA_DIR).is_dir());
        assert!(store.root().join(CATALOG_FILE).is_file());
        assert!(store.blobs().root().starts_with(store.root()));
    }

    #[test]
    fn test_store_open_with_custom_catalog() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::new("store", temp_dir.path()).with_catalog("db/catalog.db");
        let store = Store::open(&config).unwrap();

        assert!(temp_dir.path().join("db/catalog.db").is_file());
        assert!(!store.root().join(CATALOG_FILE).exists());
    }

    #[test]
    fn test_store_open_rejects_cwd_inside_store() {
        let temp_dir = TempDir::new().unwrap();
        let store_dir = temp_dir.path().join("store");
        let inside = store_dir.join("sub");
        fs::create_dir_all(&inside).unwrap();

        let err = Store::open(&StoreConfig::new(&store_dir, &inside)).unwrap_err();
        assert!(matches!(err, Error::InvalidStore { .. }));
    }

    #[test]
    fn test_store_open_rejects_file_root() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        let err = Store::open(&StoreConfig::new(&file, temp_dir.path())).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_store_open_rejects_relative_cwd() {
        let err = Store::open(&StoreConfig::new("/tmp/store", "relative")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_location_for() {
        let temp_dir = TempDir::new().unwrap();
        let cwd = fs::canonicalize(temp_dir.path()).unwrap();
        let store = Store::open(&StoreConfig::new(cwd.join("store"), &cwd)).unwrap();

        let base = cwd.join("music");
        let loc = store.location_for(&base, &base.join("x/y/a.flac")).unwrap();
        assert_eq!(loc.root, base.to_str().unwrap());
        assert_eq!(loc.root_rel, "music");
        assert_eq!(loc.directory, "x/y");
        assert_eq!(loc.filename, "a.flac");
        assert_eq!(loc.logical_path(), "music/x/y/a.flac");

        let top = store.location_for(&base, &base.join("b.flac")).unwrap();
        assert_eq!(top.directory, "");
    }

    #[test]
    fn test_paranoia_levels() {
        assert_eq!(Paranoia::from_level(0).unwrap(), Paranoia::Off);
        assert_eq!(Paranoia::from_level(2).unwrap(), Paranoia::Verify);
        assert!(Paranoia::from_level(3).is_err());
        assert!(Paranoia::Verify > Paranoia::Exists);
        assert_eq!(Paranoia::Exists.level(), 1);
    }

    #[test]
    fn test_options_validate() {
        assert!(Options::default().validate().is_ok());
        let bad = Options {
            min_duplicates: 0,
            ..Options::default()
        };
        assert!(bad.validate().is_err());
        let bad_workers = Options {
            workers: Some(0),
            ..Options::default()
        };
        assert!(bad_workers.validate().is_err());
    }

    #[test]
    fn test_worker_count_bounds() {
        let count = Options::default().worker_count();
        assert!(count >= 1 && count <= MAX_WORKERS);
        let fixed = Options {
            workers: Some(3),
            ..Options::default()
        };
        assert_eq!(fixed.worker_count(), 3);
    }
}
