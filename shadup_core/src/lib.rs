//! # Shadup Core
//!
//! A content-addressed deduplicating file store using SHA-256 hashing.
//!
//! Ingesting a tree moves every regular file into a sharded blob directory,
//! keeping exactly one copy of each distinct content, and leaves an absolute
//! symlink to the blob at the original path. A SQLite catalog remembers
//! every logical path that ever pointed at each digest, so files can be
//! listed, soft-deleted, repaired or materialized back.
//!
//! ## Features
//!
//! - One blob per digest under `<store>/data/<xx>/<digest>`
//! - Idempotent ingestion with parallel hashing
//! - Extraction by logical path prefix, newest row first
//! - Listing by path or by digest, with duplicate filters
//! - Soft deletion that never touches files on disk
//! - Symlink repair with optional blob verification
//!
//! ## Example
//!
//! ```no_run
//! use shadup_core::{Options, Store, StoreConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cwd = std::env::current_dir()?;
//! let store = Store::open(&StoreConfig::new("/srv/shadup", &cwd))?;
//! let options = Options::default();
//!
//! // Replace files under ./photos with links into the store
//! let stats = store.ingest(Path::new("photos"), &options)?;
//! println!("stored {} files", stats.files);
//!
//! // Turn the links back into real files
//! store.extract(&["photos"], &options)?;
//! # Ok(())
//! # }
//! ```

mod blobs;
mod catalog;
mod dedup;
mod digest;
mod error;
mod extract;
mod ingest;
mod maintenance;
mod paths;
mod query;
mod store;
mod walk;

pub use blobs::{BlobStore, PutOutcome};
pub use catalog::{CATALOG_FILE, Catalog, CatalogRow, Location};
pub use dedup::{DEDUP_DIR, DedupStats};
pub use digest::{DIGEST_HEX_LEN, DIGEST_SIZE, Digest, FileDigest, file_digest, is_digest_str};
pub use error::{Error, Result};
pub use extract::ExtractStats;
pub use ingest::IngestStats;
pub use maintenance::{DeleteStats, FixStats};
pub use paths::Prefix;
pub use query::{DigestGroup, GroupMember, PathEntry};
pub use store::{DATA_DIR, MAX_WORKERS, Options, Paranoia, Store, StoreConfig};
