//! Catalog database schema and row operations.
//!
//! The catalog records every logical `(root, path)` occurrence that ever
//! pointed at a digest. Rows are never removed, only soft-deleted. Each call
//! commits on its own, so an interrupted batch leaves exactly the rows that
//! were written before the interruption.

use std::path::{Path, PathBuf};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::digest::Digest;
use crate::error::Result;
use crate::paths;

/// Default catalog file name inside the store directory.
pub const CATALOG_FILE: &str = ".shadup.db";

impl ToSql for Digest {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_hex()))
    }
}

impl FromSql for Digest {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Digest::from_hex(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Where a file lived when it was catalogued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Absolute root the operation was invoked on.
    pub root: String,
    /// The root relative to the invoking working directory.
    pub root_rel: String,
    /// Directory under `root`, empty for top-level files.
    pub directory: String,
    pub filename: String,
}

impl Location {
    /// The normalized join of `root_rel`, `directory` and `filename`.
    pub fn logical_path(&self) -> String {
        paths::logical_path(&self.root_rel, &self.directory, &self.filename)
    }

    /// Absolute filesystem path of the file.
    pub fn absolute_path(&self) -> PathBuf {
        Path::new(&self.root)
            .join(&self.directory)
            .join(&self.filename)
    }
}

/// A row in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogRow {
    pub id: i64,
    pub digest: Digest,
    #[serde(flatten)]
    pub location: Location,
    pub logical_path: String,
    pub deleted: bool,
}

impl CatalogRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            digest: row.get(1)?,
            location: Location {
                root: row.get(2)?,
                root_rel: row.get(3)?,
                directory: row.get(4)?,
                filename: row.get(5)?,
            },
            logical_path: row.get(6)?,
            deleted: row.get(7)?,
        })
    }
}

const ROW_COLUMNS: &str =
    "id, digest, root, root_rel, directory, filename, logical_path, deleted";

/// Create the catalog database schema.
pub fn create_catalog_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS stored_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            digest TEXT NOT NULL,
            root TEXT NOT NULL,
            root_rel TEXT NOT NULL,
            directory TEXT NOT NULL,
            filename TEXT NOT NULL,
            logical_path TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_stored_files_unique
            ON stored_files(digest, root_rel, directory, filename);
        CREATE INDEX IF NOT EXISTS idx_stored_files_digest ON stored_files(digest);
        CREATE INDEX IF NOT EXISTS idx_stored_files_directory ON stored_files(directory);
        CREATE INDEX IF NOT EXISTS idx_stored_files_logical ON stored_files(logical_path);
        "#,
    )
}

/// Persistent table of logical-path to digest associations.
#[derive(Debug)]
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open (creating if needed) the catalog at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        create_catalog_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open a throwaway catalog held in memory.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_catalog_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Record `(digest, location)` as live.
    ///
    /// This is deliberately two statements: the insert is ignored when the
    /// unique key already exists, and the update then clears `deleted` so a
    /// previously soft-deleted row is reactivated.
    pub fn upsert_active(&self, digest: &Digest, location: &Location) -> Result<()> {
        let logical = location.logical_path();
        self.conn
            .prepare_cached(
                r#"INSERT OR IGNORE INTO stored_files
                    (digest, root, root_rel, directory, filename, logical_path, deleted)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)"#,
            )?
            .execute(params![
                digest,
                location.root,
                location.root_rel,
                location.directory,
                location.filename,
                logical,
            ])?;
        self.conn
            .prepare_cached(
                r#"UPDATE stored_files SET deleted = 0
                    WHERE digest = ?1 AND root_rel = ?2 AND directory = ?3 AND filename = ?4"#,
            )?
            .execute(params![
                digest,
                location.root_rel,
                location.directory,
                location.filename,
            ])?;
        Ok(())
    }

    /// All rows in insertion order, live only unless `include_deleted`.
    pub fn rows(&self, include_deleted: bool) -> Result<Vec<CatalogRow>> {
        let sql = if include_deleted {
            format!("SELECT {ROW_COLUMNS} FROM stored_files ORDER BY id")
        } else {
            format!("SELECT {ROW_COLUMNS} FROM stored_files WHERE deleted = 0 ORDER BY id")
        };
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map([], CatalogRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Rows recorded for one digest.
    pub fn rows_for_digest(&self, digest: &Digest, include_deleted: bool) -> Result<Vec<CatalogRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ROW_COLUMNS} FROM stored_files
                WHERE digest = ?1 AND (?2 OR deleted = 0) ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![digest, include_deleted], CatalogRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Soft-delete rows by id. Returns how many rows went from live to
    /// deleted.
    pub fn soft_delete_ids(&self, ids: &[i64]) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE stored_files SET deleted = 1 WHERE id = ?1 AND deleted = 0")?;
        let mut changed = 0;
        for id in ids {
            changed += stmt.execute(params![id])?;
        }
        Ok(changed)
    }

    /// Soft-delete every row for the given digests, across all paths.
    /// Returns how many rows went from live to deleted.
    pub fn soft_delete_digests(&self, digests: &[Digest]) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE stored_files SET deleted = 1 WHERE digest = ?1 AND deleted = 0",
        )?;
        let mut changed = 0;
        for digest in digests {
            changed += stmt.execute(params![digest])?;
        }
        Ok(changed)
    }

    /// The most recently recorded live digest at a logical path.
    pub fn latest_active_digest(&self, logical_path: &str) -> Result<Option<Digest>> {
        let digest = self
            .conn
            .prepare_cached(
                r#"SELECT digest FROM stored_files
                    WHERE logical_path = ?1 AND deleted = 0
                    ORDER BY id DESC LIMIT 1"#,
            )?
            .query_row(params![logical_path], |row| row.get(0))
            .optional()?;
        Ok(digest)
    }

    /// Soft-delete live rows at a logical path whose digest is not `keep`.
    pub fn retire_other_digests(&self, logical_path: &str, keep: &Digest) -> Result<usize> {
        let changed = self
            .conn
            .prepare_cached(
                r#"UPDATE stored_files SET deleted = 1
                    WHERE logical_path = ?1 AND digest <> ?2 AND deleted = 0"#,
            )?
            .execute(params![logical_path, keep])?;
        Ok(changed)
    }

    /// Number of live rows for `digest` at any logical path other than
    /// `logical_path`.
    pub fn active_count_excluding(&self, digest: &Digest, logical_path: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .prepare_cached(
                r#"SELECT COUNT(*) FROM stored_files
                    WHERE digest = ?1 AND deleted = 0 AND logical_path <> ?2"#,
            )?
            .query_row(params![digest, logical_path], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of rows, live only unless `include_deleted`.
    pub fn count(&self, include_deleted: bool) -> Result<usize> {
        let count: i64 = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM stored_files WHERE (?1 OR deleted = 0)")?
            .query_row(params![include_deleted], |row| row.get(0))?;
        Ok(count as usize)
    }
}
