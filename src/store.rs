//! Durable record store over SQLite: image records, watched folders,
//! settings, and the ingestion audit log.
//!
//! The core consumes this through the narrow repository methods below;
//! transaction boundaries are per method (every call is one implicit
//! transaction on the shared connection).

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;
use crate::types::{AuditEntry, ImageRecord, IngestOutcome, RecordStatus, WatchedFolder};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS images (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    path           TEXT NOT NULL UNIQUE,
    thumbnail_path TEXT,
    width          INTEGER,
    height         INTEGER,
    size_bytes     INTEGER NOT NULL DEFAULT 0,
    content_hash   TEXT,
    modified_at    INTEGER,
    indexed_at     INTEGER,
    embedding      BLOB,
    meta           TEXT NOT NULL DEFAULT '{}',
    status         TEXT NOT NULL DEFAULT 'pending',
    favorite       INTEGER NOT NULL DEFAULT 0,
    blurred        INTEGER NOT NULL DEFAULT 0,
    latitude       REAL,
    longitude      REAL
);
CREATE INDEX IF NOT EXISTS idx_images_status ON images(status);

CREATE TABLE IF NOT EXISTS watched_folders (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    path     TEXT NOT NULL UNIQUE,
    active   INTEGER NOT NULL DEFAULT 1,
    added_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    path        TEXT NOT NULL,
    status      TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    message     TEXT,
    at          INTEGER NOT NULL
);
";

// Explicitly ordered to match record_from_row.
const IMAGE_FIELDS: &str = "id, path, thumbnail_path, width, height, size_bytes, content_hash, \
     modified_at, indexed_at, embedding, meta, status, favorite, blurred, latitude, longitude";

fn record_from_row(row: &Row) -> rusqlite::Result<ImageRecord> {
    let meta_text: String = row.get(10)?;
    let status_text: String = row.get(11)?;
    Ok(ImageRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        thumbnail_path: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        size_bytes: row.get::<_, i64>(5)? as u64,
        content_hash: row.get(6)?,
        modified_at: row.get(7)?,
        indexed_at: row.get(8)?,
        embedding: row.get(9)?,
        meta: serde_json::from_str(&meta_text).unwrap_or_else(|_| serde_json::json!({})),
        status: RecordStatus::parse(&status_text),
        favorite: row.get::<_, i64>(12)? != 0,
        blurred: row.get::<_, i64>(13)? != 0,
        latitude: row.get(14)?,
        longitude: row.get(15)?,
    })
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store lock")
    }

    // -----------------------------------------------------------------------
    // Image records
    // -----------------------------------------------------------------------

    pub fn find_by_path(&self, path: &str) -> Result<Option<ImageRecord>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {IMAGE_FIELDS} FROM images WHERE path = ?1"))?;
        Ok(stmt.query_row([path], record_from_row).optional()?)
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<ImageRecord>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {IMAGE_FIELDS} FROM images WHERE id = ?1"))?;
        Ok(stmt.query_row([id], record_from_row).optional()?)
    }

    /// Insert or update; assigns `record.id` on first insert.
    pub fn save(&self, record: &mut ImageRecord) -> Result<()> {
        let conn = self.lock();
        let meta_text = record.meta.to_string();
        if record.id == 0 {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO images (path, thumbnail_path, width, height, size_bytes, \
                 content_hash, modified_at, indexed_at, embedding, meta, status, favorite, \
                 blurred, latitude, longitude) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            stmt.execute(params![
                record.path,
                record.thumbnail_path,
                record.width,
                record.height,
                record.size_bytes as i64,
                record.content_hash,
                record.modified_at,
                record.indexed_at,
                record.embedding,
                meta_text,
                record.status.as_str(),
                record.favorite as i64,
                record.blurred as i64,
                record.latitude,
                record.longitude,
            ])?;
            record.id = conn.last_insert_rowid();
        } else {
            let mut stmt = conn.prepare_cached(
                "UPDATE images SET path = ?2, thumbnail_path = ?3, width = ?4, height = ?5, \
                 size_bytes = ?6, content_hash = ?7, modified_at = ?8, indexed_at = ?9, \
                 embedding = ?10, meta = ?11, status = ?12, favorite = ?13, blurred = ?14, \
                 latitude = ?15, longitude = ?16 WHERE id = ?1",
            )?;
            stmt.execute(params![
                record.id,
                record.path,
                record.thumbnail_path,
                record.width,
                record.height,
                record.size_bytes as i64,
                record.content_hash,
                record.modified_at,
                record.indexed_at,
                record.embedding,
                meta_text,
                record.status.as_str(),
                record.favorite as i64,
                record.blurred as i64,
                record.latitude,
                record.longitude,
            ])?;
        }
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.lock();
        conn.prepare_cached("DELETE FROM images WHERE id = ?1")?.execute([id])?;
        Ok(())
    }

    /// Bulk embedding dump for rebuilding the vector index.
    pub fn find_all_embeddings(&self) -> Result<Vec<(i64, Vec<u8>)>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id, embedding FROM images WHERE embedding IS NOT NULL")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_with_embedding(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn
            .prepare_cached("SELECT COUNT(*) FROM images WHERE embedding IS NOT NULL")?
            .query_row([], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn count_indexed(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn
            .prepare_cached("SELECT COUNT(*) FROM images WHERE status = 'indexed'")?
            .query_row([], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn count_favorites(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn
            .prepare_cached("SELECT COUNT(*) FROM images WHERE favorite != 0")?
            .query_row([], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn find_favorites(&self, limit: usize) -> Result<Vec<ImageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {IMAGE_FIELDS} FROM images WHERE favorite != 0 ORDER BY id LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Substring predicate on the opaque JSON blob.
    pub fn find_by_tag_substring(&self, tag: &str, limit: usize) -> Result<Vec<ImageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {IMAGE_FIELDS} FROM images WHERE meta LIKE '%' || ?1 || '%' LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![tag, limit as i64], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Case-insensitive substring match on file names (not directories),
    /// newest first.
    pub fn find_by_filename_substring(
        &self,
        needle: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ImageRecord>> {
        let lowered = needle.to_lowercase();
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {IMAGE_FIELDS} FROM images WHERE lower(path) LIKE '%' || ?1 || '%' \
             ORDER BY modified_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([&lowered], record_from_row)?;
        let matches: Vec<ImageRecord> = rows
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|rec| {
                Path::new(&rec.path)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_lowercase().contains(&lowered))
                    .unwrap_or(false)
            })
            .collect();
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    pub fn find_by_folder_substring(&self, folder: &str, limit: usize) -> Result<Vec<ImageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {IMAGE_FIELDS} FROM images WHERE path LIKE '%' || ?1 || '%' LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![folder, limit as i64], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Newest-first page of indexed records (browse mode for empty queries).
    pub fn find_recent(&self, limit: usize, offset: usize) -> Result<Vec<ImageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {IMAGE_FIELDS} FROM images WHERE status = 'indexed' \
             ORDER BY modified_at DESC, id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map([limit as i64, offset as i64], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Watched folders
    // -----------------------------------------------------------------------

    /// Idempotent insert: re-adding an inactive folder reactivates it.
    pub fn add_folder(&self, path: &str, added_at: i64) -> Result<WatchedFolder> {
        let conn = self.lock();
        conn.prepare_cached(
            "INSERT INTO watched_folders (path, active, added_at) VALUES (?1, 1, ?2) \
             ON CONFLICT(path) DO UPDATE SET active = 1",
        )?
        .execute(params![path, added_at])?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, path, active, added_at FROM watched_folders WHERE path = ?1",
        )?;
        Ok(stmt.query_row([path], folder_from_row)?)
    }

    pub fn find_folder_by_id(&self, id: i64) -> Result<Option<WatchedFolder>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached("SELECT id, path, active, added_at FROM watched_folders WHERE id = ?1")?;
        Ok(stmt.query_row([id], folder_from_row).optional()?)
    }

    pub fn list_folders(&self, active_only: bool) -> Result<Vec<WatchedFolder>> {
        let conn = self.lock();
        let sql = if active_only {
            "SELECT id, path, active, added_at FROM watched_folders WHERE active != 0 ORDER BY id"
        } else {
            "SELECT id, path, active, added_at FROM watched_folders ORDER BY id"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map([], folder_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Deactivate (never delete) so image records under the folder survive.
    pub fn deactivate_folder(&self, id: i64) -> Result<bool> {
        let conn = self.lock();
        let n = conn
            .prepare_cached("UPDATE watched_folders SET active = 0 WHERE id = ?1")?
            .execute([id])?;
        Ok(n > 0)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT value FROM settings WHERE key = ?1")?;
        Ok(stmt.query_row([key], |row| row.get(0)).optional()?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock();
        conn.prepare_cached(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?
        .execute(params![key, value])?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.lock();
        conn.prepare_cached("DELETE FROM settings WHERE key = ?1")?.execute([key])?;
        Ok(())
    }

    pub fn bool_setting(&self, key: &str, default: bool) -> bool {
        match self.get_setting(key) {
            Ok(Some(v)) => v == "true",
            Ok(None) => default,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read setting");
                default
            }
        }
    }

    pub fn float_setting(&self, key: &str, default: f32) -> f32 {
        match self.get_setting(key) {
            Ok(Some(v)) => v.parse().unwrap_or(default),
            _ => default,
        }
    }

    // -----------------------------------------------------------------------
    // Audit log
    // -----------------------------------------------------------------------

    pub fn append_audit(
        &self,
        path: &str,
        outcome: &IngestOutcome,
        duration_ms: u64,
        at: i64,
    ) -> Result<()> {
        let message = match outcome {
            IngestOutcome::Error(msg) => Some(msg.as_str()),
            _ => None,
        };
        let conn = self.lock();
        conn.prepare_cached(
            "INSERT INTO audit_log (path, status, duration_ms, message, at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![path, outcome.as_str(), duration_ms as i64, message, at])?;
        Ok(())
    }

    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, path, status, duration_ms, message, at FROM audit_log \
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                path: row.get(1)?,
                status: row.get(2)?,
                duration_ms: row.get::<_, i64>(3)? as u64,
                message: row.get(4)?,
                at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn folder_from_row(row: &Row) -> rusqlite::Result<WatchedFolder> {
    Ok(WatchedFolder {
        id: row.get(0)?,
        path: row.get(1)?,
        active: row.get::<_, i64>(2)? != 0,
        added_at: row.get(3)?,
    })
}
