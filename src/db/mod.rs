mod schema;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

use crate::models::{from_micros, now_micros, to_micros, Record};

const STORE_FILE: &str = "store.db";

/// Storage errors surfaced to the HTTP layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The node has been stopped; it keeps its data but refuses to serve it.
    #[error("storage is not accessible")]
    Unavailable,

    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Embedded transactional key-value store backed by SQLite.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    accessible: Arc<AtomicBool>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_dir()?.join(STORE_FILE))
    }

    /// Open the store kept under `dir`.
    pub fn open_dir(dir: &Path) -> Result<Self> {
        Self::open(dir.join(STORE_FILE))
    }

    /// Platform data directory for stores.
    pub fn default_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "kv-cluster")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            accessible: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    pub fn is_accessible(&self) -> bool {
        self.accessible.load(Ordering::SeqCst)
    }

    pub fn set_accessible(&self, accessible: bool) {
        self.accessible.store(accessible, Ordering::SeqCst);
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        if !self.is_accessible() {
            return Err(StoreError::Unavailable);
        }
        Ok(self.conn.lock().expect("database lock poisoned"))
    }

    // ============================================================
    // Reads
    // ============================================================

    /// Live value for `key`. Tombstones read as missing.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get_record(key)?.and_then(Record::into_value))
    }

    /// Stored record for `key`, tombstones included.
    pub fn get_record(&self, key: &[u8]) -> Result<Option<Record>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT value, updated_at, deleted FROM entities WHERE key = ?",
                [key],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)? != 0,
                    ))
                },
            )
            .optional()?;

        row.map(|(value, micros, deleted)| decode_record(value, micros, deleted))
            .transpose()
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    // ============================================================
    // Writes
    // ============================================================

    /// Store `value` under `key`, stamped with the current time.
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<Record, StoreError> {
        let record = Record::live(value.to_vec(), now_micros());
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO entities (key, value, updated_at, deleted) VALUES (?, ?, ?, 0)",
            (key, &record.value, to_micros(record.timestamp)),
        )?;
        Ok(record)
    }

    /// Replace whatever is stored under `key` with a tombstone.
    /// Returns whether a live value was present.
    pub fn remove(&self, key: &[u8]) -> Result<bool, StoreError> {
        let existed = self.get(key)?.is_some();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO entities (key, value, updated_at, deleted) VALUES (?, X'', ?, 1)",
            (key, to_micros(now_micros())),
        )?;
        Ok(existed)
    }

    /// Apply a record produced by a coordinator. Records that do not supersede
    /// the stored one (see [`Record::supersedes`]) are ignored. Returns whether
    /// the record was applied.
    pub fn upsert_record(&self, key: &[u8], record: &Record) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "INSERT INTO entities (key, value, updated_at, deleted) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at,
                deleted = excluded.deleted
             WHERE excluded.updated_at > entities.updated_at
                OR (excluded.updated_at = entities.updated_at AND excluded.deleted > entities.deleted)
                OR (excluded.updated_at = entities.updated_at AND excluded.deleted = entities.deleted
                    AND excluded.value > entities.value)",
            (
                key,
                &record.value,
                to_micros(record.timestamp),
                record.deleted as i64,
            ),
        )?;
        Ok(rows > 0)
    }

    /// Drop tombstones written before `older_than`. Returns how many went.
    pub fn purge_tombstones(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM entities WHERE deleted = 1 AND updated_at < ?",
            [to_micros(older_than)],
        )?;
        if rows > 0 {
            tracing::info!("Purged {} tombstones", rows);
        }
        Ok(rows)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            accessible: self.accessible.clone(),
        }
    }
}

fn decode_record(value: Vec<u8>, micros: i64, deleted: bool) -> Result<Record, StoreError> {
    let timestamp = from_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", micros)))?;
    Ok(if deleted {
        Record::tombstone(timestamp)
    } else {
        Record::live(value, timestamp)
    })
}
