//! SQLite-backed durable state store.
//!
//! A single `kv` table holds every persisted group:
//! - the live session snapshot
//! - the pending decision, when one is outstanding
//! - the daily auto-start schedule
//!
//! Every group operation runs in one transaction, so a crash mid-write leaves
//! the previous complete group in place.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{data_dir, StateStore};
use crate::error::StoreError;

/// SQLite database for session state.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `<data_dir>/quarterlog.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let dir = data_dir().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::open_at(&dir.join("quarterlog.db"))
    }

    /// Open (or create) a database file at `path`.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database. Nothing survives the process.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open the on-disk database, falling back to memory if it is unavailable.
    ///
    /// The session still runs on wall-clock time; only restart survival is lost.
    pub fn open_or_memory() -> Result<Self, StoreError> {
        match Self::open() {
            Ok(db) => Ok(db),
            Err(e) => {
                warn!(error = %e, "durable store unavailable, session state will not survive restart");
                Self::open_memory()
            }
        }
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "PRAGMA synchronous = FULL;

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
    }

    /// Set several values in one transaction.
    pub fn kv_set_many(&mut self, entries: &[(&str, String)]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()
    }

    /// Delete several keys in one transaction.
    pub fn kv_delete_many(&mut self, keys: &[&str]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        tx.commit()
    }

    /// Read then delete several keys in one transaction.
    pub fn kv_take_many(&mut self, keys: &[&str]) -> Result<Vec<Option<String>>, rusqlite::Error> {
        let tx = self.conn.transaction()?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = tx
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?;
            values.push(value);
        }
        for key in keys {
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(values)
    }
}

impl StateStore for Database {
    fn put(&mut self, group: &str, entries: &[(&str, String)]) -> Result<(), StoreError> {
        self.kv_set_many(entries).map_err(|e| StoreError::WriteFailed {
            group: group.to_string(),
            message: e.to_string(),
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.kv_get(key).map_err(|e| StoreError::ReadFailed {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn delete(&mut self, group: &str, keys: &[&str]) -> Result<(), StoreError> {
        self.kv_delete_many(keys).map_err(|e| StoreError::WriteFailed {
            group: group.to_string(),
            message: e.to_string(),
        })
    }

    fn take(&mut self, group: &str, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        self.kv_take_many(keys).map_err(|e| StoreError::WriteFailed {
            group: group.to_string(),
            message: e.to_string(),
        })
    }
}
