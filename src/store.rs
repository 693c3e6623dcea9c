//! Persistent key-value store shared by the order engine and the sync queue
//!
//! Values are stored as JSON text in a single SQLite table, so several
//! processes sharing the file (the server and the CLI) see each other's
//! writes. A write the database rejects is kept in an in-process overlay
//! instead, so when the database is missing or stops accepting writes the
//! store keeps working for the rest of the session instead of failing.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::StoreError;

/// SQLite-backed durable storage
struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Typed get/set access to durable client-side state.
///
/// The overlay only holds keys whose last write or delete did not reach the
/// backend. `None` marks a key removed during this session.
pub struct Store {
    backend: Option<SqliteBackend>,
    overlay: Mutex<HashMap<String, Option<String>>>,
}

impl Store {
    /// Open the store at `path`, degrading to memory-only if the database
    /// cannot be opened.
    pub fn open(path: &Path) -> Self {
        match SqliteBackend::open(path) {
            Ok(backend) => {
                tracing::debug!(path = %path.display(), "Opened persistent store");
                Self {
                    backend: Some(backend),
                    overlay: Mutex::new(HashMap::new()),
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Persistent store unavailable, keeping state in memory for this session"
                );
                Self::in_memory()
            }
        }
    }

    /// A store with no durable backend
    pub fn in_memory() -> Self {
        Self {
            backend: None,
            overlay: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.backend.is_some()
    }

    /// Read `key`, falling back to `default` when the key is missing, the
    /// backend is unreadable, or the stored JSON does not parse as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let raw = match self.overlay_lookup(key) {
            Some(Some(raw)) => raw,
            Some(None) => return default,
            None => match self.backend.as_ref().map(|b| b.read(key)) {
                Some(Ok(Some(raw))) => raw,
                Some(Ok(None)) | None => return default,
                Some(Err(e)) => {
                    tracing::warn!(key, error = %e, "Store read failed, using default");
                    return default;
                }
            },
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Corrupt store entry, using default");
                default
            }
        }
    }

    /// Write `value` under `key`. Never fails: a backend error only costs
    /// durability.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to serialize store value");
                return;
            }
        };

        let persisted = match &self.backend {
            Some(backend) => match backend.write(key, &raw) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(key, error = %e, "Store write failed, value kept in memory only");
                    false
                }
            },
            None => false,
        };

        self.update_overlay(key, Some(raw), persisted);
    }

    pub fn remove(&self, key: &str) {
        let persisted = match &self.backend {
            Some(backend) => match backend.delete(key) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(key, error = %e, "Store delete failed");
                    false
                }
            },
            None => false,
        };

        self.update_overlay(key, None, persisted);
    }

    // Durable writes drop any stale session value so later reads go to disk
    fn update_overlay(&self, key: &str, value: Option<String>, persisted: bool) {
        let mut overlay = self.overlay.lock().unwrap_or_else(|e| e.into_inner());
        if persisted {
            overlay.remove(key);
        } else {
            overlay.insert(key.to_string(), value);
        }
    }

    fn overlay_lookup(&self, key: &str) -> Option<Option<String>> {
        self.overlay
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    #[cfg(test)]
    fn break_backend(&self) {
        if let Some(backend) = &self.backend {
            let conn = backend.conn.lock().unwrap();
            conn.execute_batch("DROP TABLE kv").unwrap();
        }
    }
}
