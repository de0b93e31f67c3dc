//! `SQLite`-based primary key/value tier.

use crate::storage::kv::KvBackend;
use crate::storage::sqlite::{acquire_lock, configure_connection, record_operation_metrics};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// Durable, transactional key/value tier backed by `SQLite`.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access. `SQLite`'s WAL mode
/// and `busy_timeout` pragma mitigate contention: WAL allows concurrent
/// readers with a single writer, and the busy timeout waits up to 5 seconds
/// for locks instead of failing immediately.
pub struct SqliteKvBackend {
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database file (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteKvBackend {
    /// Opens (or creates) a key/value database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(|e| Error::OperationFailed {
            operation: "open_kv_sqlite".to_string(),
            cause: e.to_string(),
        })?;

        let backend = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };

        backend.initialize()?;
        Ok(backend)
    }

    /// Creates an in-memory backend (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_kv_sqlite_in_memory".to_string(),
            cause: e.to_string(),
        })?;

        let backend = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };

        backend.initialize()?;
        Ok(backend)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        configure_connection(&conn);

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            )",
            [],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "create_kv_table".to_string(),
            cause: e.to_string(),
        })?;

        Ok(())
    }
}

impl KvBackend for SqliteKvBackend {
    #[instrument(skip(self), fields(operation = "get", backend = "sqlite_kv"))]
    fn get(&self, key: &str) -> Result<Option<String>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::OperationFailed {
                operation: "kv_get".to_string(),
                cause: e.to_string(),
            })
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("sqlite_kv", "get", start, status);
        result
    }

    #[instrument(skip(self, value), fields(operation = "set", backend = "sqlite_kv", value.len = value.len()))]
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, unixepoch())
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "kv_set".to_string(),
                cause: e.to_string(),
            })?;

            Ok(())
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("sqlite_kv", "set", start, status);
        result
    }

    #[instrument(skip(self), fields(operation = "remove", backend = "sqlite_kv"))]
    fn remove(&self, key: &str) -> Result<bool> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            let removed = conn
                .execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|e| Error::OperationFailed {
                    operation: "kv_remove".to_string(),
                    cause: e.to_string(),
                })?;

            Ok(removed > 0)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("sqlite_kv", "remove", start, status);
        result
    }

    #[instrument(skip(self), fields(operation = "clear", backend = "sqlite_kv"))]
    fn clear(&self) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            conn.execute("DELETE FROM kv", [])
                .map_err(|e| Error::OperationFailed {
                    operation: "kv_clear".to_string(),
                    cause: e.to_string(),
                })?;

            Ok(())
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("sqlite_kv", "clear", start, status);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let backend = SqliteKvBackend::in_memory().unwrap();

        backend.set("greeting", "hello").unwrap();
        assert_eq!(backend.get("greeting").unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_get_missing() {
        let backend = SqliteKvBackend::in_memory().unwrap();
        assert!(backend.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_set_replaces() {
        let backend = SqliteKvBackend::in_memory().unwrap();

        backend.set("k", "one").unwrap();
        backend.set("k", "two").unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_remove() {
        let backend = SqliteKvBackend::in_memory().unwrap();

        backend.set("k", "v").unwrap();
        assert!(backend.remove("k").unwrap());
        assert!(!backend.remove("k").unwrap());
        assert!(backend.get("k").unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let backend = SqliteKvBackend::in_memory().unwrap();

        backend.set("a", "1").unwrap();
        backend.set("b", "2").unwrap();
        backend.clear().unwrap();
        assert!(backend.get("a").unwrap().is_none());
        assert!(backend.get("b").unwrap().is_none());
    }

    #[test]
    fn test_contains() {
        let backend = SqliteKvBackend::in_memory().unwrap();

        backend.set("k", "v").unwrap();
        assert!(backend.contains("k").unwrap());
        assert!(!backend.contains("other").unwrap());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");

        {
            let backend = SqliteKvBackend::new(&path).unwrap();
            backend.set("k", "survives").unwrap();
        }

        let backend = SqliteKvBackend::new(&path).unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("survives"));
    }
}
