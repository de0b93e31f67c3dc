//! Schema-versioned diary entry store.
//!
//! Diary entries live in their own `SQLite` database with an explicit
//! migration path (see [`DIARY_MIGRATIONS`]) and secondary indexes on every
//! field the listing and search paths filter on. The excerpt and word count
//! are computed once at write time so list queries never touch the payload.

use crate::models::{DiaryEntry, DiaryId, DiaryKind, excerpt_from_payload, word_count_of};
use crate::storage::migrations::{Migration, MigrationRunner};
use crate::storage::sqlite::{acquire_lock, configure_connection, record_operation_metrics};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::instrument;

/// Migration list for the diary schema.
///
/// Version 2 adds the `kind` and `is_pinned` fields with constant defaults,
/// so every pre-existing row gains them in the same transaction.
pub const DIARY_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial diaries table and indexes",
        sql: "CREATE TABLE IF NOT EXISTS diaries (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                mood TEXT,
                word_count INTEGER NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '',
                excerpt TEXT NOT NULL DEFAULT '',
                is_deleted INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_diaries_date ON diaries(date);
            CREATE INDEX IF NOT EXISTS idx_diaries_created_at ON diaries(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_diaries_mood ON diaries(mood);
            CREATE INDEX IF NOT EXISTS idx_diaries_word_count ON diaries(word_count);
            CREATE INDEX IF NOT EXISTS idx_diaries_is_deleted ON diaries(is_deleted);
            CREATE INDEX IF NOT EXISTS idx_diaries_date_created ON diaries(date, created_at DESC);",
    },
    Migration {
        version: 2,
        description: "add kind and is_pinned",
        sql: "ALTER TABLE diaries ADD COLUMN kind TEXT NOT NULL DEFAULT 'auto';
            ALTER TABLE diaries ADD COLUMN is_pinned INTEGER NOT NULL DEFAULT 0;
            CREATE INDEX IF NOT EXISTS idx_diaries_kind ON diaries(kind);
            CREATE INDEX IF NOT EXISTS idx_diaries_is_pinned ON diaries(is_pinned);",
    },
];

/// Filters and pagination for diary listings.
#[derive(Debug, Clone, Default)]
pub struct DiaryQuery {
    /// Inclusive lower bound on the calendar day.
    pub from_date: Option<String>,
    /// Inclusive upper bound on the calendar day.
    pub to_date: Option<String>,
    /// Exact mood filter.
    pub mood: Option<String>,
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows to return (None for unbounded).
    pub limit: Option<usize>,
}

impl DiaryQuery {
    /// Creates an unfiltered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inclusive date range.
    #[must_use]
    pub fn with_date_range(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_date = Some(from.into());
        self.to_date = Some(to.into());
        self
    }

    /// Sets the mood filter.
    #[must_use]
    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    /// Sets offset/limit pagination.
    #[must_use]
    pub const fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Row shape shared by every diary query.
struct DiaryRow {
    id: String,
    date: String,
    title: String,
    payload: String,
    created_at: i64,
    updated_at: i64,
    mood: Option<String>,
    word_count: i64,
    tags: String,
    excerpt: String,
    is_deleted: bool,
    kind: String,
    is_pinned: bool,
}

const DIARY_COLUMNS: &str = "id, date, title, payload, created_at, updated_at, mood, \
                             word_count, tags, excerpt, is_deleted, kind, is_pinned";

fn row_to_diary_row(row: &Row<'_>) -> rusqlite::Result<DiaryRow> {
    Ok(DiaryRow {
        id: row.get(0)?,
        date: row.get(1)?,
        title: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        mood: row.get(6)?,
        word_count: row.get(7)?,
        tags: row.get(8)?,
        excerpt: row.get(9)?,
        is_deleted: row.get(10)?,
        kind: row.get(11)?,
        is_pinned: row.get(12)?,
    })
}

fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn build_entry_from_row(row: DiaryRow) -> DiaryEntry {
    let payload = serde_json::from_str(&row.payload).unwrap_or(serde_json::Value::Null);
    let tags = serde_json::from_str(&row.tags).unwrap_or_default();

    DiaryEntry {
        id: DiaryId::new(row.id),
        date: row.date,
        title: row.title,
        payload,
        created_at: timestamp_from_millis(row.created_at),
        updated_at: timestamp_from_millis(row.updated_at),
        mood: row.mood,
        word_count: u32::try_from(row.word_count).unwrap_or(0),
        kind: DiaryKind::parse(&row.kind),
        tags,
        excerpt: row.excerpt,
        is_deleted: row.is_deleted,
        is_pinned: row.is_pinned,
    }
}

/// `SQLite`-backed store for diary entries.
///
/// # Degradation
///
/// If a listing or search query fails (e.g., a corrupted index), the store
/// returns an empty result set instead of raising, and lazily reopens the
/// database — rerunning migrations — on the next access.
pub struct DiaryStore {
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
    /// Set when a failed query scheduled a lazy reinitialization.
    needs_reinit: AtomicBool,
}

impl DiaryStore {
    /// Opens (or creates) a diary database at `db_path`, applying pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or a pending
    /// migration fails; a failed migration leaves the database at the prior
    /// version and is retried on the next open.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Self::open_connection(Some(&db_path))?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
            needs_reinit: AtomicBool::new(false),
        })
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Self::open_connection(None)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
            needs_reinit: AtomicBool::new(false),
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Returns the applied schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version table cannot be queried.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = acquire_lock(&self.conn);
        MigrationRunner::new("diaries").current_version(&conn)
    }

    fn open_connection(db_path: Option<&PathBuf>) -> Result<Connection> {
        let mut conn = match db_path {
            Some(path) => Connection::open(path).map_err(|e| Error::OperationFailed {
                operation: "open_diary_db".to_string(),
                cause: e.to_string(),
            })?,
            None => Connection::open_in_memory().map_err(|e| Error::OperationFailed {
                operation: "open_diary_db_in_memory".to_string(),
                cause: e.to_string(),
            })?,
        };

        configure_connection(&conn);
        MigrationRunner::new("diaries").run(&mut conn, DIARY_MIGRATIONS)?;

        Ok(conn)
    }

    /// Performs the lazy reinitialization scheduled by a failed query.
    fn ensure_healthy(&self) {
        if !self.needs_reinit.swap(false, Ordering::SeqCst) {
            return;
        }

        tracing::warn!("Reinitializing diary store after a failed query");
        match Self::open_connection(self.db_path.as_ref()) {
            Ok(fresh) => {
                let mut conn = acquire_lock(&self.conn);
                *conn = fresh;
            },
            Err(e) => {
                // Keep the flag set so the next access retries
                tracing::error!(error = %e, "Diary store reinitialization failed");
                self.needs_reinit.store(true, Ordering::SeqCst);
            },
        }
    }

    fn schedule_reinit(&self) {
        self.needs_reinit.store(true, Ordering::SeqCst);
        metrics::counter!("diary_store_reinit_scheduled_total").increment(1);
    }

    /// Validates and persists an entry, computing its derived fields.
    ///
    /// The excerpt and word count are always recomputed from the payload
    /// here, at write time, regardless of what the caller supplied.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a missing id or malformed calendar date,
    /// or `OperationFailed` if the upsert transaction fails.
    #[instrument(skip(self, entry), fields(operation = "save", backend = "diary", diary.id = %entry.id))]
    pub fn save(&self, entry: &DiaryEntry) -> Result<DiaryEntry> {
        self.ensure_healthy();
        let start = Instant::now();
        let result = (|| {
            if entry.id.is_empty() {
                return Err(Error::InvalidInput("diary entry is missing an id".to_string()));
            }
            if NaiveDate::parse_from_str(&entry.date, "%Y-%m-%d").is_err() {
                return Err(Error::InvalidInput(format!(
                    "'{}' is not an ISO calendar date",
                    entry.date
                )));
            }

            let mut stored = entry.clone();
            stored.excerpt = excerpt_from_payload(&stored.payload);
            stored.word_count = word_count_of(&stored.payload);

            let payload_json =
                serde_json::to_string(&stored.payload).map_err(|e| Error::OperationFailed {
                    operation: "serialize_diary_payload".to_string(),
                    cause: e.to_string(),
                })?;
            // JSON keeps tags containing commas intact
            let tags_json =
                serde_json::to_string(&stored.tags).map_err(|e| Error::OperationFailed {
                    operation: "serialize_diary_tags".to_string(),
                    cause: e.to_string(),
                })?;

            let conn = acquire_lock(&self.conn);

            conn.execute("BEGIN IMMEDIATE", [])
                .map_err(|e| Error::OperationFailed {
                    operation: "begin_transaction".to_string(),
                    cause: e.to_string(),
                })?;

            let upsert = conn.execute(
                "INSERT OR REPLACE INTO diaries
                     (id, date, title, payload, created_at, updated_at, mood, word_count,
                      tags, excerpt, is_deleted, kind, is_pinned)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    stored.id.as_str(),
                    stored.date,
                    stored.title,
                    payload_json,
                    stored.created_at.timestamp_millis(),
                    stored.updated_at.timestamp_millis(),
                    stored.mood,
                    i64::from(stored.word_count),
                    tags_json,
                    stored.excerpt,
                    stored.is_deleted,
                    stored.kind.as_str(),
                    stored.is_pinned,
                ],
            );

            match upsert {
                Ok(_) => {
                    conn.execute("COMMIT", [])
                        .map_err(|e| Error::OperationFailed {
                            operation: "commit_transaction".to_string(),
                            cause: e.to_string(),
                        })?;
                    Ok(stored)
                },
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(Error::OperationFailed {
                        operation: "upsert_diary".to_string(),
                        cause: e.to_string(),
                    })
                },
            }
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("diary", "save", start, status);
        result
    }

    /// Point lookup by primary key.
    ///
    /// Soft-deleted entries are still returned here; only listing and search
    /// exclude them.
    #[instrument(skip(self), fields(operation = "get", backend = "diary", diary.id = %id))]
    pub fn get(&self, id: &DiaryId) -> Result<Option<DiaryEntry>> {
        self.ensure_healthy();
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            let row = conn
                .query_row(
                    &format!("SELECT {DIARY_COLUMNS} FROM diaries WHERE id = ?1"),
                    params![id.as_str()],
                    row_to_diary_row,
                )
                .optional()
                .map_err(|e| Error::OperationFailed {
                    operation: "get_diary".to_string(),
                    cause: e.to_string(),
                })?;

            Ok(row.map(build_entry_from_row))
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("diary", "get", start, status);
        result
    }

    /// Returns the most recently created non-deleted entry for a calendar day.
    #[instrument(skip(self), fields(operation = "get_by_date", backend = "diary"))]
    pub fn get_by_date(&self, date: &str) -> Result<Option<DiaryEntry>> {
        self.ensure_healthy();
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            // Served by the compound (date, created_at) index
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {DIARY_COLUMNS} FROM diaries
                         WHERE date = ?1 AND is_deleted = 0
                         ORDER BY created_at DESC
                         LIMIT 1"
                    ),
                    params![date],
                    row_to_diary_row,
                )
                .optional()
                .map_err(|e| Error::OperationFailed {
                    operation: "get_diary_by_date".to_string(),
                    cause: e.to_string(),
                })?;

            Ok(row.map(build_entry_from_row))
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("diary", "get_by_date", start, status);
        result
    }

    /// Lists non-deleted entries, pinned first, then newest first.
    ///
    /// A failed query degrades to an empty list and schedules a lazy
    /// reinitialization instead of surfacing the error.
    #[instrument(skip(self, query), fields(operation = "list", backend = "diary"))]
    pub fn list(&self, query: &DiaryQuery) -> Vec<DiaryEntry> {
        self.ensure_healthy();
        let start = Instant::now();
        let result = self.try_list(query);

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("diary", "list", start, status);

        result.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Diary listing failed, degrading to empty result");
            self.schedule_reinit();
            Vec::new()
        })
    }

    fn try_list(&self, query: &DiaryQuery) -> Result<Vec<DiaryEntry>> {
        let conn = acquire_lock(&self.conn);

        let mut sql = format!("SELECT {DIARY_COLUMNS} FROM diaries WHERE is_deleted = 0");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(from) = &query.from_date {
            args.push(Box::new(from.clone()));
            sql.push_str(&format!(" AND date >= ?{}", args.len()));
        }
        if let Some(to) = &query.to_date {
            args.push(Box::new(to.clone()));
            sql.push_str(&format!(" AND date <= ?{}", args.len()));
        }
        if let Some(mood) = &query.mood {
            args.push(Box::new(mood.clone()));
            sql.push_str(&format!(" AND mood = ?{}", args.len()));
        }

        // Pinned entries first, then recency, id as deterministic tiebreak
        sql.push_str(" ORDER BY is_pinned DESC, created_at DESC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", query.offset));
        } else if query.offset > 0 {
            sql.push_str(&format!(" LIMIT -1 OFFSET {}", query.offset));
        }

        let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
            operation: "prepare_list_diaries".to_string(),
            cause: e.to_string(),
        })?;

        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(AsRef::as_ref)),
                row_to_diary_row,
            )
            .map_err(|e| Error::OperationFailed {
                operation: "list_diaries".to_string(),
                cause: e.to_string(),
            })?;

        let mut entries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| Error::OperationFailed {
                operation: "list_diaries_row".to_string(),
                cause: e.to_string(),
            })?;
            entries.push(build_entry_from_row(row));
        }

        Ok(entries)
    }

    /// Searches non-deleted entries for a case-insensitive needle.
    ///
    /// The needle is checked against the excerpt, then the title, and only
    /// when neither matches against the full serialized payload, keeping the
    /// common case off the payload column. Degrades like [`Self::list`].
    #[instrument(skip(self), fields(operation = "search", backend = "diary"))]
    pub fn search(&self, needle: &str) -> Vec<DiaryEntry> {
        self.ensure_healthy();
        let start = Instant::now();
        let result = self.try_search(needle);

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("diary", "search", start, status);

        result.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Diary search failed, degrading to empty result");
            self.schedule_reinit();
            Vec::new()
        })
    }

    fn try_search(&self, needle: &str) -> Result<Vec<DiaryEntry>> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let conn = acquire_lock(&self.conn);

        // OR evaluates left to right per row, so the payload column is only
        // inspected when neither excerpt nor title matched
        let sql = format!(
            "SELECT {DIARY_COLUMNS} FROM diaries
             WHERE is_deleted = 0
               AND (instr(lower(excerpt), ?1) > 0
                    OR instr(lower(title), ?1) > 0
                    OR instr(lower(payload), ?1) > 0)
             ORDER BY is_pinned DESC, created_at DESC, id ASC"
        );

        let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
            operation: "prepare_search_diaries".to_string(),
            cause: e.to_string(),
        })?;

        let rows = stmt
            .query_map(params![needle], row_to_diary_row)
            .map_err(|e| Error::OperationFailed {
                operation: "search_diaries".to_string(),
                cause: e.to_string(),
            })?;

        let mut entries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| Error::OperationFailed {
                operation: "search_diaries_row".to_string(),
                cause: e.to_string(),
            })?;
            entries.push(build_entry_from_row(row));
        }

        Ok(entries)
    }

    /// Marks an entry invisible to listings and search, keeping the row.
    ///
    /// Returns `true` if an entry was marked.
    #[instrument(skip(self), fields(operation = "soft_delete", backend = "diary", diary.id = %id))]
    pub fn soft_delete(&self, id: &DiaryId) -> Result<bool> {
        self.ensure_healthy();
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            let updated = conn
                .execute(
                    "UPDATE diaries SET is_deleted = 1, updated_at = ?1 WHERE id = ?2",
                    params![Utc::now().timestamp_millis(), id.as_str()],
                )
                .map_err(|e| Error::OperationFailed {
                    operation: "soft_delete_diary".to_string(),
                    cause: e.to_string(),
                })?;

            Ok(updated > 0)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("diary", "soft_delete", start, status);
        result
    }

    /// Physically removes an entry.
    ///
    /// Returns `true` if a row was removed.
    #[instrument(skip(self), fields(operation = "hard_delete", backend = "diary", diary.id = %id))]
    pub fn hard_delete(&self, id: &DiaryId) -> Result<bool> {
        self.ensure_healthy();
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            let deleted = conn
                .execute("DELETE FROM diaries WHERE id = ?1", params![id.as_str()])
                .map_err(|e| Error::OperationFailed {
                    operation: "hard_delete_diary".to_string(),
                    cause: e.to_string(),
                })?;

            Ok(deleted > 0)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("diary", "hard_delete", start, status);
        result
    }

    /// Returns the number of non-deleted entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the count query fails.
    #[instrument(skip(self), fields(operation = "count", backend = "diary"))]
    pub fn count(&self) -> Result<usize> {
        self.ensure_healthy();
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);

            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM diaries WHERE is_deleted = 0",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| Error::OperationFailed {
                    operation: "count_diaries".to_string(),
                    cause: e.to_string(),
                })?;

            Ok(usize::try_from(count).unwrap_or(0))
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("diary", "count", start, status);
        result
    }
}
