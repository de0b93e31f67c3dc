//! Versioned schema migration system.
//!
//! Provides a compile-time embedded migration list that upgrades a `SQLite`
//! database when a store opens. Each version step is applied inside one
//! transaction: either every statement of the step lands (and the version is
//! recorded) or none do, so a partially-migrated schema is never observable.
//! An aborted step leaves the database at the prior version and is retried
//! the next time the store opens.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daybook::storage::migrations::{Migration, MigrationRunner};
//!
//! const MIGRATIONS: &[Migration] = &[
//!     Migration {
//!         version: 1,
//!         description: "initial table",
//!         sql: "CREATE TABLE IF NOT EXISTS entries (id TEXT PRIMARY KEY);",
//!     },
//! ];
//!
//! let runner = MigrationRunner::new("diaries");
//! runner.run(&mut conn, MIGRATIONS)?;
//! ```

use crate::{Error, Result};
use rusqlite::{Connection, params};

/// A single migration with version and SQL.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Migration version (sequential, starting at 1).
    pub version: i32,
    /// Human-readable description.
    pub description: &'static str,
    /// SQL to apply (may contain multiple statements separated by semicolons).
    pub sql: &'static str,
}

/// Runs migrations for a named store.
///
/// The tracking table is `<store>_schema_migrations`, one row per applied
/// version, so independent stores sharing a database file cannot clobber
/// each other's version counters.
pub struct MigrationRunner {
    store_name: String,
}

impl MigrationRunner {
    /// Creates a new migration runner.
    #[must_use]
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
        }
    }

    /// Returns the store name.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Runs all pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails; the failed step is rolled back
    /// and the database stays at the last fully-applied version.
    pub fn run(&self, conn: &mut Connection, migrations: &[Migration]) -> Result<()> {
        self.ensure_migrations_table(conn)?;

        let current_version = self.applied_version(conn)?;

        for migration in migrations {
            if migration.version > current_version {
                self.apply_migration(conn, migration)?;
            }
        }

        Ok(())
    }

    /// Returns the highest applied schema version (0 when untracked).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn current_version(&self, conn: &Connection) -> Result<i32> {
        let migrations_table = self.migrations_table_name();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                params![migrations_table],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !exists {
            return Ok(0);
        }

        self.applied_version(conn)
    }

    /// Returns the name of the migrations tracking table.
    fn migrations_table_name(&self) -> String {
        format!("{}_schema_migrations", self.store_name)
    }

    /// Ensures the tracking table exists.
    fn ensure_migrations_table(&self, conn: &Connection) -> Result<()> {
        let migrations_table = self.migrations_table_name();

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {migrations_table} (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            )"
        );

        conn.execute(&sql, [])
            .map_err(|e| Error::OperationFailed {
                operation: "create_migrations_table".to_string(),
                cause: e.to_string(),
            })?;

        Ok(())
    }

    fn applied_version(&self, conn: &Connection) -> Result<i32> {
        let migrations_table = self.migrations_table_name();
        let sql = format!("SELECT COALESCE(MAX(version), 0) FROM {migrations_table}");

        let version: i32 = conn
            .query_row(&sql, [], |row| row.get(0))
            .unwrap_or(0);

        Ok(version)
    }

    /// Applies a single migration within a transaction.
    ///
    /// All statements of the step and the version record are executed inside
    /// one transaction. If any statement fails, the whole step rolls back.
    fn apply_migration(&self, conn: &mut Connection, migration: &Migration) -> Result<()> {
        let migrations_table = self.migrations_table_name();

        let tx = conn.transaction().map_err(|e| Error::OperationFailed {
            operation: format!("migration_v{}_begin_tx", migration.version),
            cause: e.to_string(),
        })?;

        tx.execute_batch(migration.sql)
            .map_err(|e| Error::OperationFailed {
                operation: format!(
                    "migration_v{}: {}",
                    migration.version, migration.description
                ),
                cause: e.to_string(),
            })?;

        let record_sql =
            format!("INSERT INTO {migrations_table} (version, description) VALUES (?1, ?2)");
        tx.execute(&record_sql, params![migration.version, migration.description])
            .map_err(|e| Error::OperationFailed {
                operation: "record_migration".to_string(),
                cause: e.to_string(),
            })?;

        tx.commit().map_err(|e| Error::OperationFailed {
            operation: format!("migration_v{}_commit", migration.version),
            cause: e.to_string(),
        })?;

        tracing::info!(
            version = migration.version,
            description = migration.description,
            store = self.store_name,
            "Applied migration"
        );

        Ok(())
    }
}

/// Maximum version across a set of migrations.
#[must_use]
pub fn max_version(migrations: &[Migration]) -> i32 {
    migrations.iter().map(|m| m.version).max().unwrap_or(0)
}
