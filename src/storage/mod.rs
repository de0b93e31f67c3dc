//! Storage layer.
//!
//! This module provides the two durable building blocks of the engine:
//! - **Tiered key/value storage**: a transactional `SQLite` primary tier and
//!   a plain-file degraded tier unified behind [`TieredKv`]
//! - **Diary storage**: a schema-versioned, indexed `SQLite` store for
//!   generated diary entries ([`DiaryStore`])

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod diary;
pub mod kv;
pub mod migrations;
pub mod sqlite;

pub use diary::{DiaryQuery, DiaryStore};
pub use kv::{FileKvBackend, KvBackend, SqliteKvBackend, TieredKv};
pub use migrations::{Migration, MigrationRunner, max_version};
