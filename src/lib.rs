//! # Daybook
//!
//! A local-first tiered persistence and synchronization engine for chat
//! sessions and generated diary entries.
//!
//! Daybook stores user records durably on the local machine, survives the
//! unavailability of any single storage tier, and optionally mirrors state
//! to a remote replica without ever blocking the caller.
//!
//! ## Architecture
//!
//! - Tiered key/value storage: a transactional `SQLite` primary tier with a
//!   plain-file degraded tier behind one facade ([`storage::TieredKv`])
//! - Three interchangeable session stores (local, remote, hybrid) behind a
//!   single capability trait ([`adapters::SessionStore`])
//! - A sync orchestrator owning the active adapter and a periodic outbound
//!   sync timer ([`sync::SyncOrchestrator`])
//! - A versioned, indexed diary store with transactional schema migrations
//!   ([`storage::DiaryStore`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use daybook::adapters::{LocalSessionStore, SessionStore};
//! use daybook::models::Session;
//! use daybook::storage::TieredKv;
//!
//! let kv = TieredKv::open(&data_dir)?;
//! let store = LocalSessionStore::new(kv);
//! store.save_session(&Session::new()).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod adapters;
pub mod config;
pub mod models;
pub mod observability;
pub mod storage;
pub mod sync;

// Re-exports for convenience
pub use adapters::{HybridSessionStore, LocalSessionStore, RemoteSessionStore, SessionStore};
pub use config::{DaybookConfig, StorageMode, SyncSettings};
pub use models::{ChatMessage, DiaryEntry, DiaryId, DiaryKind, MessageRole, Session, SessionId};
pub use storage::{DiaryQuery, DiaryStore, KvBackend, TieredKv};
pub use sync::{DebouncedWriter, SyncOrchestrator, SyncOutcome};

/// Error type for daybook operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Missing primary keys, malformed dates, quota overflow |
/// | `OperationFailed` | I/O errors, database queries fail, both tiers reject a write |
/// | `RemoteUnavailable` | The remote replica cannot be reached or times out |
/// | `Unauthorized` | Missing or rejected bearer token on remote calls |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A record is missing its primary key (e.g., empty session id)
    /// - A diary entry carries an empty or malformed calendar date
    /// - A write would exceed the degraded tier's byte quota
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` database operations fail
    /// - Filesystem I/O errors occur
    /// - Both storage tiers reject the same write
    /// - A schema migration transaction aborts
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The remote replica is unreachable.
    ///
    /// Raised when:
    /// - The health probe fails at hybrid-store construction
    /// - A remote request errors at the transport level
    /// - The replica answers with a 5xx after all retries
    ///
    /// The hybrid adapter and the sync orchestrator treat this as a
    /// degraded-but-healthy condition, never as fatal.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Authentication failed.
    ///
    /// Raised when:
    /// - No bearer token is configured for a remote call
    /// - The replica rejects the token (401/403)
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Result type alias for daybook operations.
pub type Result<T> = std::result::Result<T, Error>;
