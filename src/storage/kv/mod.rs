//! Tiered key/value storage.
//!
//! Two tiers with different failure modes behind one facade:
//! - [`SqliteKvBackend`]: transactional, durable primary tier
//! - [`FileKvBackend`]: synchronous, size-limited degraded tier
//! - [`TieredKv`]: probes the primary once at startup and falls back
//!   permanently to the degraded tier if the probe fails

mod file;
mod sqlite;
mod tiered;

pub use file::FileKvBackend;
pub use sqlite::SqliteKvBackend;
pub use tiered::TieredKv;

use crate::Result;

/// Trait for key/value storage tiers.
///
/// Values are opaque strings; callers layer their own serialization on top.
pub trait KvBackend: Send + Sync {
    /// Retrieves the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the value stored under `key`.
    ///
    /// Returns `true` if a value was present.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Removes every stored value.
    fn clear(&self) -> Result<()>;

    /// Checks whether a value exists under `key`.
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}
