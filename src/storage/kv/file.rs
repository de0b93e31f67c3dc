//! File-based degraded key/value tier.
//!
//! A deliberately simple fallback: the whole map lives in one JSON file that
//! is re-read and rewritten synchronously on every operation. No
//! transactions, no indices, and a fixed byte quota, mirroring the limits of
//! the environment it stands in for.

use crate::storage::kv::KvBackend;
use crate::storage::sqlite::record_operation_metrics;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// Default storage quota (5 MB), sized like a browser origin's simple store.
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Size-limited key/value tier stored as a single JSON file.
pub struct FileKvBackend {
    path: PathBuf,
    quota_bytes: u64,
    /// Serializes read-modify-write cycles on the backing file.
    io_lock: Mutex<()>,
}

impl FileKvBackend {
    /// Creates a backend storing its map at `path` with the default quota.
    ///
    /// The file is created lazily on first write; its parent directory is
    /// created eagerly.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_quota(path, DEFAULT_QUOTA_BYTES)
    }

    /// Creates a backend with an explicit byte quota.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn with_quota(path: impl Into<PathBuf>, quota_bytes: u64) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_kv_file_dir".to_string(),
                cause: e.to_string(),
            })?;
        }

        Ok(Self {
            path,
            quota_bytes,
            io_lock: Mutex::new(()),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| Error::OperationFailed {
            operation: "read_kv_file".to_string(),
            cause: e.to_string(),
        })?;

        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_kv_file".to_string(),
            cause: e.to_string(),
        })
    }

    fn persist(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let serialized = serde_json::to_string(map).map_err(|e| Error::OperationFailed {
            operation: "serialize_kv_file".to_string(),
            cause: e.to_string(),
        })?;

        if serialized.len() as u64 > self.quota_bytes {
            return Err(Error::InvalidInput(format!(
                "kv file quota exceeded: {} > {} bytes",
                serialized.len(),
                self.quota_bytes
            )));
        }

        fs::write(&self.path, serialized).map_err(|e| Error::OperationFailed {
            operation: "write_kv_file".to_string(),
            cause: e.to_string(),
        })
    }
}

impl KvBackend for FileKvBackend {
    #[instrument(skip(self), fields(operation = "get", backend = "file_kv"))]
    fn get(&self, key: &str) -> Result<Option<String>> {
        let start = Instant::now();
        let result = (|| {
            let _guard = crate::storage::sqlite::acquire_lock(&self.io_lock);
            Ok(self.load()?.remove(key))
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("file_kv", "get", start, status);
        result
    }

    #[instrument(skip(self, value), fields(operation = "set", backend = "file_kv", value.len = value.len()))]
    fn set(&self, key: &str, value: &str) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let _guard = crate::storage::sqlite::acquire_lock(&self.io_lock);
            let mut map = self.load()?;
            map.insert(key.to_string(), value.to_string());
            self.persist(&map)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("file_kv", "set", start, status);
        result
    }

    #[instrument(skip(self), fields(operation = "remove", backend = "file_kv"))]
    fn remove(&self, key: &str) -> Result<bool> {
        let start = Instant::now();
        let result = (|| {
            let _guard = crate::storage::sqlite::acquire_lock(&self.io_lock);
            let mut map = self.load()?;
            let removed = map.remove(key).is_some();
            if removed {
                self.persist(&map)?;
            }
            Ok(removed)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("file_kv", "remove", start, status);
        result
    }

    #[instrument(skip(self), fields(operation = "clear", backend = "file_kv"))]
    fn clear(&self) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let _guard = crate::storage::sqlite::acquire_lock(&self.io_lock);
            self.persist(&BTreeMap::new())
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("file_kv", "clear", start, status);
        result
    }
}
