//! # RocksDB Backend
//!
//! Durable [`KvBackend`] for the native runtime. Values are stored as JSON
//! bytes under their key in the default column family.

use super::backend::{KvBackend, StorageError};
use async_trait::async_trait;
use rocksdb::{Options, DB};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// RocksDB-backed key-value store
pub struct RocksDbBackend {
    db: Arc<DB>,
}

impl RocksDbBackend {
    /// Open or create a database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::Unavailable(format!("Failed to open RocksDB: {e}")))?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl KvBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let Some(bytes) = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Decode(e.to_string()))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec(&value).map_err(|e| StorageError::Decode(e.to_string()))?;
        self.db
            .put(key.as_bytes(), bytes)
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}
