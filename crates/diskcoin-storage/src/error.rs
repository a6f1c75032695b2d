//! Storage errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Error reported by RocksDB.
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// The database was opened without one of the node's column families.
    #[error("Missing column family: {0}")]
    MissingColumnFamily(&'static str),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
