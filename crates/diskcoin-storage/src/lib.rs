//! # diskcoin-storage
//!
//! RocksDB block database for the Diskcoin node.
//!
//! Headers and block bodies are stored by hash; the active chain and a
//! transaction index make stored blocks reachable by height and by txid.
//!
//! ## Column Families
//!
//! - `Headers`: serialized block headers by block hash
//! - `BlockTransactions`: serialized transaction lists by block hash
//! - `HeaderChain`: active chain, big-endian height to block hash
//! - `TxIndex`: transaction id to containing block hash
//! - `Metadata`: best block and best height

mod batch;
mod database;
mod error;

pub use batch::WriteBatch;
pub use database::{ColumnFamily, Database};
pub use error::{StorageError, StorageResult};

/// Key-value access to the block database.
pub trait Storage: Send + Sync {
    /// Get a value by key from a column family.
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Put a key-value pair into a column family.
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Delete a key from a column family.
    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()>;

    /// Check if a key exists in a column family.
    fn contains(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Execute a batch of writes atomically.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Collect every key-value pair of a column family, in key order.
    fn iter(&self, cf: ColumnFamily) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;
}
