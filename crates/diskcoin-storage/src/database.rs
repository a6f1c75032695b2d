//! RocksDB-backed block database.

use crate::batch::BatchOperation;
use crate::{Storage, StorageError, StorageResult, WriteBatch};
use parking_lot::RwLock;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, IteratorMode,
    MultiThreaded, Options,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Column families of the block database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// Serialized block headers indexed by block hash.
    Headers,
    /// Serialized transaction lists indexed by block hash.
    BlockTransactions,
    /// Active chain mapping (big-endian height -> block hash).
    HeaderChain,
    /// Transaction index (txid -> block hash).
    TxIndex,
    /// Node metadata.
    Metadata,
    /// Default column family (required by RocksDB).
    Default,
}

impl ColumnFamily {
    /// Every column family, in creation order.
    pub const ALL: [ColumnFamily; 6] = [
        ColumnFamily::Headers,
        ColumnFamily::BlockTransactions,
        ColumnFamily::HeaderChain,
        ColumnFamily::TxIndex,
        ColumnFamily::Metadata,
        ColumnFamily::Default,
    ];

    /// RocksDB name of the column family.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Headers => "headers",
            ColumnFamily::BlockTransactions => "block_transactions",
            ColumnFamily::HeaderChain => "header_chain",
            ColumnFamily::TxIndex => "tx_index",
            ColumnFamily::Metadata => "metadata",
            ColumnFamily::Default => "default",
        }
    }

    fn options(&self) -> Options {
        let mut opts = Options::default();
        match self {
            // Bodies dominate the database size.
            ColumnFamily::BlockTransactions => {
                opts.set_compression_type(DBCompressionType::Lz4);
            }
            // Hash-keyed lookups only, never scanned.
            ColumnFamily::TxIndex => {
                opts.optimize_for_point_lookup(POINT_LOOKUP_CACHE_MB);
                opts.set_compression_type(DBCompressionType::None);
            }
            ColumnFamily::Headers => opts.set_compression_type(DBCompressionType::Lz4),
            _ => opts.set_compression_type(DBCompressionType::None),
        }
        opts
    }
}

const POINT_LOOKUP_CACHE_MB: u64 = 16;

type Db = DBWithThreadMode<MultiThreaded>;

/// Block database. Clones share the same RocksDB instance.
#[derive(Clone)]
pub struct Database {
    db: Arc<RwLock<Db>>,
}

impl Database {
    /// Open or create the block database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening block database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(128);
        opts.set_keep_log_file_num(1);

        let descriptors = ColumnFamily::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), cf.options()));
        let db = Db::open_cf_descriptors(&opts, path, descriptors)?;
        debug!(column_families = ColumnFamily::ALL.len(), "Block database ready");

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Flush memtables of every column family to disk.
    pub fn flush(&self) -> StorageResult<()> {
        let db = self.db.read();
        for cf in ColumnFamily::ALL {
            let cf = handle(&db, cf)?;
            db.flush_cf(&cf)?;
        }
        Ok(())
    }
}

fn handle(db: &Db, cf: ColumnFamily) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
    db.cf_handle(cf.name())
        .ok_or(StorageError::MissingColumnFamily(cf.name()))
}

impl Storage for Database {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let db = self.db.read();
        let cf = handle(&db, cf)?;
        let value = db.get_cf(&cf, key)?;
        Ok(value)
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let db = self.db.read();
        let cf = handle(&db, cf)?;
        db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        let db = self.db.read();
        let cf = handle(&db, cf)?;
        db.delete_cf(&cf, key)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let db = self.db.read();
        let mut rocks = rocksdb::WriteBatch::default();
        let count = batch.len();

        for op in batch.operations {
            match op {
                BatchOperation::Put { cf, key, value } => {
                    rocks.put_cf(&handle(&db, cf)?, key, value)
                }
                BatchOperation::Delete { cf, key } => rocks.delete_cf(&handle(&db, cf)?, key),
            }
        }

        db.write(rocks)?;
        trace!(count, "Wrote batch");
        Ok(())
    }

    fn iter(&self, cf: ColumnFamily) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = self.db.read();
        let cf = handle(&db, cf)?;
        let entries = db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| -> StorageResult<_> {
                let (key, value) = item?;
                Ok((key.into_vec(), value.into_vec()))
            })
            .collect();
        entries
    }
}
