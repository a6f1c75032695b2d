//! Write batch for atomic operations.

use crate::ColumnFamily;

/// A single queued write.
#[derive(Debug, Clone)]
pub(crate) enum BatchOperation {
    /// Put a key-value pair.
    Put {
        cf: ColumnFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete { cf: ColumnFamily, key: Vec<u8> },
}

/// A batch of write operations to be executed atomically.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub(crate) operations: Vec<BatchOperation>,
}

impl WriteBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.operations.push(BatchOperation::Put {
            cf,
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queue a delete.
    pub fn delete(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>) {
        self.operations.push(BatchOperation::Delete {
            cf,
            key: key.into(),
        });
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
