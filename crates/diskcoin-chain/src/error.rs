//! Error types for the chain index.

use crate::BlockHash;
use thiserror::Error;

/// Chain index errors.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Parent block is not in the tree.
    #[error("Parent block not found: {0}")]
    UnknownParent(BlockHash),

    /// A second genesis block was offered.
    #[error("Genesis already set to {existing}, refusing {offered}")]
    GenesisMismatch {
        existing: BlockHash,
        offered: BlockHash,
    },

    /// Node id does not belong to this tree.
    #[error("Unknown node id {0}")]
    UnknownNode(usize),

    /// Malformed serialized header.
    #[error("Invalid header encoding: {0}")]
    InvalidHeader(String),

    /// Height does not fit the index.
    #[error("Height {0} exceeds the supported range")]
    HeightOverflow(u64),
}

/// Result type for chain index operations.
pub type ChainResult<T> = Result<T, ChainError>;
