//! Error types for ledger and block state.

use diskcoin_chain::BlockHash;
use thiserror::Error;

use crate::pool::PoolError;
use crate::tx::Txid;

/// State management errors.
#[derive(Error, Debug)]
pub enum StateError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] diskcoin_storage::StorageError),

    /// Chain index error.
    #[error("Chain error: {0}")]
    Chain(#[from] diskcoin_chain::ChainError),

    /// Record allocation failed.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Node id not present in the block tree.
    #[error("Unknown chain node: {0}")]
    UnknownNode(usize),

    /// Block hash not present in the block tree.
    #[error("Unknown block: {0}")]
    UnknownBlock(BlockHash),

    /// Ancestor lookup failed.
    #[error("No ancestor at height {height} for block {hash}")]
    MissingAncestor { height: u32, hash: BlockHash },

    /// Target lies below the durable snapshot.
    #[error("Target height {target} is below snapshot height {sync_height}")]
    BehindSnapshot { target: u32, sync_height: u32 },

    /// The snapshot block is not an ancestor of the target.
    #[error("Snapshot block {hash} at height {height} is not on the target chain")]
    SnapshotNotOnChain { height: u32, hash: BlockHash },

    /// Replayed block does not extend the ledger cursor.
    #[error("Block at height {height} has parent {found}, ledger is at {expected}")]
    ParentMismatch {
        height: u32,
        expected: BlockHash,
        found: BlockHash,
    },

    /// Block body not available.
    #[error("Block transactions not found: {0}")]
    BlockNotFound(BlockHash),

    /// Coinbase without a beneficiary output.
    #[error("Malformed coinbase at height {height}: {reason}")]
    InvalidCoinbase { height: u32, reason: String },

    /// Transaction spent by an unpledge cannot be found.
    #[error("Pledge transaction not found: {0}")]
    UnresolvedPledge(Txid),

    /// Transaction spent by an unpledge is not a pledge.
    #[error("Transaction {0} is not a pledge")]
    NotAPledge(Txid),

    /// Address failed validation.
    #[error("Invalid stake address: {0}")]
    InvalidAddress(String),

    /// Ledger queried before it was loaded.
    #[error("Stake ledger is not loaded")]
    NotLoaded,

    /// No active chain tip.
    #[error("Active chain is empty")]
    EmptyChain,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
