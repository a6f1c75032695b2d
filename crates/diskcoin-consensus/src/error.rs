//! Error types for consensus rules.

use thiserror::Error;

/// Consensus rule errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Node id is not part of the tree.
    #[error("Unknown block node {0}")]
    UnknownNode(usize),

    /// An ancestor required by the averaging window is missing.
    #[error("Missing ancestor below height {height}")]
    MissingAncestor { height: u32 },

    /// Unrecognized network name.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// The active chain has no tip yet.
    #[error("Active chain is empty")]
    EmptyChain,
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
