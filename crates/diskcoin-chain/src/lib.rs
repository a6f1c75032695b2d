//! # diskcoin-chain
//!
//! Chain index for the Diskcoin node.
//!
//! This crate provides:
//! - `BlockTree`: an arena owning one `ChainNode` per known block, with
//!   parent and skip links stored as `NodeId` indices
//! - `ActiveChain`: the height-indexed view of the currently active chain
//! - Ancestor lookup in O(log n) hops using the skip list
//! - Fork detection and block locators for peer synchronization
//!
//! ## Skip list
//!
//! Every node stores a link to one ancestor at `skip_height(height)`. The
//! heights are chosen by clearing low bits of the node height so that repeated
//! hops roughly halve the remaining distance. The exact function is part of
//! the on-disk compatibility surface and must not change.

mod active;
mod error;
mod hash;
mod header;
mod tree;

pub use active::ActiveChain;
pub use error::{ChainError, ChainResult};
pub use hash::BlockHash;
pub use header::{BlockHeader, HEADER_SIZE};
pub use tree::{skip_height, BlockTree, ChainNode, NodeId};

/// Height of the genesis block.
pub const GENESIS_HEIGHT: u32 = 0;
