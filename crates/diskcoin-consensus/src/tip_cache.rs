//! Memoized consensus values for the active tip.

use crate::{
    generation_signature, BaseTargetAdjustment, ChainParams, ConsensusError, ConsensusResult,
};
use diskcoin_chain::{ActiveChain, BlockHash, BlockTree};
use tracing::debug;

/// Values a block producer needs to extend the tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipTarget {
    /// Tip block hash.
    pub hash: BlockHash,
    /// Tip height.
    pub height: u32,
    /// Base target required for the next block.
    pub base_target: u64,
    /// Generation signature of the tip.
    pub generation_signature: [u8; 32],
}

/// Single-entry cache keyed by tip hash.
///
/// A reorg to a different block at the same height changes the key, so the
/// entry is never served for the wrong tip.
#[derive(Debug)]
pub struct TipCache {
    adjustment: BaseTargetAdjustment,
    entry: Option<TipTarget>,
}

impl TipCache {
    /// Create an empty cache for a network.
    pub fn new(params: &ChainParams) -> Self {
        Self {
            adjustment: BaseTargetAdjustment::new(params),
            entry: None,
        }
    }

    /// Values for the current tip of `active`, recomputed when the tip moved.
    pub fn current(&mut self, tree: &BlockTree, active: &ActiveChain) -> ConsensusResult<TipTarget> {
        let tip = active.tip().ok_or(ConsensusError::EmptyChain)?;
        let node = tree.node(tip).ok_or(ConsensusError::UnknownNode(tip.index()))?;

        if let Some(entry) = self.entry {
            if entry.hash == node.hash {
                return Ok(entry);
            }
        }

        let target = TipTarget {
            hash: node.hash,
            height: node.height,
            base_target: self.adjustment.calculate(tree, tip)?,
            generation_signature: generation_signature(node),
        };
        debug!(
            height = target.height,
            hash = %target.hash,
            base_target = target.base_target,
            "Refreshed tip cache"
        );
        self.entry = Some(target);
        Ok(target)
    }

    /// Cached entry, if any.
    pub fn cached(&self) -> Option<&TipTarget> {
        self.entry.as_ref()
    }

    /// Drop the cached entry.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}
