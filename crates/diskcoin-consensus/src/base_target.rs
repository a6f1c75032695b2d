//! Base target adjustment algorithm.
//!
//! The base target is the inverse difficulty of the proof-of-capacity
//! condition: a lower value is harder to satisfy. It tracks recent block
//! times so that blocks arrive every `target_spacing` seconds on average.
//! All arithmetic wraps on overflow exactly like the reference nodes do.

use crate::params::{
    BOOTSTRAP_HEIGHT, EARLY_ADJUST_PERCENT, EARLY_WINDOW, MAX_TARGET_SPACING,
    STEADY_ADJUST_PERCENT, STEADY_REGIME_HEIGHT, STEADY_WINDOW,
};
use crate::{ChainParams, ConsensusError, ConsensusResult};
use diskcoin_chain::{BlockTree, NodeId};
use tracing::trace;

/// Base target calculator.
#[derive(Debug, Clone)]
pub struct BaseTargetAdjustment {
    /// Largest allowed base target.
    max_base_target: u64,
    /// Target block interval in seconds.
    target_spacing: u32,
    /// Always answer `max_base_target`.
    pinned: bool,
}

impl BaseTargetAdjustment {
    /// Create a calculator for a network.
    pub fn new(params: &ChainParams) -> Self {
        Self {
            pinned: params.pins_base_target(),
            ..Self::with_params(params.max_base_target, params.target_spacing)
        }
    }

    /// Create with custom parameters (for testing).
    ///
    /// `target_spacing` is clamped to `1..=MAX_TARGET_SPACING`.
    pub fn with_params(max_base_target: u64, target_spacing: u32) -> Self {
        Self {
            max_base_target,
            target_spacing: target_spacing.clamp(1, MAX_TARGET_SPACING),
            pinned: false,
        }
    }

    /// Base target required for the block following `last`.
    pub fn calculate(&self, tree: &BlockTree, last: NodeId) -> ConsensusResult<u64> {
        let height = tree
            .node(last)
            .ok_or(ConsensusError::UnknownNode(last.index()))?
            .height;

        if self.pinned || height < BOOTSTRAP_HEIGHT {
            return Ok(self.max_base_target);
        }

        let (current, proposed, percent) = if height < STEADY_REGIME_HEIGHT {
            self.early_regime(tree, last)?
        } else {
            self.steady_regime(tree, last)?
        };

        let adjusted = self.clamp(current, proposed, percent);
        trace!(height, current, proposed, adjusted, "Calculated base target");
        Ok(adjusted)
    }

    /// Plain average over the last 4 blocks.
    fn early_regime(&self, tree: &BlockTree, last: NodeId) -> ConsensusResult<(u64, u64, u64)> {
        let mut sum = 0u64;
        let mut walk = last;
        for _ in 0..EARLY_WINDOW {
            sum = sum.wrapping_add(tree[walk].base_target);
            walk = parent_of(tree, walk)?;
        }

        let elapsed = tree[last].timestamp.wrapping_sub(tree[walk].timestamp);
        let current = sum / u64::from(EARLY_WINDOW);
        let expected = u64::from(EARLY_WINDOW) * u64::from(self.target_spacing);
        let proposed = current.wrapping_mul(u64::from(elapsed)) / expected;

        Ok((current, proposed, EARLY_ADJUST_PERCENT))
    }

    /// Weighted running average over the 24 blocks before `last`.
    fn steady_regime(&self, tree: &BlockTree, last: NodeId) -> ConsensusResult<(u64, u64, u64)> {
        let previous = parent_of(tree, last)?;
        let mut walk = previous;
        let mut average = tree[walk].base_target;
        let mut counter = 1u64;
        loop {
            walk = parent_of(tree, walk)?;
            counter += 1;
            average = average
                .wrapping_mul(counter)
                .wrapping_add(tree[walk].base_target)
                / (counter + 1);
            if counter >= u64::from(STEADY_WINDOW) {
                break;
            }
        }

        let target_span = STEADY_WINDOW * self.target_spacing;
        let elapsed = tree[last]
            .timestamp
            .wrapping_sub(tree[walk].timestamp)
            .clamp(target_span / 2, target_span * 2);

        let current = tree[previous].base_target;
        let proposed = average.wrapping_mul(u64::from(elapsed)) / u64::from(target_span);

        Ok((current, proposed, STEADY_ADJUST_PERCENT))
    }

    /// Bound `proposed` to `[1, max]` and to `percent` around `current`.
    fn clamp(&self, current: u64, proposed: u64, percent: u64) -> u64 {
        let mut adjusted = if proposed == 0 || proposed > self.max_base_target {
            self.max_base_target
        } else {
            proposed
        };

        let floor = current.wrapping_mul(100 - percent) / 100;
        if adjusted < floor {
            adjusted = floor;
        }
        if adjusted == 0 {
            adjusted = 1;
        }

        let mut ceiling = current.wrapping_mul(100 + percent) / 100;
        if ceiling == 0 {
            ceiling = self.max_base_target;
        }
        adjusted.min(ceiling)
    }
}

fn parent_of(tree: &BlockTree, id: NodeId) -> ConsensusResult<NodeId> {
    tree.parent(id).ok_or(ConsensusError::MissingAncestor {
        height: tree[id].height,
    })
}

/// Calculate the base target following `last` for the given network.
pub fn calculate_base_target(
    params: &ChainParams,
    tree: &BlockTree,
    last: NodeId,
) -> ConsensusResult<u64> {
    BaseTargetAdjustment::new(params).calculate(tree, last)
}
