//! # diskcoin-consensus
//!
//! Consensus rules for the Diskcoin proof-of-capacity chain.
//!
//! This crate provides:
//! - Generation signature computation (Shabal-256)
//! - Base target (inverse difficulty) adjustment
//! - Network parameters
//! - A per-tip cache of both values for block producers
//!
//! ## Base target
//!
//! Below height 2700 the base target follows the average of the last 4
//! blocks, scaled by how long they took, moving at most 10% per block. From
//! height 2700 on a weighted 24-block average is used, the elapsed time is
//! clamped to half/double the target span and the step limit is 20%.
//! These constants are consensus critical.

mod base_target;
mod chain_params;
mod error;
mod signature;
mod tip_cache;

pub use base_target::{calculate_base_target, BaseTargetAdjustment};
pub use chain_params::{ChainParams, Network};
pub use error::{ConsensusError, ConsensusResult};
pub use signature::{generation_signature, generation_signature_of, SIGNATURE_INPUT_LEN};
pub use tip_cache::{TipCache, TipTarget};

/// Diskcoin network parameters.
pub mod params {
    /// Target block interval in seconds.
    pub const TARGET_SPACING_SECS: u32 = 300;

    /// Largest (easiest) base target on mainnet and testnet.
    pub const MAX_BASE_TARGET: u64 = 18_325_193_796;

    /// Blocks below this height always use the maximum base target.
    pub const BOOTSTRAP_HEIGHT: u32 = 4;

    /// First height of the steady adjustment regime.
    pub const STEADY_REGIME_HEIGHT: u32 = 2700;

    /// Averaging window of the early regime.
    pub const EARLY_WINDOW: u32 = 4;

    /// Averaging window of the steady regime.
    pub const STEADY_WINDOW: u32 = 24;

    /// Largest target spacing whose doubled steady span fits in a `u32`.
    pub const MAX_TARGET_SPACING: u32 = u32::MAX / (2 * STEADY_WINDOW);

    /// Maximum per-block change in the early regime, percent.
    pub const EARLY_ADJUST_PERCENT: u64 = 10;

    /// Maximum per-block change in the steady regime, percent.
    pub const STEADY_ADJUST_PERCENT: u64 = 20;
}
