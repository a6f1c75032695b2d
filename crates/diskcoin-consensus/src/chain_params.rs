//! Network selection and per-network consensus parameters.

use crate::params::{MAX_BASE_TARGET, TARGET_SPACING_SECS};
use crate::{ConsensusError, ConsensusResult};
use std::fmt;
use std::str::FromStr;

/// Network the node runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local regression-test network; base target is pinned to the maximum.
    Regtest,
}

impl Network {
    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = ConsensusError;

    fn from_str(s: &str) -> ConsensusResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(ConsensusError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Consensus parameters that differ between networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    /// Network these parameters belong to.
    pub network: Network,
    /// Largest allowed base target.
    pub max_base_target: u64,
    /// Target block interval in seconds.
    pub target_spacing: u32,
}

impl ChainParams {
    /// Parameters for a network.
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            max_base_target: MAX_BASE_TARGET,
            target_spacing: TARGET_SPACING_SECS,
        }
    }

    /// Mainnet parameters.
    pub fn mainnet() -> Self {
        Self::for_network(Network::Mainnet)
    }

    /// Regtest parameters.
    pub fn regtest() -> Self {
        Self::for_network(Network::Regtest)
    }

    /// Whether the base target is pinned to the maximum.
    pub fn pins_base_target(&self) -> bool {
        self.network == Network::Regtest
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::mainnet()
    }
}
