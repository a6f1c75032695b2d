//! Query surface over the stake ledger.

use crate::config::LedgerConfig;
use crate::ledger::StakeLedger;
use crate::rules::LedgerRules;
use crate::source::BlockSource;
use crate::{StateError, StateResult};
use diskcoin_chain::{ActiveChain, BlockHash, BlockTree};
use std::path::Path;
use tracing::debug;

/// Stake lookups for block validation and mining.
///
/// Holds an optional ledger: until one is loaded, lookups return zero and
/// the height is unknown.
pub struct StakeService<S> {
    source: S,
    ledger: Option<StakeLedger>,
}

impl<S: BlockSource> StakeService<S> {
    /// Create a service without a ledger.
    pub fn new(source: S) -> Self {
        Self {
            source,
            ledger: None,
        }
    }

    /// Create a service and load its ledger from `path`.
    pub fn open(
        source: S,
        path: impl AsRef<Path>,
        config: LedgerConfig,
        genesis: BlockHash,
    ) -> StateResult<Self> {
        let ledger = StakeLedger::load(path, config, genesis)?;
        Ok(Self {
            source,
            ledger: Some(ledger),
        })
    }

    /// Load (or replace) the ledger with custom pledge rules.
    pub fn load_ledger(
        &mut self,
        path: impl AsRef<Path>,
        config: LedgerConfig,
        genesis: BlockHash,
        rules: LedgerRules,
    ) -> StateResult<()> {
        self.ledger = Some(StakeLedger::load_with_rules(path, config, genesis, rules)?);
        Ok(())
    }

    /// Stake pledged to `address`, zero when no ledger is loaded.
    pub fn stake_of(&self, address: &str) -> i64 {
        self.ledger.as_ref().map_or(0, |ledger| ledger.stake(address))
    }

    /// Blocks mined by `address` in the current window.
    pub fn mined_count(&mut self, tree: &BlockTree, address: &str) -> StateResult<usize> {
        let ledger = self.ledger.as_mut().ok_or(StateError::NotLoaded)?;
        ledger.mined_count(tree, &self.source, address)
    }

    /// Ledger height, `None` when no ledger is loaded.
    pub fn ledger_height(&self) -> Option<u32> {
        self.ledger.as_ref().map(StakeLedger::height)
    }

    /// Step the ledger to the active tip.
    pub fn step_ledger_to(&mut self, tree: &BlockTree, active: &ActiveChain) -> StateResult<u32> {
        let tip = active.tip().ok_or(StateError::EmptyChain)?;
        let ledger = self.ledger.as_mut().ok_or(StateError::NotLoaded)?;
        let height = ledger.step_to(tree, &self.source, tip)?;
        debug!(height, "Stake ledger at active tip");
        Ok(height)
    }

    /// Reset the ledger to genesis.
    pub fn reinit(&mut self) -> StateResult<()> {
        self.ledger.as_mut().ok_or(StateError::NotLoaded)?.reinit()
    }

    pub fn ledger(&self) -> Option<&StakeLedger> {
        self.ledger.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryBlockSource;
    use diskcoin_chain::BlockHeader;
    use tempfile::TempDir;

    #[test]
    fn test_unloaded_service() {
        let mut service = StakeService::new(MemoryBlockSource::new());
        assert_eq!(service.ledger_height(), None);
        assert_eq!(service.stake_of("abcd"), 0);
        assert!(matches!(
            service.mined_count(&BlockTree::new(), "abcd"),
            Err(StateError::NotLoaded)
        ));
        assert!(matches!(service.reinit(), Err(StateError::NotLoaded)));
    }

    #[test]
    fn test_step_requires_tip() {
        let dir = TempDir::new().unwrap();
        let mut service = StakeService::open(
            MemoryBlockSource::new(),
            dir.path().join("stake.dat"),
            LedgerConfig::default(),
            BlockHash::ZERO,
        )
        .unwrap();
        assert_eq!(service.ledger_height(), Some(0));
        assert!(matches!(
            service.step_ledger_to(&BlockTree::new(), &ActiveChain::new()),
            Err(StateError::EmptyChain)
        ));
    }

    #[test]
    fn test_step_to_genesis_tip() {
        let dir = TempDir::new().unwrap();
        let mut tree = BlockTree::new();
        let genesis = tree
            .insert(&BlockHeader {
                version: 1,
                prev_hash: BlockHash::ZERO,
                merkle_root: [0u8; 32],
                timestamp: 0,
                base_target: 1,
                plotter_id: 0,
                nonce: 0,
                signature: [0u8; 32],
            })
            .unwrap();
        let mut active = ActiveChain::new();
        active.set_tip(&tree, Some(genesis));

        let mut service = StakeService::open(
            MemoryBlockSource::new(),
            dir.path().join("stake.dat"),
            LedgerConfig::default(),
            tree[genesis].hash,
        )
        .unwrap();
        assert_eq!(service.step_ledger_to(&tree, &active).unwrap(), 0);
        assert_eq!(service.mined_count(&tree, "abcd").unwrap(), 0);
    }
}
