//! Node implementation.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use diskcoin_chain::{ActiveChain, BlockHash, BlockTree};
use diskcoin_consensus::{ChainParams, TipCache, TipTarget};
use diskcoin_state::{BlockStore, LedgerStats, StakeService};
use diskcoin_storage::Database;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Chain index, tip cache and stake ledger, guarded together.
struct NodeState {
    tree: BlockTree,
    active: ActiveChain,
    tip_cache: TipCache,
    stake: StakeService<BlockStore>,
}

/// Snapshot of the node's view of the chain.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    /// Indexed headers.
    pub headers: usize,
    /// Active chain height.
    pub chain_height: Option<u32>,
    /// Values for extending the tip.
    pub tip: Option<TipTarget>,
    /// Stake ledger height.
    pub ledger_height: Option<u32>,
    /// Stake ledger counters.
    pub ledger: Option<LedgerStats>,
}

/// The main node struct coordinating all components.
pub struct Node {
    config: NodeConfig,
    state: RwLock<NodeState>,
}

impl Node {
    /// Open the block database and the stake ledger under the data directory.
    pub fn open(config: NodeConfig) -> Result<Self> {
        let params = ChainParams::for_network(config.network()?);
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

        let db = Database::open(config.blocks_dir()).context("Failed to open block database")?;
        let store = BlockStore::new(Arc::new(db));
        let (tree, active) = store.load_chain().context("Failed to load block index")?;

        let stake = match tree.genesis() {
            Some(genesis) => StakeService::open(
                store,
                config.ledger_path(),
                config.ledger.clone(),
                tree[genesis].hash,
            )
            .context("Failed to load stake ledger")?,
            None => {
                warn!("Block database is empty, stake ledger not loaded");
                StakeService::new(store)
            }
        };

        info!(
            network = %params.network,
            headers = tree.len(),
            height = ?active.height(),
            ledger_height = ?stake.ledger_height(),
            "Node opened"
        );

        Ok(Self {
            config,
            state: RwLock::new(NodeState {
                tree,
                active,
                tip_cache: TipCache::new(&params),
                stake,
            }),
        })
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current chain and ledger summary.
    pub fn status(&self) -> Result<NodeStatus> {
        let mut state = self.state.write();
        let NodeState {
            tree,
            active,
            tip_cache,
            stake,
        } = &mut *state;

        let tip = match active.tip() {
            Some(_) => Some(tip_cache.current(tree, active)?),
            None => None,
        };

        Ok(NodeStatus {
            headers: tree.len(),
            chain_height: active.height(),
            tip,
            ledger_height: stake.ledger_height(),
            ledger: stake.ledger().map(|ledger| ledger.stats()),
        })
    }

    /// Step the stake ledger to the active tip.
    pub fn sync_ledger(&self) -> Result<u32> {
        let mut state = self.state.write();
        let NodeState {
            tree,
            active,
            stake,
            ..
        } = &mut *state;
        let height = stake
            .step_ledger_to(tree, active)
            .context("Failed to step stake ledger")?;
        Ok(height)
    }

    /// Stake pledged to `address`.
    pub fn stake_of(&self, address: &str) -> i64 {
        self.state.read().stake.stake_of(address)
    }

    /// Blocks mined by `address` in the current window.
    pub fn mined_count(&self, address: &str) -> Result<usize> {
        let mut state = self.state.write();
        let NodeState { tree, stake, .. } = &mut *state;
        Ok(stake.mined_count(tree, address)?)
    }

    /// Log the miner window of the ledger.
    pub fn log_miner_window(&self, address: Option<&str>) {
        match self.state.read().stake.ledger() {
            Some(ledger) => ledger.log_miner_window(address),
            None => warn!("Stake ledger not loaded"),
        }
    }

    /// Reset the stake ledger to genesis.
    pub fn reinit_ledger(&self) -> Result<()> {
        self.state
            .write()
            .stake
            .reinit()
            .context("Failed to reinitialize stake ledger")
    }

    /// Hash of the active block at `height`.
    pub fn block_hash_at(&self, height: u32) -> Option<BlockHash> {
        let state = self.state.read();
        state.active.at(height).map(|id| state.tree[id].hash)
    }
}
