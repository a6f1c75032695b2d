//! Block body access for the ledger.

use crate::tx::{Transaction, Txid};
use crate::{StateError, StateResult};
use diskcoin_chain::{BlockHash, ChainNode};
use std::collections::HashMap;

/// Read access to block bodies and confirmed transactions.
pub trait BlockSource {
    /// Transactions of the block behind `node`, coinbase first.
    fn block_transactions(&self, node: &ChainNode) -> StateResult<Vec<Transaction>>;

    /// Look up a confirmed transaction by id.
    fn find_transaction(&self, txid: &Txid) -> StateResult<Option<Transaction>>;
}

/// In-memory [`BlockSource`].
#[derive(Debug, Default, Clone)]
pub struct MemoryBlockSource {
    blocks: HashMap<BlockHash, Vec<Transaction>>,
    transactions: HashMap<Txid, Transaction>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body of a block and index its transactions.
    pub fn insert_block(&mut self, hash: BlockHash, txs: Vec<Transaction>) {
        for tx in &txs {
            self.transactions.insert(tx.txid(), tx.clone());
        }
        self.blocks.insert(hash, txs);
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockSource for MemoryBlockSource {
    fn block_transactions(&self, node: &ChainNode) -> StateResult<Vec<Transaction>> {
        self.blocks
            .get(&node.hash)
            .cloned()
            .ok_or(StateError::BlockNotFound(node.hash))
    }

    fn find_transaction(&self, txid: &Txid) -> StateResult<Option<Transaction>> {
        Ok(self.transactions.get(txid).cloned())
    }
}
