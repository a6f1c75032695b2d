//! Block storage on top of [`Storage`].

use crate::source::BlockSource;
use crate::tx::{decode_transactions, encode_transactions, Transaction, Txid};
use crate::{StateError, StateResult};
use diskcoin_chain::{ActiveChain, BlockHash, BlockHeader, BlockTree, ChainNode};
use diskcoin_storage::{ColumnFamily, Storage, WriteBatch};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Metadata key of the active tip hash.
const BEST_BLOCK_KEY: &[u8] = b"best_block";

/// Metadata key of the active tip height.
const BEST_HEIGHT_KEY: &[u8] = b"best_height";

/// Headers, block bodies and the active chain mapping.
pub struct BlockStore {
    storage: Arc<dyn Storage>,
}

impl BlockStore {
    /// Create a new block store.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Store a block and index its transactions. Returns the block hash.
    pub fn put_block(&self, header: &BlockHeader, txs: &[Transaction]) -> StateResult<BlockHash> {
        let hash = header.hash();
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Headers, hash.as_bytes().to_vec(), header.to_bytes());
        batch.put(
            ColumnFamily::BlockTransactions,
            hash.as_bytes().to_vec(),
            encode_transactions(txs),
        );
        for tx in txs {
            batch.put(ColumnFamily::TxIndex, tx.txid().0.to_vec(), hash.as_bytes().to_vec());
        }
        self.storage.write_batch(batch)?;
        debug!(%hash, txs = txs.len(), "Stored block");
        Ok(hash)
    }

    /// Get a header by hash.
    pub fn header(&self, hash: &BlockHash) -> StateResult<Option<BlockHeader>> {
        match self.storage.get(ColumnFamily::Headers, hash.as_bytes())? {
            Some(bytes) => Ok(Some(BlockHeader::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Transactions of a block by hash.
    pub fn transactions(&self, hash: &BlockHash) -> StateResult<Option<Vec<Transaction>>> {
        match self.storage.get(ColumnFamily::BlockTransactions, hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode_transactions(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record the active chain: height mapping and tip.
    pub fn set_best_chain(&self, tree: &BlockTree, active: &ActiveChain) -> StateResult<()> {
        let previous = self.best_height()?;
        let mut batch = WriteBatch::new();

        match active.height() {
            Some(height) => {
                for h in 0..=height {
                    if let Some(id) = active.at(h) {
                        batch.put(
                            ColumnFamily::HeaderChain,
                            h.to_be_bytes().to_vec(),
                            tree[id].hash.as_bytes().to_vec(),
                        );
                    }
                }
                if let Some(old) = previous.filter(|old| *old > height) {
                    for h in height + 1..=old {
                        batch.delete(ColumnFamily::HeaderChain, h.to_be_bytes().to_vec());
                    }
                }
                if let Some(tip) = active.tip() {
                    batch.put(
                        ColumnFamily::Metadata,
                        BEST_BLOCK_KEY.to_vec(),
                        tree[tip].hash.as_bytes().to_vec(),
                    );
                }
                batch.put(
                    ColumnFamily::Metadata,
                    BEST_HEIGHT_KEY.to_vec(),
                    height.to_be_bytes().to_vec(),
                );
            }
            None => {
                for h in 0..=previous.unwrap_or(0) {
                    batch.delete(ColumnFamily::HeaderChain, h.to_be_bytes().to_vec());
                }
                batch.delete(ColumnFamily::Metadata, BEST_BLOCK_KEY.to_vec());
                batch.delete(ColumnFamily::Metadata, BEST_HEIGHT_KEY.to_vec());
            }
        }

        self.storage.write_batch(batch)?;
        Ok(())
    }

    /// Hash of the stored active tip.
    pub fn best_block(&self) -> StateResult<Option<BlockHash>> {
        Ok(self
            .storage
            .get(ColumnFamily::Metadata, BEST_BLOCK_KEY)?
            .and_then(|bytes| BlockHash::from_slice(&bytes)))
    }

    /// Height of the stored active tip.
    pub fn best_height(&self) -> StateResult<Option<u32>> {
        match self.storage.get(ColumnFamily::Metadata, BEST_HEIGHT_KEY)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    StateError::Serialization("Invalid best height length".into())
                })?;
                Ok(Some(u32::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Active chain block hash at `height`.
    pub fn hash_at(&self, height: u32) -> StateResult<Option<BlockHash>> {
        Ok(self
            .storage
            .get(ColumnFamily::HeaderChain, &height.to_be_bytes())?
            .and_then(|bytes| BlockHash::from_slice(&bytes)))
    }

    /// Rebuild the block tree from stored headers and restore the active tip.
    ///
    /// Headers whose ancestry does not reach genesis are skipped.
    #[instrument(skip(self))]
    pub fn load_chain(&self) -> StateResult<(BlockTree, ActiveChain)> {
        let mut children: HashMap<BlockHash, Vec<BlockHeader>> = HashMap::new();
        let mut total = 0usize;
        for (_, value) in self.storage.iter(ColumnFamily::Headers)? {
            let header = BlockHeader::from_bytes(&value)?;
            children.entry(header.prev_hash).or_default().push(header);
            total += 1;
        }

        let mut tree = BlockTree::new();
        let mut pending = vec![BlockHash::ZERO];
        while let Some(parent) = pending.pop() {
            for header in children.remove(&parent).unwrap_or_default() {
                let id = tree.insert(&header)?;
                pending.push(tree[id].hash);
            }
        }
        if tree.len() < total {
            warn!(orphans = total - tree.len(), "Skipped headers not connected to genesis");
        }

        let mut active = ActiveChain::new();
        if let Some(best) = self.best_block()? {
            match tree.get(&best) {
                Some(tip) => active.set_tip(&tree, Some(tip)),
                None => warn!(%best, "Stored best block is not in the header tree"),
            }
        }

        info!(headers = tree.len(), height = ?active.height(), "Loaded block index");
        Ok((tree, active))
    }
}

impl BlockSource for BlockStore {
    fn block_transactions(&self, node: &ChainNode) -> StateResult<Vec<Transaction>> {
        self.transactions(&node.hash)?
            .ok_or(StateError::BlockNotFound(node.hash))
    }

    fn find_transaction(&self, txid: &Txid) -> StateResult<Option<Transaction>> {
        let Some(bytes) = self.storage.get(ColumnFamily::TxIndex, &txid.0)? else {
            return Ok(None);
        };
        let block = BlockHash::from_slice(&bytes)
            .ok_or_else(|| StateError::Serialization("Invalid tx index entry".into()))?;
        Ok(self
            .transactions(&block)?
            .and_then(|txs| txs.into_iter().find(|tx| tx.txid() == *txid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{OutPoint, TxIn, TxOut};
    use diskcoin_storage::Database;
    use tempfile::TempDir;

    fn header(prev: BlockHash, nonce: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: prev,
            merkle_root: [0u8; 32],
            timestamp: 1_000 + nonce as u32,
            base_target: 1_000,
            plotter_id: 1,
            nonce,
            signature: [0u8; 32],
        }
    }

    fn coinbase(tag: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::NULL,
                script_sig: vec![tag],
            }],
            outputs: vec![
                TxOut {
                    value: 0,
                    script_pubkey: vec![],
                },
                TxOut {
                    value: 10,
                    script_pubkey: vec![tag],
                },
            ],
            lock_time: 0,
        }
    }

    fn open_store() -> (TempDir, BlockStore) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();
        (dir, BlockStore::new(Arc::new(db)))
    }

    #[test]
    fn test_block_roundtrip_and_tx_lookup() {
        let (_dir, store) = open_store();
        let genesis = header(BlockHash::ZERO, 0);
        let hash = store.put_block(&genesis, &[coinbase(1)]).unwrap();

        assert_eq!(store.header(&hash).unwrap(), Some(genesis));
        assert_eq!(store.transactions(&hash).unwrap(), Some(vec![coinbase(1)]));
        assert_eq!(
            store.find_transaction(&coinbase(1).txid()).unwrap(),
            Some(coinbase(1))
        );
        assert_eq!(store.find_transaction(&Txid([9u8; 32])).unwrap(), None);
    }

    #[test]
    fn test_load_chain_restores_tree_and_tip() {
        let (_dir, store) = open_store();
        let mut tree = BlockTree::new();
        let mut prev = BlockHash::ZERO;
        let mut last = None;
        for n in 0..10u64 {
            let h = header(prev, n);
            prev = store.put_block(&h, &[coinbase(n as u8)]).unwrap();
            last = Some(tree.insert(&h).unwrap());
        }
        // Side branch off height 5.
        let fork_parent = tree[tree.ancestor(last.unwrap(), 5).unwrap()].hash;
        store.put_block(&header(fork_parent, 100), &[]).unwrap();

        let mut active = ActiveChain::new();
        active.set_tip(&tree, last);
        store.set_best_chain(&tree, &active).unwrap();

        let (loaded, loaded_active) = store.load_chain().unwrap();
        assert_eq!(loaded.len(), 11);
        assert_eq!(loaded_active.height(), Some(9));
        assert_eq!(store.best_height().unwrap(), Some(9));
        assert_eq!(store.hash_at(9).unwrap(), Some(prev));
        assert_eq!(
            loaded_active.tip().map(|id| loaded[id].hash),
            Some(prev)
        );
    }

    #[test]
    fn test_shorter_best_chain_drops_stale_heights() {
        let (_dir, store) = open_store();
        let mut tree = BlockTree::new();
        let mut prev = BlockHash::ZERO;
        let mut ids = Vec::new();
        for n in 0..6u64 {
            let h = header(prev, n);
            prev = store.put_block(&h, &[]).unwrap();
            ids.push(tree.insert(&h).unwrap());
        }

        let mut active = ActiveChain::new();
        active.set_tip(&tree, Some(ids[5]));
        store.set_best_chain(&tree, &active).unwrap();
        active.set_tip(&tree, Some(ids[2]));
        store.set_best_chain(&tree, &active).unwrap();

        assert_eq!(store.best_height().unwrap(), Some(2));
        assert!(store.hash_at(3).unwrap().is_none());
        assert_eq!(store.hash_at(2).unwrap(), Some(tree[ids[2]].hash));
    }
}
