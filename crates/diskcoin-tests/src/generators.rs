//! Test data generators for integration tests.
//!
//! Builds block trees whose headers follow the consensus rules (base target
//! and signature seed are derived from the parent) and whose bodies carry a
//! coinbase plus any pledge traffic a test asks for.

use diskcoin_chain::{BlockHash, BlockHeader, BlockTree, NodeId};
use diskcoin_consensus::{generation_signature, BaseTargetAdjustment, ChainParams};
use diskcoin_state::{
    AddressCodec, BlockStore, DcopClassifier, HexAddressCodec, MemoryBlockSource, OutPoint,
    PledgeKind, StateResult, Transaction, TxIn, TxOut, Txid,
};

/// Seconds between generated blocks unless a plan says otherwise.
pub const BLOCK_SPACING: u32 = 300;

/// Timestamp of the generated genesis block.
pub const GENESIS_TIME: u32 = 1_500_000_000;

/// Output script of a test account.
pub fn account_script(seed: u8) -> Vec<u8> {
    vec![0x76, 0xa9, seed, seed.wrapping_mul(7)]
}

/// Ledger address of a test account.
pub fn account_address(seed: u8) -> String {
    HexAddressCodec
        .encode(&account_script(seed))
        .unwrap_or_default()
}

/// Coinbase paying `miner` in output 1.
pub fn coinbase_tx(height: u32, miner: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::NULL,
            script_sig: height.to_le_bytes().to_vec(),
        }],
        outputs: vec![
            TxOut {
                value: 0,
                script_pubkey: vec![0x6a],
            },
            TxOut {
                value: 5_000,
                script_pubkey: account_script(miner),
            },
        ],
        lock_time: 0,
    }
}

/// Pledge of `amount` to account `to`. `nonce` keeps otherwise identical pledges apart.
pub fn pledge_tx(amount: i64, to: u8, nonce: u32) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint {
                txid: Txid([0xfe; 32]),
                vout: nonce,
            },
            script_sig: vec![],
        }],
        outputs: vec![
            TxOut {
                value: amount,
                script_pubkey: vec![0x51],
            },
            TxOut {
                value: 0,
                script_pubkey: DcopClassifier::marker_script(PledgeKind::Pledge {
                    input: 0,
                    output: 2,
                }),
            },
            TxOut {
                value: 0,
                script_pubkey: account_script(to),
            },
        ],
        lock_time: 0,
    }
}

/// Unpledge releasing `pledge` back to account `to`.
pub fn unpledge_tx(pledge: &Transaction, to: u8) -> Transaction {
    let refund = pledge.outputs.first().map_or(0, |out| out.value);
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint {
                txid: pledge.txid(),
                vout: 0,
            },
            script_sig: vec![],
        }],
        outputs: vec![
            TxOut {
                value: refund,
                script_pubkey: account_script(to),
            },
            TxOut {
                value: 0,
                script_pubkey: DcopClassifier::marker_script(PledgeKind::Unpledge {
                    input: 0,
                    output: 0,
                }),
            },
        ],
        lock_time: 0,
    }
}

/// Contents of one generated block.
#[derive(Debug, Clone)]
pub struct BlockPlan {
    /// Account receiving the coinbase.
    pub miner: u8,
    /// Transactions after the coinbase.
    pub txs: Vec<Transaction>,
    /// Seconds since the parent.
    pub gap: u32,
}

impl BlockPlan {
    /// Empty block mined by `miner`.
    pub fn mined_by(miner: u8) -> Self {
        Self {
            miner,
            txs: Vec::new(),
            gap: BLOCK_SPACING,
        }
    }

    /// Add a transaction.
    pub fn with_tx(mut self, tx: Transaction) -> Self {
        self.txs.push(tx);
        self
    }

    /// Override the block interval.
    pub fn with_gap(mut self, gap: u32) -> Self {
        self.gap = gap;
        self
    }
}

impl Default for BlockPlan {
    fn default() -> Self {
        Self::mined_by(0)
    }
}

/// Generated block tree plus block bodies.
pub struct ChainBuilder {
    tree: BlockTree,
    source: MemoryBlockSource,
    blocks: Vec<(BlockHeader, Vec<Transaction>)>,
    adjustment: BaseTargetAdjustment,
    genesis: NodeId,
}

impl ChainBuilder {
    /// Create a tree holding only a genesis block.
    pub fn new() -> Self {
        let params = ChainParams::mainnet();
        let header = BlockHeader {
            version: 1,
            prev_hash: BlockHash::ZERO,
            merkle_root: [0u8; 32],
            timestamp: GENESIS_TIME,
            base_target: params.max_base_target,
            plotter_id: 0,
            nonce: 0,
            signature: [0u8; 32],
        };
        let mut tree = BlockTree::new();
        let genesis = tree.insert(&header).expect("Failed to insert genesis");
        let mut source = MemoryBlockSource::new();
        source.insert_block(tree[genesis].hash, Vec::new());

        Self {
            tree,
            source,
            blocks: vec![(header, Vec::new())],
            adjustment: BaseTargetAdjustment::with_params(
                params.max_base_target,
                params.target_spacing,
            ),
            genesis,
        }
    }

    pub fn genesis(&self) -> NodeId {
        self.genesis
    }

    pub fn genesis_hash(&self) -> BlockHash {
        self.tree[self.genesis].hash
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn source(&self) -> &MemoryBlockSource {
        &self.source
    }

    /// Every generated block, in insertion order.
    pub fn blocks(&self) -> &[(BlockHeader, Vec<Transaction>)] {
        &self.blocks
    }

    /// Add one block on top of `parent`. `branch` becomes the plotter id, so
    /// equal plans on different branches still produce different blocks.
    pub fn push(&mut self, parent: NodeId, branch: u64, plan: BlockPlan) -> NodeId {
        let base_target = self
            .adjustment
            .calculate(&self.tree, parent)
            .expect("Failed to calculate base target");
        let parent_node = &self.tree[parent];
        let height = parent_node.height + 1;
        let header = BlockHeader {
            version: 1,
            prev_hash: parent_node.hash,
            merkle_root: [height as u8; 32],
            timestamp: parent_node.timestamp.wrapping_add(plan.gap),
            base_target,
            plotter_id: branch,
            nonce: u64::from(height),
            signature: generation_signature(parent_node),
        };

        let mut txs = Vec::with_capacity(plan.txs.len() + 1);
        txs.push(coinbase_tx(height, plan.miner));
        txs.extend(plan.txs);

        let id = self.tree.insert(&header).expect("Failed to insert header");
        self.source.insert_block(self.tree[id].hash, txs.clone());
        self.blocks.push((header, txs));
        id
    }

    /// Add `count` blocks on top of `from`; `plan` is called with each new height.
    pub fn extend(
        &mut self,
        from: NodeId,
        count: u32,
        branch: u64,
        mut plan: impl FnMut(u32) -> BlockPlan,
    ) -> NodeId {
        let mut tip = from;
        for _ in 0..count {
            let height = self.tree[tip].height + 1;
            tip = self.push(tip, branch, plan(height));
        }
        tip
    }

    /// Ancestor of `tip` at `height`.
    pub fn at(&self, tip: NodeId, height: u32) -> NodeId {
        self.tree
            .ancestor(tip, height)
            .expect("Height above the tip")
    }

    /// Store every generated block.
    pub fn write_to(&self, store: &BlockStore) -> StateResult<()> {
        for (header, txs) in &self.blocks {
            store.put_block(header, txs)?;
        }
        Ok(())
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Miner of `height` in a fixed rotation over `accounts` producers.
pub fn rotating_miner(height: u32, accounts: u8) -> u8 {
    let accounts = u32::from(accounts.max(1));
    // Uneven rotation so counts differ between accounts.
    ((height.wrapping_mul(2_654_435_761) >> 7) % accounts) as u8
}
