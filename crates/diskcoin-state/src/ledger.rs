//! Fork-aware stake ledger.
//!
//! Tracks the stake pledged to every address and the producers of recent
//! blocks, following the active chain block by block.
//!
//! ## State
//!
//! - Base table: stake as of the snapshot height (`sync_height`), which is
//!   also what the snapshot file holds.
//! - Two overlay generations: deltas of the blocks applied since. A block at
//!   cursor height `h` (before applying) lands in overlay `(h / 100) % 2`.
//! - Miner history: coinbase beneficiaries, bounded to `period + 100`.
//!
//! Every 100 blocks the older overlay is merged into the base table and the
//! snapshot height moves to 100 blocks behind the cursor, so the file never
//! reflects blocks close to the tip.
//!
//! ## Reorgs
//!
//! When the ledger cursor is not an ancestor of the requested block, both
//! overlays are dropped and the ledger replays from the snapshot block. A
//! reorg deeper than the snapshot is an error.
//!
//! ## Snapshot file
//!
//! Little-endian header `{version: i32, sync_height: i32, sync_hash: [u8; 32]}`
//! followed by `{address: [u8; 64] NUL padded, value: i64}` records.

use crate::config::{LedgerConfig, SNAPSHOT_INTERVAL, SNAPSHOT_VERSION};
use crate::history::MinerHistory;
use crate::rules::{LedgerRules, PledgeKind, StakeAddress};
use crate::source::BlockSource;
use crate::table::{Layer, StakeTables, TableStats};
use crate::tx::Transaction;
use crate::{StateError, StateResult};
use diskcoin_chain::{BlockHash, BlockTree, NodeId};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

/// Size of the snapshot file header.
pub const SNAPSHOT_HEADER_SIZE: usize = 4 + 4 + 32;

/// Size of one snapshot record.
pub const SNAPSHOT_RECORD_SIZE: usize = ADDRESS_FIELD_LEN + 8;

/// NUL-padded address field of a snapshot record.
const ADDRESS_FIELD_LEN: usize = 64;

/// Header of the snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: i32,
    pub sync_height: u32,
    pub sync_hash: BlockHash,
}

impl SnapshotHeader {
    fn to_bytes(self) -> [u8; SNAPSHOT_HEADER_SIZE] {
        let mut out = [0u8; SNAPSHOT_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&(self.sync_height as i32).to_le_bytes());
        out[8..40].copy_from_slice(self.sync_hash.as_bytes());
        out
    }

    fn from_bytes(data: &[u8]) -> Result<Self, String> {
        if data.len() < SNAPSHOT_HEADER_SIZE {
            return Err(format!(
                "header needs {SNAPSHOT_HEADER_SIZE} bytes, got {}",
                data.len()
            ));
        }
        let version = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if version != SNAPSHOT_VERSION {
            return Err(format!("unsupported version {version}"));
        }
        let sync_height = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let sync_height =
            u32::try_from(sync_height).map_err(|_| format!("negative sync height {sync_height}"))?;
        let sync_hash = BlockHash::from_slice(&data[8..40])
            .ok_or_else(|| "invalid sync hash".to_string())?;
        Ok(Self {
            version,
            sync_height,
            sync_hash,
        })
    }
}

fn encode_record(address: &StakeAddress, value: i64, out: &mut Vec<u8>) {
    let mut field = [0u8; ADDRESS_FIELD_LEN];
    let bytes = address.as_str().as_bytes();
    field[..bytes.len()].copy_from_slice(bytes);
    out.extend_from_slice(&field);
    out.extend_from_slice(&value.to_le_bytes());
}

fn decode_record(data: &[u8]) -> Option<(StakeAddress, i64)> {
    let field = &data[..ADDRESS_FIELD_LEN];
    let end = field.iter().position(|b| *b == 0).unwrap_or(ADDRESS_FIELD_LEN);
    let address = std::str::from_utf8(&field[..end]).ok()?;
    let address = StakeAddress::new(address).ok()?;

    let mut value = [0u8; 8];
    value.copy_from_slice(&data[ADDRESS_FIELD_LEN..SNAPSHOT_RECORD_SIZE]);
    Some((address, i64::from_le_bytes(value)))
}

/// Write through a temporary file so a crash never leaves a torn snapshot.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStats {
    pub sync_height: u32,
    pub added_height: u32,
    pub miner_entries: usize,
    pub tables: TableStats,
}

/// Per-address stake and recent producers, following one chain.
pub struct StakeLedger {
    path: PathBuf,
    config: LedgerConfig,
    rules: LedgerRules,
    genesis: BlockHash,
    sync_height: u32,
    sync_hash: BlockHash,
    added_height: u32,
    added_hash: BlockHash,
    tables: StakeTables,
    miners: MinerHistory,
}

impl StakeLedger {
    /// Load the ledger at `path` with the default pledge rules.
    pub fn load(
        path: impl AsRef<Path>,
        config: LedgerConfig,
        genesis: BlockHash,
    ) -> StateResult<Self> {
        Self::load_with_rules(path, config, genesis, LedgerRules::default())
    }

    /// Load the ledger at `path`.
    ///
    /// A missing, undersized, oversized or wrong-version file yields an
    /// empty ledger at genesis, and a fresh header is written in its place.
    pub fn load_with_rules(
        path: impl AsRef<Path>,
        config: LedgerConfig,
        genesis: BlockHash,
        rules: LedgerRules,
    ) -> StateResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut ledger = Self {
            tables: StakeTables::new(config.max_records),
            miners: MinerHistory::new(config.history_capacity()),
            path,
            config,
            rules,
            genesis,
            sync_height: 0,
            sync_hash: genesis,
            added_height: 0,
            added_hash: genesis,
        };

        if ledger.read_snapshot()? {
            info!(
                sync_height = ledger.sync_height,
                hash = %ledger.sync_hash,
                records = ledger.tables.stats().base_records,
                "Loaded stake ledger"
            );
        } else {
            ledger.write_bytes(&ledger.header().to_bytes());
        }
        Ok(ledger)
    }

    /// Read the snapshot file into the base table. `Ok(false)` means no usable state.
    fn read_snapshot(&mut self) -> StateResult<bool> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No stake snapshot, starting at genesis");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if size <= SNAPSHOT_HEADER_SIZE as u64 || size > self.config.max_file_size {
            warn!(
                size,
                max = self.config.max_file_size,
                "Stake snapshot size out of range, starting at genesis"
            );
            return Ok(false);
        }

        let data = fs::read(&self.path)?;
        let header = match SnapshotHeader::from_bytes(&data) {
            Ok(header) => header,
            Err(reason) => {
                warn!(%reason, "Unusable stake snapshot header, starting at genesis");
                return Ok(false);
            }
        };

        for chunk in data[SNAPSHOT_HEADER_SIZE..].chunks_exact(SNAPSHOT_RECORD_SIZE) {
            match decode_record(chunk) {
                Some((address, value)) => {
                    self.tables.add(Layer::Base, &address, value)?;
                }
                None => warn!("Skipping stake snapshot record with invalid address"),
            }
        }

        self.sync_height = header.sync_height;
        self.sync_hash = header.sync_hash;
        self.added_height = header.sync_height;
        self.added_hash = header.sync_hash;
        Ok(true)
    }

    fn header(&self) -> SnapshotHeader {
        SnapshotHeader {
            version: SNAPSHOT_VERSION,
            sync_height: self.sync_height,
            sync_hash: self.sync_hash,
        }
    }

    /// Serialize the header and every positive base record.
    fn encode_snapshot(&self) -> Vec<u8> {
        let mut out = self.header().to_bytes().to_vec();
        for record in self.tables.base_records().filter(|r| r.value > 0) {
            encode_record(&record.address, record.value, &mut out);
        }
        out
    }

    /// Write the snapshot file. Failures are logged and the in-memory state kept.
    fn persist(&self) {
        let bytes = self.encode_snapshot();
        if bytes.len() as u64 > self.config.max_file_size {
            error!(
                size = bytes.len(),
                max = self.config.max_file_size,
                "Stake snapshot exceeds size limit, not written"
            );
            return;
        }
        if self.write_bytes(&bytes) {
            info!(
                sync_height = self.sync_height,
                records = (bytes.len() - SNAPSHOT_HEADER_SIZE) / SNAPSHOT_RECORD_SIZE,
                "Wrote stake snapshot"
            );
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> bool {
        match write_atomic(&self.path, bytes) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to write stake snapshot");
                false
            }
        }
    }

    /// Bring the ledger to `target`, rewinding to the snapshot when the
    /// cursor is not on the target's chain. Returns the new ledger height.
    #[instrument(skip(self, tree, source), fields(target = target.index()))]
    pub fn step_to<S: BlockSource + ?Sized>(
        &mut self,
        tree: &BlockTree,
        source: &S,
        target: NodeId,
    ) -> StateResult<u32> {
        let node = tree
            .node(target)
            .ok_or(StateError::UnknownNode(target.index()))?;
        if node.height < self.sync_height {
            return Err(StateError::BehindSnapshot {
                target: node.height,
                sync_height: self.sync_height,
            });
        }

        let cursor_on_path = self.added_height <= node.height
            && tree
                .ancestor(target, self.added_height)
                .map(|id| tree[id].hash)
                == Some(self.added_hash);
        if cursor_on_path {
            if self.added_height == node.height {
                return Ok(self.added_height);
            }
        } else {
            self.rewind(tree, target)?;
        }

        let mut path = Vec::with_capacity((node.height - self.added_height) as usize);
        let mut walk = target;
        while tree[walk].height > self.added_height {
            path.push(walk);
            walk = tree.parent(walk).ok_or(StateError::MissingAncestor {
                height: tree[walk].height.saturating_sub(1),
                hash: tree[walk].hash,
            })?;
        }

        for id in path.into_iter().rev() {
            self.apply_block(tree, source, id)?;
        }
        Ok(self.added_height)
    }

    /// Drop every change above the snapshot height.
    ///
    /// The cursor is back at the snapshot even when `target` does not descend
    /// from it.
    fn rewind(&mut self, tree: &BlockTree, target: NodeId) -> StateResult<()> {
        info!(
            from = self.added_height,
            to = self.sync_height,
            "Rewinding stake ledger to snapshot"
        );
        self.tables.clear_overlays();
        let dropped = self.miners.truncate_above(self.sync_height);
        debug!(dropped, "Dropped miner history above snapshot");

        self.added_height = self.sync_height;
        self.added_hash = self.sync_hash;

        let snapshot_on_chain = tree
            .ancestor(target, self.sync_height)
            .map(|id| tree[id].hash)
            == Some(self.sync_hash);
        if !snapshot_on_chain {
            return Err(StateError::SnapshotNotOnChain {
                height: self.sync_height,
                hash: self.sync_hash,
            });
        }
        Ok(())
    }

    fn apply_block<S: BlockSource + ?Sized>(
        &mut self,
        tree: &BlockTree,
        source: &S,
        id: NodeId,
    ) -> StateResult<()> {
        let node = &tree[id];
        let parent_hash = node.parent.map_or(BlockHash::ZERO, |p| tree[p].hash);
        if parent_hash != self.added_hash || node.height != self.added_height + 1 {
            return Err(StateError::ParentMismatch {
                height: node.height,
                expected: self.added_hash,
                found: parent_hash,
            });
        }

        let txs = source.block_transactions(node)?;
        let generation = ((self.added_height / SNAPSHOT_INTERVAL) % 2) as usize;
        let mut producers = Vec::new();
        let mut changes = Vec::new();
        for tx in &txs {
            if tx.is_coinbase() {
                producers.push(self.producer(node.height, tx)?);
            } else if let Some(change) = self.resolve_pledge(source, node.height, tx)? {
                changes.push(change);
            }
        }

        self.tables.add_all(Layer::Overlay(generation), &changes)?;
        for (address, amount) in &changes {
            debug!(
                height = node.height,
                %address,
                amount,
                total = self.tables.stake(address.as_str()),
                "Applied stake change"
            );
        }
        for producer in producers {
            self.miners.push_back(node.height, producer);
        }

        self.added_height = node.height;
        self.added_hash = node.hash;
        debug!(
            height = node.height,
            hash = %node.hash,
            txs = txs.len(),
            "Applied block to stake ledger"
        );

        if self.added_height % SNAPSHOT_INTERVAL == 0 {
            self.snapshot(tree, id)?;
        }
        Ok(())
    }

    /// Beneficiary address of a coinbase, empty when it does not encode.
    fn producer(&self, height: u32, coinbase: &Transaction) -> StateResult<String> {
        let beneficiary = coinbase
            .outputs
            .get(1)
            .ok_or_else(|| StateError::InvalidCoinbase {
                height,
                reason: format!("{} outputs, beneficiary is output 1", coinbase.outputs.len()),
            })?;
        Ok(self
            .rules
            .codec
            .encode(&beneficiary.script_pubkey)
            .unwrap_or_default())
    }

    /// Stake change carried by `tx`, if any.
    fn resolve_pledge<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        height: u32,
        tx: &Transaction,
    ) -> StateResult<Option<(StakeAddress, i64)>> {
        let (kind, output) = match self.rules.classifier.classify(tx) {
            PledgeKind::None => return Ok(None),
            kind @ PledgeKind::Pledge { output, .. } => (kind, output),
            kind @ PledgeKind::Unpledge { output, .. } => (kind, output),
        };

        let address = tx
            .outputs
            .get(output)
            .and_then(|out| self.rules.codec.encode(&out.script_pubkey))
            .and_then(|address| StakeAddress::new(address).ok());
        let Some(address) = address else {
            warn!(
                height,
                txid = %tx.txid(),
                output,
                "Pledge output has no valid address, skipping"
            );
            return Ok(None);
        };

        let amount = match kind {
            PledgeKind::Pledge { input, .. } => match tx.outputs.get(input) {
                Some(out) => out.value,
                None => {
                    warn!(
                        height,
                        txid = %tx.txid(),
                        input,
                        "Pledge amount output missing, skipping"
                    );
                    return Ok(None);
                }
            },
            _ => self.pledged_amount(source, tx)?.wrapping_neg(),
        };
        Ok(Some((address, amount)))
    }

    /// Amount locked by the pledge that `unpledge` spends with its first input.
    fn pledged_amount<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        unpledge: &Transaction,
    ) -> StateResult<i64> {
        let spent = unpledge
            .inputs
            .first()
            .map(|input| input.prevout.txid)
            .ok_or(StateError::UnresolvedPledge(unpledge.txid()))?;
        let pledge = source
            .find_transaction(&spent)?
            .ok_or(StateError::UnresolvedPledge(spent))?;

        match self.rules.classifier.classify(&pledge) {
            PledgeKind::Pledge { input, .. } => pledge
                .outputs
                .get(input)
                .map(|out| out.value)
                .ok_or(StateError::NotAPledge(spent)),
            _ => Err(StateError::NotAPledge(spent)),
        }
    }

    /// Merge the older overlay and move the snapshot 100 blocks behind the cursor.
    fn snapshot(&mut self, tree: &BlockTree, applied: NodeId) -> StateResult<()> {
        let generation = ((self.added_height / SNAPSHOT_INTERVAL) % 2) as usize;
        let sync_height = self.added_height - SNAPSHOT_INTERVAL;
        let sync_id = tree
            .ancestor(applied, sync_height)
            .ok_or(StateError::MissingAncestor {
                height: sync_height,
                hash: tree[applied].hash,
            })?;

        let summary = self.tables.merge_overlay(generation);
        self.sync_height = sync_height;
        self.sync_hash = tree[sync_id].hash;
        info!(
            sync_height,
            hash = %self.sync_hash,
            summed = summary.summed,
            deleted = summary.deleted,
            promoted = summary.promoted,
            "Merged stake overlay"
        );

        self.persist();
        Ok(())
    }

    /// Stake of `address`: base table plus both overlays.
    pub fn stake(&self, address: &str) -> i64 {
        self.tables.stake(address)
    }

    /// Blocks produced by `address` among the last `period - 1` blocks.
    ///
    /// A history shorter than `period` (after a load or a rewind) is first
    /// filled backwards from stored blocks, stopping at height 1.
    pub fn mined_count<S: BlockSource + ?Sized>(
        &mut self,
        tree: &BlockTree,
        source: &S,
        address: &str,
    ) -> StateResult<usize> {
        let period = self.config.period as usize;
        if self.miners.len() < period {
            let cursor = tree
                .get(&self.added_hash)
                .ok_or(StateError::UnknownBlock(self.added_hash))?;

            while self.miners.len() < period {
                let next = match self.miners.front() {
                    Some(entry) => entry.height.saturating_sub(1),
                    None => self.added_height,
                };
                if next == 0 {
                    break;
                }

                let id = tree
                    .ancestor(cursor, next)
                    .ok_or(StateError::MissingAncestor {
                        height: next,
                        hash: self.added_hash,
                    })?;
                let txs = source.block_transactions(&tree[id])?;
                let coinbase = txs
                    .first()
                    .filter(|tx| tx.is_coinbase() && tx.outputs.len() == 2)
                    .ok_or_else(|| StateError::InvalidCoinbase {
                        height: next,
                        reason: "expected a coinbase with 2 outputs".to_string(),
                    })?;
                let producer = self
                    .rules
                    .codec
                    .encode(&coinbase.outputs[1].script_pubkey)
                    .unwrap_or_default();
                self.miners.push_front(next, producer);
            }
        }

        Ok(self.miners.count(address, period.saturating_sub(1)))
    }

    /// Log the miner window, only entries of `address` when given.
    pub fn log_miner_window(&self, address: Option<&str>) {
        let filter = address.filter(|a| !a.is_empty());
        let mut matched = 0usize;
        for entry in self.miners.recent(self.config.period.saturating_sub(1) as usize) {
            let show = match filter {
                Some(wanted) if entry.address == wanted => {
                    matched += 1;
                    true
                }
                Some(_) => false,
                None => true,
            };
            if show {
                debug!(
                    height = entry.height,
                    address = %entry.address,
                    matched,
                    "Miner window entry"
                );
            }
        }
        info!(
            address = filter.unwrap_or("*"),
            matched,
            sync_height = self.sync_height,
            added_height = self.added_height,
            "Miner window dump complete"
        );
    }

    /// Rewrite the file as a bare header and reload, which restarts the
    /// ledger from genesis.
    pub fn reinit(&mut self) -> StateResult<()> {
        warn!(path = %self.path.display(), "Reinitializing stake ledger");
        self.write_bytes(&self.header().to_bytes());

        let rules = std::mem::take(&mut self.rules);
        *self = Self::load_with_rules(
            self.path.clone(),
            self.config.clone(),
            self.genesis,
            rules,
        )?;
        Ok(())
    }

    /// Height of the last applied block.
    pub fn height(&self) -> u32 {
        self.added_height
    }

    /// Hash of the last applied block.
    pub fn tip_hash(&self) -> BlockHash {
        self.added_hash
    }

    /// Height covered by the snapshot file.
    pub fn sync_height(&self) -> u32 {
        self.sync_height
    }

    /// Block hash at the snapshot height.
    pub fn sync_hash(&self) -> BlockHash {
        self.sync_hash
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Current counters.
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            sync_height: self.sync_height,
            added_height: self.added_height,
            miner_entries: self.miners.len(),
            tables: self.tables.stats(),
        }
    }
}

impl std::fmt::Debug for StakeLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StakeLedger")
            .field("path", &self.path)
            .field("sync_height", &self.sync_height)
            .field("added_height", &self.added_height)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolError;
    use crate::rules::DcopClassifier;
    use crate::source::MemoryBlockSource;
    use crate::tx::{OutPoint, TxIn, TxOut, Txid};
    use diskcoin_chain::BlockHeader;
    use tempfile::TempDir;

    const MINER: &[u8] = &[0x01, 0x02];
    const CAROL: &[u8] = &[0xca, 0x40];
    const ALICE: &[u8] = &[0xa1, 0xce];
    const BOB: &[u8] = &[0xb0, 0xb0];

    fn addr(script: &[u8]) -> String {
        hex::encode(script)
    }

    fn miner_for(height: u32) -> &'static [u8] {
        if height % 3 == 0 {
            CAROL
        } else {
            MINER
        }
    }

    fn coinbase(height: u32) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::NULL,
                script_sig: height.to_le_bytes().to_vec(),
            }],
            outputs: vec![
                TxOut {
                    value: 0,
                    script_pubkey: vec![],
                },
                TxOut {
                    value: 50,
                    script_pubkey: miner_for(height).to_vec(),
                },
            ],
            lock_time: 0,
        }
    }

    fn pledge(amount: i64, to: &[u8]) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint {
                    txid: Txid([0xee; 32]),
                    vout: amount as u32,
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
                    script_pubkey: to.to_vec(),
                },
            ],
            lock_time: 0,
        }
    }

    fn unpledge(spent: Txid, to: &[u8]) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint {
                    txid: spent,
                    vout: 0,
                },
                script_sig: vec![],
            }],
            outputs: vec![
                TxOut {
                    value: 1_000,
                    script_pubkey: to.to_vec(),
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

    struct Fixture {
        dir: TempDir,
        tree: BlockTree,
        source: MemoryBlockSource,
        genesis: NodeId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut tree = BlockTree::new();
            let genesis = tree
                .insert(&BlockHeader {
                    version: 1,
                    prev_hash: BlockHash::ZERO,
                    merkle_root: [0u8; 32],
                    timestamp: 1_000,
                    base_target: 1_000,
                    plotter_id: 0,
                    nonce: 0,
                    signature: [0u8; 32],
                })
                .unwrap();
            Self {
                dir: TempDir::new().unwrap(),
                tree,
                source: MemoryBlockSource::new(),
                genesis,
            }
        }

        /// Append `count` blocks on top of `from`; `body` adds non-coinbase transactions.
        fn extend(
            &mut self,
            from: NodeId,
            count: u32,
            branch: u64,
            body: impl Fn(u32) -> Vec<Transaction>,
        ) -> NodeId {
            let mut tip = from;
            for _ in 0..count {
                let parent = &self.tree[tip];
                let height = parent.height + 1;
                let header = BlockHeader {
                    version: 1,
                    prev_hash: parent.hash,
                    merkle_root: [0u8; 32],
                    timestamp: 1_000 + height * 300,
                    base_target: 1_000,
                    plotter_id: branch,
                    nonce: u64::from(height),
                    signature: [0u8; 32],
                };
                let mut txs = vec![coinbase(height)];
                txs.extend(body(height));
                tip = self.tree.insert(&header).unwrap();
                self.source.insert_block(self.tree[tip].hash, txs);
            }
            tip
        }

        fn path(&self) -> PathBuf {
            self.dir.path().join("stakedb.dat")
        }

        fn ledger_with(&self, config: LedgerConfig) -> StakeLedger {
            StakeLedger::load(self.path(), config, self.tree[self.genesis].hash).unwrap()
        }

        fn ledger(&self) -> StakeLedger {
            self.ledger_with(LedgerConfig::default())
        }
    }

    #[test]
    fn test_fresh_load_writes_header() {
        let fx = Fixture::new();
        let ledger = fx.ledger();
        assert_eq!(ledger.height(), 0);
        assert_eq!(ledger.tip_hash(), fx.tree[fx.genesis].hash);

        let data = fs::read(fx.path()).unwrap();
        assert_eq!(data.len(), SNAPSHOT_HEADER_SIZE);
        let header = SnapshotHeader::from_bytes(&data).unwrap();
        assert_eq!(header.sync_height, 0);
        assert_eq!(header.sync_hash, fx.tree[fx.genesis].hash);
    }

    #[test]
    fn test_wrong_version_starts_fresh() {
        let fx = Fixture::new();
        let mut data = SnapshotHeader {
            version: 2,
            sync_height: 500,
            sync_hash: BlockHash([7u8; 32]),
        }
        .to_bytes()
        .to_vec();
        data.extend_from_slice(&[0u8; SNAPSHOT_RECORD_SIZE]);
        fs::write(fx.path(), &data).unwrap();

        let ledger = fx.ledger();
        assert_eq!(ledger.height(), 0);
        assert_eq!(fs::read(fx.path()).unwrap().len(), SNAPSHOT_HEADER_SIZE);
    }

    #[test]
    fn test_oversized_file_starts_fresh() {
        let fx = Fixture::new();
        fs::write(fx.path(), vec![1u8; 4096]).unwrap();
        let config = LedgerConfig {
            max_file_size: 1024,
            ..LedgerConfig::default()
        };
        assert_eq!(fx.ledger_with(config).height(), 0);
    }

    #[test]
    fn test_pledge_visible_and_step_idempotent() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 50, 0, |h| {
            if h == 10 {
                vec![pledge(1_000, ALICE)]
            } else {
                vec![]
            }
        });

        let mut ledger = fx.ledger();
        assert_eq!(ledger.step_to(&fx.tree, &fx.source, tip).unwrap(), 50);
        assert_eq!(ledger.stake(&addr(ALICE)), 1_000);
        assert_eq!(ledger.stats().tables.overlay_records, [1, 0]);

        assert_eq!(ledger.step_to(&fx.tree, &fx.source, tip).unwrap(), 50);
        assert_eq!(ledger.stake(&addr(ALICE)), 1_000);
    }

    #[test]
    fn test_snapshot_lags_and_reloads() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 250, 0, |h| match h {
            10 => vec![pledge(1_000, ALICE)],
            150 => vec![pledge(500, BOB)],
            _ => vec![],
        });

        let mut ledger = fx.ledger();
        ledger.step_to(&fx.tree, &fx.source, tip).unwrap();
        assert_eq!(ledger.sync_height(), 100);
        assert_eq!(ledger.stake(&addr(BOB)), 500);
        assert_eq!(
            fs::read(fx.path()).unwrap().len(),
            SNAPSHOT_HEADER_SIZE + SNAPSHOT_RECORD_SIZE
        );

        let mut reloaded = fx.ledger();
        assert_eq!(reloaded.height(), 100);
        assert_eq!(reloaded.stake(&addr(ALICE)), 1_000);
        assert_eq!(reloaded.stake(&addr(BOB)), 0);

        assert_eq!(reloaded.step_to(&fx.tree, &fx.source, tip).unwrap(), 250);
        assert_eq!(reloaded.stake(&addr(ALICE)), 1_000);
        assert_eq!(reloaded.stake(&addr(BOB)), 500);
    }

    #[test]
    fn test_unpledge_releases_stake() {
        let mut fx = Fixture::new();
        let locked = pledge(1_000, ALICE);
        let spent = locked.txid();
        let tip = fx.extend(fx.genesis, 170, 0, move |h| match h {
            10 => vec![locked.clone()],
            160 => vec![unpledge(spent, ALICE)],
            _ => vec![],
        });

        let mut ledger = fx.ledger();
        let before = fx.tree.ancestor(tip, 159).unwrap();
        ledger.step_to(&fx.tree, &fx.source, before).unwrap();
        assert_eq!(ledger.stake(&addr(ALICE)), 1_000);

        ledger.step_to(&fx.tree, &fx.source, tip).unwrap();
        assert_eq!(ledger.stake(&addr(ALICE)), 0);
    }

    #[test]
    fn test_fork_rewinds_to_snapshot() {
        let mut fx = Fixture::new();
        let main = fx.extend(fx.genesis, 150, 0, |h| {
            if h == 120 {
                vec![pledge(1_000, ALICE)]
            } else {
                vec![]
            }
        });
        let fork_base = fx.tree.ancestor(main, 110).unwrap();
        let fork = fx.extend(fork_base, 60, 1, |h| {
            if h == 130 {
                vec![pledge(300, BOB)]
            } else {
                vec![]
            }
        });

        let mut ledger = fx.ledger();
        ledger.step_to(&fx.tree, &fx.source, main).unwrap();
        assert_eq!(ledger.stake(&addr(ALICE)), 1_000);

        assert_eq!(ledger.step_to(&fx.tree, &fx.source, fork).unwrap(), 170);
        assert_eq!(ledger.tip_hash(), fx.tree[fork].hash);
        assert_eq!(ledger.stake(&addr(ALICE)), 0);
        assert_eq!(ledger.stake(&addr(BOB)), 300);
    }

    #[test]
    fn test_step_behind_snapshot_errors() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 250, 0, |_| vec![]);
        let mut ledger = fx.ledger();
        ledger.step_to(&fx.tree, &fx.source, tip).unwrap();

        let old = fx.tree.ancestor(tip, 50).unwrap();
        assert!(matches!(
            ledger.step_to(&fx.tree, &fx.source, old),
            Err(StateError::BehindSnapshot {
                target: 50,
                sync_height: 100
            })
        ));
    }

    #[test]
    fn test_fork_below_snapshot_errors() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 250, 0, |h| {
            if h == 220 {
                vec![pledge(700, BOB)]
            } else {
                vec![]
            }
        });
        let fork_base = fx.tree.ancestor(tip, 50).unwrap();
        let fork = fx.extend(fork_base, 250, 1, |_| vec![]);

        let mut ledger = fx.ledger();
        ledger.step_to(&fx.tree, &fx.source, tip).unwrap();
        assert_eq!(ledger.stake(&addr(BOB)), 700);
        assert!(matches!(
            ledger.step_to(&fx.tree, &fx.source, fork),
            Err(StateError::SnapshotNotOnChain { height: 100, .. })
        ));

        // Overlays are gone and the cursor sits on the snapshot.
        assert_eq!(ledger.height(), ledger.sync_height());
        assert_eq!(ledger.height(), 100);
        assert_eq!(ledger.tip_hash(), ledger.sync_hash());
        assert_eq!(ledger.stake(&addr(BOB)), 0);
        assert_eq!(ledger.stats().tables.overlay_records, [0, 0]);
        assert_eq!(ledger.stats().miner_entries, 100);

        assert_eq!(ledger.step_to(&fx.tree, &fx.source, tip).unwrap(), 250);
        assert_eq!(ledger.stake(&addr(BOB)), 700);
    }

    #[test]
    fn test_failed_block_is_not_half_applied() {
        let mut fx = Fixture::new();
        let base = fx.extend(fx.genesis, 2, 0, |_| vec![]);
        let bad = fx.extend(base, 1, 0, |_| {
            vec![pledge(1_000, ALICE), unpledge(Txid([0x42; 32]), ALICE)]
        });
        let sibling = fx.extend(base, 1, 1, |_| vec![]);

        let mut ledger = fx.ledger();
        assert!(matches!(
            ledger.step_to(&fx.tree, &fx.source, bad),
            Err(StateError::UnresolvedPledge(_))
        ));
        assert_eq!(ledger.height(), 2);
        assert_eq!(ledger.tip_hash(), fx.tree[base].hash);
        assert_eq!(ledger.stake(&addr(ALICE)), 0);
        assert_eq!(ledger.stats().miner_entries, 2);
        assert_eq!(ledger.stats().tables.overlay_records, [0, 0]);

        assert_eq!(ledger.step_to(&fx.tree, &fx.source, sibling).unwrap(), 3);
        assert_eq!(ledger.stake(&addr(ALICE)), 0);
        assert_eq!(ledger.stats().miner_entries, 3);
        // Heights 1 and 2 went to MINER, height 3 to CAROL, once.
        assert_eq!(
            ledger.mined_count(&fx.tree, &fx.source, &addr(CAROL)).unwrap(),
            1
        );
    }

    #[test]
    fn test_pool_exhaustion_keeps_cursor() {
        let mut fx = Fixture::new();
        let base = fx.extend(fx.genesis, 2, 0, |h| {
            if h == 2 {
                vec![pledge(100, ALICE)]
            } else {
                vec![]
            }
        });
        let tip = fx.extend(base, 1, 0, |_| {
            vec![pledge(50, ALICE), pledge(60, BOB), pledge(70, CAROL)]
        });

        let mut ledger = fx.ledger_with(LedgerConfig {
            max_records: Some(2),
            ..LedgerConfig::default()
        });
        ledger.step_to(&fx.tree, &fx.source, base).unwrap();
        assert!(matches!(
            ledger.step_to(&fx.tree, &fx.source, tip),
            Err(StateError::Pool(PoolError::Exhausted { .. }))
        ));

        assert_eq!(ledger.height(), 2);
        assert_eq!(ledger.tip_hash(), fx.tree[base].hash);
        assert_eq!(ledger.stake(&addr(ALICE)), 100);
        assert_eq!(ledger.stake(&addr(BOB)), 0);
        assert_eq!(ledger.stake(&addr(CAROL)), 0);
        assert_eq!(ledger.stats().miner_entries, 2);
        assert_eq!(ledger.stats().tables.pool.live, 1);
    }

    #[test]
    fn test_unresolved_unpledge_errors() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 5, 0, |h| {
            if h == 3 {
                vec![unpledge(Txid([0x42; 32]), ALICE)]
            } else {
                vec![]
            }
        });

        let mut ledger = fx.ledger();
        assert!(matches!(
            ledger.step_to(&fx.tree, &fx.source, tip),
            Err(StateError::UnresolvedPledge(_))
        ));
    }

    #[test]
    fn test_unpledge_of_plain_transaction_errors() {
        let mut fx = Fixture::new();
        let mut not_pledge = pledge(10, ALICE);
        not_pledge.outputs.truncate(1);
        let spent = not_pledge.txid();
        let tip = fx.extend(fx.genesis, 5, 0, move |h| match h {
            2 => vec![not_pledge.clone()],
            4 => vec![unpledge(spent, ALICE)],
            _ => vec![],
        });

        let mut ledger = fx.ledger();
        assert!(matches!(
            ledger.step_to(&fx.tree, &fx.source, tip),
            Err(StateError::NotAPledge(_))
        ));
    }

    #[test]
    fn test_invalid_address_is_skipped() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 5, 0, |h| {
            if h == 2 {
                vec![pledge(1_000, &[0x33; 40])]
            } else {
                vec![]
            }
        });

        let mut ledger = fx.ledger();
        assert_eq!(ledger.step_to(&fx.tree, &fx.source, tip).unwrap(), 5);
        assert_eq!(ledger.stats().tables.overlay_records, [0, 0]);
    }

    #[test]
    fn test_mined_count_matches_window() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 100, 0, |_| vec![]);
        let config = LedgerConfig {
            period: 50,
            ..LedgerConfig::default()
        };

        let mut ledger = fx.ledger_with(config);
        ledger.step_to(&fx.tree, &fx.source, tip).unwrap();
        // Window is heights 52..=100; multiples of 3 there are 54..=99.
        assert_eq!(ledger.mined_count(&fx.tree, &fx.source, &addr(CAROL)).unwrap(), 16);
        assert_eq!(ledger.mined_count(&fx.tree, &fx.source, &addr(MINER)).unwrap(), 33);
    }

    #[test]
    fn test_mined_count_bootstraps_after_reload() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 250, 0, |_| vec![]);
        let config = LedgerConfig {
            period: 50,
            ..LedgerConfig::default()
        };
        fx.ledger_with(config.clone())
            .step_to(&fx.tree, &fx.source, tip)
            .unwrap();

        let mut reloaded = fx.ledger_with(config);
        assert_eq!(reloaded.height(), 100);
        assert_eq!(reloaded.stats().miner_entries, 0);
        assert_eq!(reloaded.mined_count(&fx.tree, &fx.source, &addr(CAROL)).unwrap(), 16);
        assert_eq!(reloaded.stats().miner_entries, 50);
    }

    #[test]
    fn test_mined_count_stops_at_height_one() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 10, 0, |_| vec![]);
        let mut ledger = fx.ledger();
        ledger.step_to(&fx.tree, &fx.source, tip).unwrap();

        assert_eq!(ledger.mined_count(&fx.tree, &fx.source, &addr(CAROL)).unwrap(), 3);
        assert_eq!(ledger.mined_count(&fx.tree, &fx.source, &addr(MINER)).unwrap(), 7);
        ledger.log_miner_window(Some(&addr(CAROL)));
        ledger.log_miner_window(None);
    }

    #[test]
    fn test_reinit_restarts_from_genesis() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 250, 0, |h| {
            if h == 10 {
                vec![pledge(1_000, ALICE)]
            } else {
                vec![]
            }
        });
        let mut ledger = fx.ledger();
        ledger.step_to(&fx.tree, &fx.source, tip).unwrap();

        ledger.reinit().unwrap();
        assert_eq!(ledger.height(), 0);
        assert_eq!(ledger.stake(&addr(ALICE)), 0);
        assert_eq!(fs::read(fx.path()).unwrap().len(), SNAPSHOT_HEADER_SIZE);

        assert_eq!(ledger.step_to(&fx.tree, &fx.source, tip).unwrap(), 250);
        assert_eq!(ledger.stake(&addr(ALICE)), 1_000);
    }

    #[test]
    fn test_oversized_snapshot_is_not_written() {
        let mut fx = Fixture::new();
        let tip = fx.extend(fx.genesis, 200, 0, |h| {
            if h == 10 {
                vec![pledge(1_000, ALICE)]
            } else {
                vec![]
            }
        });
        let config = LedgerConfig {
            max_file_size: 100,
            ..LedgerConfig::default()
        };

        let mut ledger = fx.ledger_with(config);
        ledger.step_to(&fx.tree, &fx.source, tip).unwrap();
        assert_eq!(ledger.sync_height(), 100);
        assert_eq!(ledger.stake(&addr(ALICE)), 1_000);
        assert_eq!(fs::read(fx.path()).unwrap().len(), SNAPSHOT_HEADER_SIZE);
    }
}
