//! # diskcoin-state
//!
//! Chain-derived state for the Diskcoin node.
//!
//! This crate provides:
//! - The stake ledger: per-address pledged amounts and recent block
//!   producers, persisted as a lagging snapshot and kept in step with the
//!   active chain across reorgs
//! - A slab pool for ledger records
//! - A minimal transaction model and pledge classification
//! - RocksDB-backed block storage
//!
//! ## Architecture
//!
//! - `StakeLedger`: the ledger state machine (load, step, snapshot, queries)
//! - `StakeService`: owns a ledger and a `BlockSource`, exposes lookups
//! - `BlockStore`: headers, bodies and the active chain in `diskcoin-storage`

mod config;
mod error;
mod history;
mod ledger;
mod pool;
mod rules;
mod service;
mod source;
mod store;
mod table;
mod tx;

pub use config::{
    LedgerConfig, DEFAULT_MAX_FILE_SIZE, DEFAULT_PERIOD, SNAPSHOT_INTERVAL, SNAPSHOT_VERSION,
};
pub use error::{StateError, StateResult};
pub use history::{MinerEntry, MinerHistory};
pub use ledger::{
    LedgerStats, SnapshotHeader, StakeLedger, SNAPSHOT_HEADER_SIZE, SNAPSHOT_RECORD_SIZE,
};
pub use pool::{Handle, PoolError, PoolStats, SlabPool, MAX_LADDERS, PAGE_SIZE};
pub use rules::{
    AddressCodec, DcopClassifier, HexAddressCodec, LedgerRules, PledgeClassifier, PledgeKind,
    StakeAddress, DCOP_MAGIC, MAX_ADDRESS_LEN,
};
pub use service::StakeService;
pub use source::{BlockSource, MemoryBlockSource};
pub use store::BlockStore;
pub use table::{
    bucket_of, Layer, MergeSummary, StakeRecord, StakeTables, TableStats, BUCKET_COUNT,
};
pub use tx::{
    decode_transactions, encode_transactions, OutPoint, Transaction, TxIn, TxOut, Txid,
};
