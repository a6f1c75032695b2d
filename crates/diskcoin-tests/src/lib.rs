//! # diskcoin-tests
//!
//! Integration tests for the Diskcoin Rust Node.
//!
//! This crate provides:
//! - Chain generators with coinbase producers, pledges and forks
//! - Temporary database and ledger fixtures
//! - Scenario tests for the stake ledger across snapshots and reorgs
//! - Property-based tests for the chain index, base target and slab pool

pub mod generators;
pub mod harness;





pub use generators::*;
pub use harness::*;
