//! Test harness for integration tests.
//!
//! Provides temporary databases and ledger directories that clean up on drop.

use diskcoin_chain::BlockHash;
use diskcoin_state::{BlockStore, LedgerConfig, StakeLedger};
use diskcoin_storage::Database;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Test database wrapper that cleans up on drop.
pub struct TestDatabase {
    db: Database,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database in a temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(temp_dir.path()).expect("Failed to open database");
        Self {
            db,
            _temp_dir: temp_dir,
        }
    }

    /// Get the path to the database.
    pub fn path(&self) -> PathBuf {
        self._temp_dir.path().to_path_buf()
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Block store over this database.
    pub fn block_store(&self) -> BlockStore {
        BlockStore::new(Arc::new(self.db.clone()))
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Temporary directory holding ledger snapshot files.
pub struct TestLedgerDir {
    dir: TempDir,
}

impl TestLedgerDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Snapshot file for `config`.
    pub fn file(&self, config: &LedgerConfig) -> PathBuf {
        self.dir.path().join(&config.file_name)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Load the ledger stored in this directory.
    pub fn load(&self, config: LedgerConfig, genesis: BlockHash) -> StakeLedger {
        StakeLedger::load(self.file(&config), config, genesis).expect("Failed to load ledger")
    }
}

impl Default for TestLedgerDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Ledger configuration with a short mining period.
pub fn ledger_config(period: u32) -> LedgerConfig {
    LedgerConfig {
        period,
        ..LedgerConfig::default()
    }
}

/// Test context containing shared resources for integration tests.
pub struct TestContext {
    /// The test database.
    pub db: TestDatabase,
    /// Directory for ledger snapshots.
    pub ledger_dir: TestLedgerDir,
}

impl TestContext {
    /// Create a new test context.
    pub fn new() -> Self {
        Self {
            db: TestDatabase::new(),
            ledger_dir: TestLedgerDir::new(),
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
