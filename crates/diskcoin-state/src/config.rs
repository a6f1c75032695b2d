//! Stake ledger configuration.

use serde::{Deserialize, Serialize};

/// Snapshot cadence in blocks, and the lag between cursor and snapshot.
pub const SNAPSHOT_INTERVAL: u32 = 100;

/// Layout version of the snapshot file.
pub const SNAPSHOT_VERSION: i32 = 1;

/// Default upper bound of the snapshot file size.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// Default mining window in blocks.
pub const DEFAULT_PERIOD: u32 = 1800;

/// Stake ledger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Snapshot file name inside the data directory.
    pub file_name: String,
    /// Mining window: `mined_count` looks at the last `period - 1` producers.
    pub period: u32,
    /// Largest snapshot file that is read or written.
    pub max_file_size: u64,
    /// Cap on live stake records; unlimited when unset.
    pub max_records: Option<usize>,
}

impl LedgerConfig {
    /// Entries kept in the miner history.
    pub fn history_capacity(&self) -> usize {
        self.period as usize + SNAPSHOT_INTERVAL as usize
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            file_name: "stakedb.dat".to_string(),
            period: DEFAULT_PERIOD,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_records: None,
        }
    }
}
