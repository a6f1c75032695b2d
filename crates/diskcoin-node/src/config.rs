//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use diskcoin_consensus::Network;
use diskcoin_state::LedgerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    pub node_name: String,
    /// Network (mainnet, testnet, regtest).
    pub network: String,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Stake ledger configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let network = args.network.as_deref().unwrap_or("mainnet");
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(network)
        };

        // Override with CLI args
        if let Some(ref network) = args.network {
            config.network = network.clone();
        }
        if let Some(ref data_dir) = args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(ref level) = args.log_level {
            config.log_level = level.clone();
        }
        if let Some(period) = args.period {
            config.ledger.period = period;
        }

        config.network()?;
        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        let data_dir = match network {
            "testnet" => PathBuf::from(".diskcoin-testnet"),
            "regtest" => PathBuf::from(".diskcoin-regtest"),
            _ => PathBuf::from(".diskcoin"),
        };

        Self {
            node_name: "diskcoin-rust-node".to_string(),
            network: network.to_string(),
            data_dir,
            log_level: default_log_level(),
            ledger: LedgerConfig::default(),
        }
    }

    /// Parsed network.
    pub fn network(&self) -> Result<Network> {
        self.network
            .parse()
            .with_context(|| format!("Invalid network '{}'", self.network))
    }

    /// RocksDB directory.
    pub fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    /// Stake snapshot file.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger.file_name)
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
