//! Diskcoin Node - proof-of-capacity chain index and stake ledger.
//!
//! This is the main entry point for the diskcoin-node binary. It opens a
//! data directory and answers chain and stake queries against it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// Diskcoin node implementation in Rust.
#[derive(Parser, Debug)]
#[command(name = "diskcoin-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "diskcoin-node.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Network (mainnet, testnet, regtest)
    #[arg(short, long)]
    network: Option<String>,

    /// Mining window of the stake ledger, in blocks
    #[arg(long)]
    period: Option<u32>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show chain, tip and ledger status
    Status,
    /// Step the stake ledger to the active tip
    Sync,
    /// Show the stake pledged to an address
    Stake { address: String },
    /// Count blocks mined by an address in the current window
    Mined { address: String },
    /// Log the miner window, optionally only one address
    MinerWindow { address: Option<String> },
    /// Reset the stake ledger to genesis
    Reinit,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(&args.config, &args)?;

    // Initialize logging
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Diskcoin Rust Node v{}", env!("CARGO_PKG_VERSION"));
    info!("Network: {}", config.network);
    info!("Data directory: {:?}", config.data_dir);

    let node = Node::open(config)?;

    match args.command {
        Command::Status => {
            let status = node.status()?;
            println!("headers:       {}", status.headers);
            println!("chain height:  {}", fmt_height(status.chain_height));
            println!("ledger height: {}", fmt_height(status.ledger_height));
            println!("ledger file:   {}", node.config().ledger_path().display());
            if let Some(genesis) = node.block_hash_at(0) {
                println!("genesis:       {genesis}");
            }
            if let Some(tip) = status.tip {
                println!("tip:           {}", tip.hash);
                println!("base target:   {}", tip.base_target);
                println!("gen signature: {}", hex::encode(tip.generation_signature));
            }
            if let Some(stats) = status.ledger {
                println!("sync height:   {}", stats.sync_height);
                println!("base records:  {}", stats.tables.base_records);
                println!(
                    "overlays:      {} / {}",
                    stats.tables.overlay_records[0], stats.tables.overlay_records[1]
                );
                println!("miner entries: {}", stats.miner_entries);
                println!(
                    "pool:          {} live / {} slots in {} ladders",
                    stats.tables.pool.live, stats.tables.pool.capacity, stats.tables.pool.ladders
                );
            }
        }
        Command::Sync => {
            let height = node.sync_ledger()?;
            println!("ledger height: {height}");
        }
        Command::Stake { address } => {
            println!("{}", node.stake_of(&address));
        }
        Command::Mined { address } => {
            println!("{}", node.mined_count(&address)?);
        }
        Command::MinerWindow { address } => {
            node.log_miner_window(address.as_deref());
        }
        Command::Reinit => {
            node.reinit_ledger()?;
            println!("stake ledger reset to genesis");
        }
    }

    info!("Diskcoin node stopped");
    Ok(())
}

fn fmt_height(height: Option<u32>) -> String {
    height.map_or_else(|| "-".to_string(), |h| h.to_string())
}
