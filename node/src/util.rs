use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use coinlib::config::CoinConfig;
use coinlib::types::Blockchain;
use coinlib::util::Saveable;
use tokio::time;
use tracing::{info, warn};

use crate::peer::Node;

pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}

/// Load the chain snapshot when one exists; otherwise start fresh,
/// mining a genesis block when this node has nobody to sync from.
pub fn load_or_create_chain(chain_file: &str, seed_genesis: bool) -> Result<Blockchain> {
    if Path::new(chain_file).exists() {
        info!("loading chain snapshot from {chain_file}");
        let blockchain =
            Blockchain::load_from_file(chain_file).context("failed to load chain snapshot")?;
        info!("loaded {} blocks, utxos rebuilt", blockchain.block_height());
        return Ok(blockchain);
    }

    let mut blockchain = Blockchain::new();
    if seed_genesis {
        let difficulty = CoinConfig::global().network.base_difficulty;
        info!("no snapshot and no peers, mining genesis at difficulty {difficulty}");
        blockchain
            .create_genesis(difficulty)
            .context("failed to create the genesis block")?;
    }
    Ok(blockchain)
}

/// Periodically snapshot the chain to disk.
pub async fn save(node: Arc<Node>, chain_file: String) {
    let mut ticker = time::interval(time::Duration::from_secs(
        CoinConfig::global().node.save_interval_secs,
    ));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !node.is_active() {
            break;
        }
        let chain = node.chain();
        let chain = chain.read().await;
        if let Err(e) = chain.save_to_file(&chain_file) {
            warn!("failed to save chain snapshot: {e}");
        }
    }
}
