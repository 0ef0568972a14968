use anyhow::Result;
use argh::FromArgs;
use coinlib::config::CoinConfig;
use coinlib::crypto::generate_address;
use node::miner;
use node::peer::Node;
use node::util;
use tracing::{info, warn};

#[derive(FromArgs)]
/// A peer-to-peer UTXO cryptocurrency node
struct Args {
    #[argh(option)]
    /// port number (defaults to NODE_PORT env var or 9000)
    port: Option<u16>,
    #[argh(option)]
    /// chain snapshot location (defaults to CHAIN_FILE env var or ./chain.cbor)
    chain_file: Option<String>,
    #[argh(switch)]
    /// run the mining worker
    mine: bool,
    #[argh(option)]
    /// address collecting mining rewards (a fresh one is generated when absent)
    miner_address: Option<String>,
    #[argh(positional)]
    /// addresses of initial peers (can also use INITIAL_PEERS env var)
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    util::init_tracing();

    // Load configuration from the environment
    let config = CoinConfig::global();

    // Parse command line arguments
    let args: Args = argh::from_env();

    // Priority: CLI args > environment vars > defaults
    let port = args.port.unwrap_or(config.node.port);
    let chain_file = args
        .chain_file
        .unwrap_or_else(|| config.node.chain_file.clone());
    let mut peers = args.peers;
    if peers.is_empty() {
        peers = config.node.initial_peers.clone();
    }

    // A lone node with no snapshot seeds its own genesis block; one
    // with peers starts empty and pulls the chain from them.
    let blockchain = util::load_or_create_chain(&chain_file, peers.is_empty())?;
    let node = Node::start(&format!("0.0.0.0:{port}"), blockchain).await?;

    for peer in &peers {
        match peer.parse() {
            Ok(addr) => {
                if let Err(e) = node.connect_to_peer(addr).await {
                    warn!("failed to connect to {peer}: {e}");
                }
            }
            Err(e) => warn!("invalid peer address {peer}: {e}"),
        }
    }

    tokio::spawn(util::save(node.clone(), chain_file.clone()));

    if args.mine {
        let miner_address = args.miner_address.unwrap_or_else(|| {
            let (_, address) = generate_address();
            info!("generated throwaway miner address {address}");
            address
        });
        tokio::spawn(miner::mine_loop(node.clone(), miner_address));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.close().await;
    Ok(())
}
