//! The mining worker: one cooperative loop per node.
//!
//! Candidates are composed under the chain lock, proven on a blocking
//! thread with the lock released (the network keeps serving reads and
//! block acceptance while hashes grind), and installed only if the tip
//! has not moved. An externally accepted block flips the preemption
//! flag and the in-flight candidate is thrown away.

use std::sync::Arc;

use coinlib::network::Message;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::peer::Node;

pub async fn mine_loop(node: Arc<Node>, miner_address: String) {
    info!("mining to address {miner_address}");
    while node.is_active() {
        let prepared = {
            let chain = node.chain();
            let mut chain = chain.write().await;
            chain
                .prepare_candidate(&miner_address)
                .map(|candidate| (candidate, chain.preempt_handle()))
        };
        let (candidate, preempt) = match prepared {
            Ok(pair) => pair,
            Err(e) => {
                warn!("cannot compose a candidate: {e}");
                sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let index = candidate.index;
        let proven = tokio::task::spawn_blocking(move || candidate.prove(&preempt)).await;
        let Ok(outcome) = proven else {
            warn!("mining task failed");
            continue;
        };
        let Some(block) = outcome else {
            debug!("candidate {index} preempted");
            continue;
        };

        let installed = {
            let chain = node.chain();
            let mut chain = chain.write().await;
            chain.install_mined_block(block.clone())
        };
        match installed {
            Ok(height) => {
                info!("mined block {height}");
                node.broadcast(Message::NewBlock(block)).await;
            }
            Err(e) => debug!("discarding stale candidate {index}: {e}"),
        }
    }
}
