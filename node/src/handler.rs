//! Protocol dispatch: one decoded message in, zero or more replies
//! out. Replies go back through the originating connection; accepted
//! gossip is relayed through the broadcast path.

use std::net::SocketAddr;
use std::sync::Arc;

use coinlib::network::{Envelope, Message};
use coinlib::types::ConsensusData;
use tracing::{debug, info, warn};

use crate::peer::{Node, PeerSink};

pub async fn handle_message(
    node: &Arc<Node>,
    remote: SocketAddr,
    sink: &Arc<PeerSink>,
    id: String,
    envelope: Envelope,
) {
    // Gossip that already passed through here loops straight back out
    if envelope.broadcast && envelope.message.is_gossip() && node.seen.contains(&id) {
        debug!("dropping already-seen gossip {id}");
        return;
    }

    use Message::*;
    match envelope.message.clone() {
        Port(port) => {
            // Inbound peers are anonymous until this arrives
            let listen_addr = SocketAddr::new(remote.ip(), port);
            node.register_peer(remote, listen_addr, Arc::clone(sink));
        }
        GetPeers => {
            let peers: Vec<(String, u16)> = node
                .peers
                .iter()
                .map(|record| {
                    (
                        record.listen_addr.ip().to_string(),
                        record.listen_addr.port(),
                    )
                })
                .collect();
            reply(sink, remote, PeersList(peers)).await;
        }
        PeersList(peers) => {
            for (host, port) in peers {
                if node.peer_count() >= node.max_peers {
                    debug!("peer cap reached, ignoring the rest of the list");
                    break;
                }
                let Ok(addr) = format!("{host}:{port}").parse::<SocketAddr>() else {
                    warn!("ignoring unparseable peer endpoint {host}:{port}");
                    continue;
                };
                if addr == node.listen_addr() || node.knows_listen_addr(&addr) {
                    continue;
                }
                info!("discovered peer {addr}");
                if let Err(e) = node.connect_to_peer(addr).await {
                    warn!("failed to connect to {addr}: {e}");
                }
            }
        }
        GetLatestBlock => {
            let latest = node.chain().read().await.latest_block().cloned();
            reply(sink, remote, LatestBlock(latest)).await;
        }
        LatestBlock(None) => {}
        LatestBlock(Some(remote_tip)) => {
            let decision = {
                let chain = node.chain();
                let chain = chain.read().await;
                match chain.latest_block() {
                    // Nothing local yet: start pulling from genesis
                    None => Some(GetBlock(0)),
                    Some(local_tip) => {
                        if remote_tip.index > local_tip.index {
                            Some(GetBlock(local_tip.index))
                        } else if remote_tip.index < local_tip.index
                            || remote_tip.hash() != local_tip.hash()
                        {
                            Some(GetConsensusData)
                        } else {
                            None
                        }
                    }
                }
            };
            if let Some(message) = decision {
                reply(sink, remote, message).await;
            }
        }
        GetBlock(index) => {
            let block = node
                .chain()
                .read()
                .await
                .blocks()
                .nth(index as usize)
                .cloned();
            if let Some(block) = block {
                reply(sink, remote, Block(block)).await;
            }
        }
        Block(block) => {
            // Catch-up traffic: keep requesting while blocks land
            let next = block.index + 1;
            let accepted = node.chain().write().await.receive_block(block);
            match accepted {
                Ok(()) => {
                    debug!("synced block {}", next - 1);
                    reply(sink, remote, GetBlock(next)).await;
                }
                Err(e) => {
                    debug!("sync block rejected ({e}), negotiating consensus");
                    reply(sink, remote, GetConsensusData).await;
                }
            }
        }
        NewBlock(block) => {
            let index = block.index;
            let verdict = {
                let chain = node.chain();
                let mut chain = chain.write().await;
                let fork_behind = chain
                    .latest_block()
                    .map(|tip| index < tip.index)
                    .unwrap_or(false);
                chain.receive_block(block).map_err(|e| (e, fork_behind))
            };
            match verdict {
                Ok(()) => {
                    info!("accepted new block {index}");
                    node.broadcast_envelope(envelope).await;
                }
                Err((e, fork_behind)) => {
                    warn!("rejected new block {index}: {e}");
                    if fork_behind {
                        // A block below our tip signals a fork
                        reply(sink, remote, GetConsensusData).await;
                    }
                }
            }
        }
        NewTransaction(transaction) => {
            let txid = transaction.txid();
            let accepted = node.chain().write().await.receive_transaction(transaction);
            match accepted {
                Ok(()) => {
                    debug!("accepted transaction {txid}");
                    node.broadcast_envelope(envelope).await;
                }
                Err(e) => debug!("rejected transaction {txid}: {e}"),
            }
        }
        GetConsensusData => {
            let data = node.chain().read().await.consensus_data();
            reply(sink, remote, ConsensusData(data)).await;
        }
        ConsensusData(data) => {
            handle_consensus(node, remote, sink, data).await;
        }
    }
}

/// Fork resolution: find the highest shared block, then either push
/// our next block (local chain carries more work) or rewind to the
/// ancestor and pull theirs.
async fn handle_consensus(
    node: &Arc<Node>,
    remote: SocketAddr,
    sink: &Arc<PeerSink>,
    data: ConsensusData,
) {
    let response = {
        let chain = node.chain();
        let mut chain = chain.write().await;
        let common = chain.last_common_block(&data.chain_hashes);
        let next = common.map_or(0, |index| index + 1);
        let local = chain.cumulative_difficulty();
        if local > data.cum_diff {
            // We win the fork; hand the peer the block after the split
            chain.blocks().nth(next as usize).cloned().map(Message::Block)
        } else if local < data.cum_diff {
            info!(
                "peer {remote} carries more work ({} > {local}), rewinding past block {next}",
                data.cum_diff
            );
            chain.truncate_to(common);
            Some(Message::GetBlock(next))
        } else {
            // A tie keeps the chain we already hold
            None
        }
    };
    if let Some(message) = response {
        reply(sink, remote, message).await;
    }
}

async fn reply(sink: &Arc<PeerSink>, remote: SocketAddr, message: Message) {
    if let Err(e) = sink.send(&Envelope::new(message)).await {
        warn!("failed to reply to {remote}: {e}");
    }
}
