//! Protocol tests over real loopback sockets: chain catch-up, fork
//! negotiation, gossip deduplication and peer discovery. Each test
//! starts one or more nodes on ephemeral ports and speaks the wire
//! protocol at them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use coinlib::crypto::generate_address;
use coinlib::network::{Envelope, FrameReader, Message, FRAME_DELIMITER};
use coinlib::types::{Blockchain, ChainHash, ConsensusData, Output, Transaction};
use node::peer::Node;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

/// A scripted peer: a raw socket speaking the framed protocol.
struct TestPeer {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestPeer {
    /// Connect and identify a (fake) listen port so the node records
    /// us as a peer.
    async fn connect(addr: SocketAddr, listen_port: u16) -> TestPeer {
        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = socket.into_split();
        let mut peer = TestPeer {
            reader: FrameReader::new(read_half),
            writer: write_half,
        };
        peer.send(&Envelope::new(Message::Port(listen_port))).await;
        peer
    }

    async fn send(&mut self, envelope: &Envelope) {
        envelope.send_async(&mut self.writer).await.unwrap();
    }

    /// Send a pre-serialized frame body verbatim.
    async fn send_raw(&mut self, body: &[u8]) {
        self.writer.write_all(body).await.unwrap();
        self.writer.write_all(FRAME_DELIMITER).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// First message to arrive within the window.
    async fn expect_message(&mut self, window: Duration) -> Message {
        let mut batch = timeout(window, self.reader.next_batch())
            .await
            .expect("timed out waiting for a message")
            .unwrap();
        assert!(!batch.is_empty());
        batch.remove(0).1.message
    }

    /// Collect every message arriving within the window.
    async fn drain_for(&mut self, window: Duration) -> Vec<Message> {
        let mut messages = Vec::new();
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.reader.next_batch()).await {
                Ok(Ok(batch)) => {
                    messages.extend(batch.into_iter().map(|(_, envelope)| envelope.message));
                }
                _ => break,
            }
        }
        messages
    }
}

/// Genesis plus `extra` mined blocks, all at the given difficulty.
fn seeded_chain(difficulty: u32, extra: usize) -> Blockchain {
    let mut blockchain = Blockchain::with_base_difficulty(difficulty);
    blockchain.create_genesis(difficulty).unwrap();
    let (_, address) = generate_address();
    for _ in 0..extra {
        blockchain.mine(&address).unwrap().unwrap();
    }
    blockchain
}

async fn wait_for_height(node: &Arc<Node>, height: u64, deadline: Duration) {
    let stop = Instant::now() + deadline;
    loop {
        if node.chain().read().await.block_height() == height {
            return;
        }
        assert!(Instant::now() < stop, "node never reached height {height}");
        sleep(Duration::from_millis(50)).await;
    }
}

/// An empty node pulls the whole chain from the peer it dials.
#[tokio::test]
async fn test_empty_node_syncs_full_chain() {
    let node_a = Node::start("127.0.0.1:0", seeded_chain(1, 2)).await.unwrap();
    let node_b = Node::start("127.0.0.1:0", Blockchain::with_base_difficulty(1))
        .await
        .unwrap();

    node_b.connect_to_peer(node_a.listen_addr()).await.unwrap();
    wait_for_height(&node_b, 3, Duration::from_secs(10)).await;

    let chain_a = node_a.chain();
    let chain_b = node_b.chain();
    let tip_a = chain_a.read().await.latest_block().unwrap().hash();
    let tip_b = chain_b.read().await.latest_block().unwrap().hash();
    assert_eq!(tip_a, tip_b);

    node_a.close().await;
    node_b.close().await;
}

/// A peer fingerprint with more cumulative work makes the node rewind
/// to the common ancestor and request the block after it.
#[tokio::test]
async fn test_consensus_remote_wins_requests_next_block() {
    // Local chain [G, A1, A2] at difficulty 2: cumulative work 12
    let node = Node::start("127.0.0.1:0", seeded_chain(2, 2)).await.unwrap();
    let genesis_hash = node
        .chain()
        .read()
        .await
        .blocks()
        .next()
        .unwrap()
        .hash();

    // Remote claims [G, B1] with difficulty 4 on top: 4 + 16 = 20
    let data = ConsensusData {
        chain_hashes: vec![
            ChainHash {
                index: 0,
                hash: genesis_hash,
            },
            ChainHash {
                index: 1,
                hash: "f".repeat(64),
            },
        ],
        cum_diff: 20,
    };

    let mut peer = TestPeer::connect(node.listen_addr(), 19001).await;
    peer.send(&Envelope::new(Message::ConsensusData(data))).await;

    let reply = peer.expect_message(Duration::from_secs(5)).await;
    assert!(
        matches!(reply, Message::GetBlock(1)),
        "expected GET_BLOCK(1), got {reply:?}"
    );

    // The losing suffix is gone, ready for the peer's blocks
    wait_for_height(&node, 1, Duration::from_secs(5)).await;
    node.close().await;
}

/// When the local chain carries more work, the node pushes the block
/// after the common ancestor instead of rewinding.
#[tokio::test]
async fn test_consensus_local_wins_pushes_block() {
    let node = Node::start("127.0.0.1:0", seeded_chain(2, 2)).await.unwrap();
    let chain = node.chain();
    let (genesis_hash, expected) = {
        let chain = chain.read().await;
        let mut blocks = chain.blocks();
        let genesis_hash = blocks.next().unwrap().hash();
        let expected = blocks.next().unwrap().hash();
        (genesis_hash, expected)
    };

    // Remote holds the shared genesis and little else
    let data = ConsensusData {
        chain_hashes: vec![ChainHash {
            index: 0,
            hash: genesis_hash,
        }],
        cum_diff: 4,
    };

    let mut peer = TestPeer::connect(node.listen_addr(), 19002).await;
    peer.send(&Envelope::new(Message::ConsensusData(data))).await;

    let reply = peer.expect_message(Duration::from_secs(5)).await;
    match reply {
        Message::Block(block) => {
            assert_eq!(block.index, 1);
            assert_eq!(block.hash(), expected);
        }
        other => panic!("expected BLOCK, got {other:?}"),
    }

    // The local chain is untouched
    assert_eq!(node.chain().read().await.block_height(), 3);
    node.close().await;
}

/// The same gossip injected through two peers lands in the mempool
/// once and is relayed once.
#[tokio::test]
async fn test_broadcast_idempotence() {
    let mut blockchain = Blockchain::with_base_difficulty(1);
    blockchain.create_genesis(1).unwrap();
    let (key, address) = generate_address();
    blockchain.mine(&address).unwrap().unwrap();

    // A valid spend of the miner's reward, built outside the mempool
    let (total, inputs) = blockchain.find_inputs(&address, 1);
    assert_eq!(total, 1);
    let (_, recipient) = generate_address();
    let mut transaction = Transaction::new(
        inputs,
        vec![Output {
            address: recipient,
            amount: 1,
        }],
    );
    transaction.sign(&key);
    let txid = transaction.txid();

    let node = Node::start("127.0.0.1:0", blockchain).await.unwrap();
    let mut peer1 = TestPeer::connect(node.listen_addr(), 19003).await;
    let mut peer2 = TestPeer::connect(node.listen_addr(), 19004).await;

    // Both registrations must land before the gossip does
    let deadline = Instant::now() + Duration::from_secs(5);
    while node.peer_count() < 2 {
        assert!(Instant::now() < deadline, "peers never registered");
        sleep(Duration::from_millis(20)).await;
    }

    // Identical bytes from two directions
    let body = Envelope::broadcast(Message::NewTransaction(transaction))
        .to_bytes()
        .unwrap();
    peer1.send_raw(&body).await;
    sleep(Duration::from_millis(100)).await;
    peer2.send_raw(&body).await;
    sleep(Duration::from_millis(200)).await;

    {
        let chain = node.chain();
        let chain = chain.read().await;
        assert_eq!(chain.mempool().len(), 1);
        assert_eq!(chain.mempool()[0].txid(), txid);
    }

    // Exactly one relayed copy reaches the second peer
    let relayed = peer2.drain_for(Duration::from_millis(700)).await;
    let copies = relayed
        .iter()
        .filter(|message| matches!(message, Message::NewTransaction(_)))
        .count();
    assert_eq!(copies, 1, "expected one relay, saw {relayed:?}");

    node.close().await;
}

/// A gossiped block extends every connected node's chain.
#[tokio::test]
async fn test_new_block_gossip_extends_peers() {
    let node_a = Node::start("127.0.0.1:0", seeded_chain(1, 0)).await.unwrap();
    let node_b = Node::start("127.0.0.1:0", Blockchain::with_base_difficulty(1))
        .await
        .unwrap();
    node_b.connect_to_peer(node_a.listen_addr()).await.unwrap();
    wait_for_height(&node_b, 1, Duration::from_secs(10)).await;

    // A mines and gossips one block
    let (_, address) = generate_address();
    let block = {
        let chain = node_a.chain();
        let mut chain = chain.write().await;
        chain.mine(&address).unwrap().unwrap();
        chain.latest_block().unwrap().clone()
    };
    node_a.broadcast(Message::NewBlock(block)).await;

    wait_for_height(&node_b, 2, Duration::from_secs(10)).await;
    node_a.close().await;
    node_b.close().await;
}

/// A third node discovers the second through the first's peer list.
#[tokio::test]
async fn test_peer_discovery_through_peers_list() {
    let node_a = Node::start("127.0.0.1:0", seeded_chain(1, 0)).await.unwrap();
    let node_b = Node::start("127.0.0.1:0", Blockchain::with_base_difficulty(1))
        .await
        .unwrap();
    let node_c = Node::start("127.0.0.1:0", Blockchain::with_base_difficulty(1))
        .await
        .unwrap();

    node_b.connect_to_peer(node_a.listen_addr()).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while node_a.peer_count() < 1 {
        assert!(Instant::now() < deadline, "b never registered with a");
        sleep(Duration::from_millis(20)).await;
    }

    // C asks A for peers on connect and should reach B through the list
    node_c.connect_to_peer(node_a.listen_addr()).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while node_c.peer_count() < 2 {
        assert!(Instant::now() < deadline, "c never discovered b");
        sleep(Duration::from_millis(20)).await;
    }

    node_a.close().await;
    node_b.close().await;
    node_c.close().await;
}
