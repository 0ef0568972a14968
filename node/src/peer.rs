//! The peer layer: connection lifecycle, the peer table, gossip
//! broadcast and the periodic sync worker.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use coinlib::config::CoinConfig;
use coinlib::error::Result as CoinResult;
use coinlib::network::{Envelope, FrameReader, Message, FRAME_DELIMITER};
use coinlib::types::Blockchain;
use dashmap::{DashMap, DashSet};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};
use tracing::{debug, info, warn};

use crate::handler;

/// Write side of one connection, shared between the reader task that
/// answers requests and the broadcast path.
pub struct PeerSink {
    writer: Mutex<OwnedWriteHalf>,
}

impl PeerSink {
    fn new(writer: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(PeerSink {
            writer: Mutex::new(writer),
        })
    }

    pub async fn send(&self, envelope: &Envelope) -> CoinResult<()> {
        let mut writer = self.writer.lock().await;
        envelope.send_async(&mut *writer).await
    }

    // Pre-serialized broadcast path: one encoding, many sockets.
    async fn send_frame(&self, body: &[u8]) -> CoinResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(body).await?;
        writer.write_all(FRAME_DELIMITER).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// A connected peer: the advertised listen endpoint plus the shared
/// write half. One record per remote endpoint, so connect and
/// disconnect are single-map operations.
pub struct PeerRecord {
    pub listen_addr: SocketAddr,
    pub sink: Arc<PeerSink>,
}

/// One running node: the chain behind a lock, the peer table, the
/// seen-message set and the background workers.
pub struct Node {
    listen_addr: SocketAddr,
    chain: Arc<RwLock<Blockchain>>,
    pub(crate) peers: DashMap<SocketAddr, PeerRecord>,
    pub(crate) seen: DashSet<String>,
    pub(crate) max_peers: usize,
    active: AtomicBool,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Bind the listener and start the accept and periodic-sync
    /// workers. A failed bind is fatal; everything after it recovers.
    pub async fn start(addr: &str, blockchain: Blockchain) -> CoinResult<Arc<Node>> {
        let listener = TcpListener::bind(addr).await?;
        let listen_addr = listener.local_addr()?;
        let config = &CoinConfig::global().node;

        let node = Arc::new(Node {
            listen_addr,
            chain: Arc::new(RwLock::new(blockchain)),
            peers: DashMap::new(),
            seen: DashSet::new(),
            max_peers: config.max_peers,
            active: AtomicBool::new(true),
            tasks: StdMutex::new(Vec::new()),
        });
        info!("node listening on {listen_addr}");

        node.spawn(Node::accept_loop(Arc::clone(&node), listener));
        node.spawn(Node::periodic_sync(Arc::clone(&node)));
        Ok(node)
    }

    pub(crate) fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(future);
        self.tasks
            .lock()
            .expect("BUG: task list lock poisoned")
            .push(handle);
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn chain(&self) -> Arc<RwLock<Blockchain>> {
        Arc::clone(&self.chain)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// True when some record already advertises this listen endpoint.
    pub(crate) fn knows_listen_addr(&self, addr: &SocketAddr) -> bool {
        self.peers.iter().any(|record| record.listen_addr == *addr)
    }

    /// Record a peer once its listen endpoint is known: immediately on
    /// an outbound dial, on the `PORT` message for inbound.
    pub(crate) fn register_peer(
        &self,
        remote: SocketAddr,
        listen_addr: SocketAddr,
        sink: Arc<PeerSink>,
    ) {
        self.peers.insert(remote, PeerRecord { listen_addr, sink });
        info!("peer {remote} registered, listening on {listen_addr}");
    }

    /// Dial a peer, identify our own listen port, then open the sync
    /// conversation.
    ///
    /// Boxed explicitly (rather than `async fn`) because this future
    /// and `read_loop`'s are mutually recursive through `handler`;
    /// leaving the return type as an inferred opaque type makes the
    /// `Send` check cyclic and unsatisfiable.
    pub fn connect_to_peer<'a>(
        self: &'a Arc<Self>,
        addr: SocketAddr,
    ) -> std::pin::Pin<Box<dyn Future<Output = CoinResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if addr == self.listen_addr || self.knows_listen_addr(&addr) {
                return Ok(());
            }
            let socket = TcpStream::connect(addr).await?;
            let remote = socket.peer_addr()?;
            let (read_half, write_half) = socket.into_split();
            let sink = PeerSink::new(write_half);

            sink.send(&Envelope::new(Message::Port(self.listen_addr.port())))
                .await?;
            self.register_peer(remote, addr, Arc::clone(&sink));
            self.spawn(Node::read_loop(
                Arc::clone(self),
                remote,
                read_half,
                Arc::clone(&sink),
            ));

            // The establishing side asks for the chain tip and more peers.
            sink.send(&Envelope::new(Message::GetLatestBlock)).await?;
            sink.send(&Envelope::new(Message::GetPeers)).await?;
            Ok(())
        })
    }

    async fn accept_loop(node: Arc<Node>, listener: TcpListener) {
        loop {
            let (socket, remote) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };
            if !node.is_active() {
                break;
            }
            debug!("inbound connection from {remote}");
            let (read_half, write_half) = socket.into_split();
            let sink = PeerSink::new(write_half);
            // The peer is recorded once it identifies its listen port
            node.spawn(Node::read_loop(
                Arc::clone(&node),
                remote,
                read_half,
                sink,
            ));
        }
    }

    async fn read_loop(
        node: Arc<Node>,
        remote: SocketAddr,
        read_half: OwnedReadHalf,
        sink: Arc<PeerSink>,
    ) {
        let read_timeout = Duration::from_secs(CoinConfig::global().node.read_timeout_secs);
        let mut reader = FrameReader::new(read_half);
        while node.is_active() {
            let batch = match timeout(read_timeout, reader.next_batch()).await {
                // An idle peer is fine; one stuck mid-frame is not.
                Err(_) if reader.has_partial_frame() => {
                    warn!("peer {remote} stalled mid-frame, disconnecting");
                    break;
                }
                Err(_) => continue,
                Ok(Err(e)) => {
                    debug!("peer {remote} went away: {e}");
                    break;
                }
                Ok(Ok(batch)) => batch,
            };
            for (id, envelope) in batch {
                handler::handle_message(&node, remote, &sink, id, envelope).await;
            }
        }
        if node.peers.remove(&remote).is_some() {
            info!("disconnected from {remote}");
        }
    }

    /// Gossip a message to every recorded peer. The id lands in the
    /// seen set first so our own relay does not loop back in.
    pub async fn broadcast(&self, message: Message) {
        self.broadcast_envelope(Envelope::broadcast(message)).await;
    }

    pub(crate) async fn broadcast_envelope(&self, mut envelope: Envelope) {
        envelope.broadcast = true;
        let body = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode broadcast: {e}");
                return;
            }
        };
        self.seen.insert(coinlib::sha256::sha256_hex(&body));

        // Collect sinks first so no table shard lock spans a send
        let targets: Vec<(SocketAddr, Arc<PeerSink>)> = self
            .peers
            .iter()
            .map(|record| (*record.key(), Arc::clone(&record.sink)))
            .collect();
        for (addr, sink) in targets {
            if let Err(e) = sink.send_frame(&body).await {
                warn!("failed to send to {addr}: {e}");
                self.peers.remove(&addr);
            }
        }
    }

    /// Every sync interval: poll every peer for its tip, and while
    /// below the connection cap ask for more peers.
    async fn periodic_sync(node: Arc<Node>) {
        let config = &CoinConfig::global().node;
        let mut ticker = interval(Duration::from_secs(config.sync_interval_secs));
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            if !node.is_active() {
                break;
            }
            debug!("periodic sync round");
            node.broadcast(Message::GetLatestBlock).await;
            if node.peer_count() < node.max_peers {
                node.broadcast(Message::GetPeers).await;
            }
        }
    }

    /// Stop the node: flip the active flag, preempt any in-flight
    /// proof, abort the workers and drop every socket.
    pub async fn close(&self) {
        self.active.store(false, Ordering::Relaxed);
        self.chain
            .read()
            .await
            .preempt_handle()
            .store(true, Ordering::Relaxed);
        for handle in self
            .tasks
            .lock()
            .expect("BUG: task list lock poisoned")
            .drain(..)
        {
            handle.abort();
        }
        self.peers.clear();
        info!("node closed");
    }
}
