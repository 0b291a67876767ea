mod packet;
mod peer;

pub use packet::Packet;
pub use peer::Peer;

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use sia_common::block::Block;
use sia_common::config::VERSION;
use sia_common::crypto::Hash;
use sia_common::serializer::ReaderError;
use sia_common::transaction::Transaction;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::config::{MAX_PEERS, PEER_RELAY_CACHE_SIZE};
use sia_common::api::PeerInfo;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Malformed(#[from] ReaderError),
    #[error("peer disconnected")]
    PeerDisconnected,
    #[error("request timed out")]
    RequestTimeout,
    #[error("another request is already in flight")]
    RequestInFlight,
    #[error("packet of {0} bytes exceeds the size limit")]
    OversizedPacket(u32),
    #[error("already connected to {0}")]
    AlreadyConnected(String),
    #[error("not connected to {0}")]
    NotConnected(String),
    #[error("peer {0} is banned")]
    Banned(String),
    #[error("peer limit reached")]
    TooManyPeers,
    #[error("handshake failed")]
    HandshakeFailed,
    #[error("gateway database error: {0}")]
    Database(#[from] sled::Error),
    #[error("gateway is shut down")]
    Shutdown,
}

// Inbound traffic flows upward through this narrow interface instead of the
// gateway holding whole-module handles; the node wires it after the
// consensus set and pool exist.
#[async_trait]
pub trait RelayHandler: Send + Sync {
    async fn block_received(&self, block: Block, from: String);
    async fn transaction_set_received(&self, set: Vec<Transaction>, from: String);
    // answer a peer's GetBlocks: blocks after the latest known ID, plus
    // whether more remain beyond the batch ceiling
    async fn blocks_requested(&self, known: Vec<Hash>) -> (Vec<Block>, bool);
}

// Maintains the set of connected peers and the durable list of node
// addresses seen on the network.
pub struct Gateway {
    listen_addr: String,
    listen_port: u16,
    peers: RwLock<IndexMap<String, Arc<Peer>>>,
    banned: RwLock<HashSet<String>>,
    handler: RwLock<Option<Arc<dyn RelayHandler>>>,
    // hashes of recently relayed objects, to stop relay loops
    seen: Mutex<LruCache<Hash, ()>>,
    db: sled::Db,
    nodes: sled::Tree,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Gateway {
    pub fn new(listen_addr: &str, data_dir: &str) -> Result<Arc<Self>, GatewayError> {
        let db = sled::open(format!("{}/gateway", data_dir))?;
        let nodes = db.open_tree("nodes")?;

        let listen_port = listen_addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);

        Ok(Arc::new(Gateway {
            listen_addr: listen_addr.to_string(),
            listen_port,
            peers: RwLock::new(IndexMap::new()),
            banned: RwLock::new(HashSet::new()),
            handler: RwLock::new(None),
            seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(PEER_RELAY_CACHE_SIZE).unwrap(),
            )),
            db,
            nodes,
            accept_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    pub async fn set_handler(&self, handler: Arc<dyn RelayHandler>) {
        *self.handler.write().await = Some(handler);
    }

    pub fn address(&self) -> &str {
        &self.listen_addr
    }

    // Bind the listener and start accepting inbound peers
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!("Gateway listening on {}", self.listen_addr);

        let gateway = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let gateway = Arc::clone(&gateway);
                        tokio::spawn(async move {
                            if let Err(e) = gateway.accept_peer(stream, remote.ip().to_string()).await {
                                debug!("Inbound peer {} rejected: {}", remote, e);
                            }
                        });
                    }
                    Err(e) => {
                        if gateway.closed.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!("Gateway accept error: {}", e);
                    }
                }
            }
        });
        *self.accept_task.lock().await = Some(task);
        Ok(())
    }

    // Try the persisted node list until a few outbound connections stick
    pub async fn bootstrap(self: &Arc<Self>) {
        let candidates: Vec<String> = self
            .nodes
            .iter()
            .keys()
            .filter_map(|key| key.ok())
            .filter_map(|key| String::from_utf8(key.to_vec()).ok())
            .collect();

        for addr in candidates {
            if self.peers.read().await.len() >= MAX_PEERS / 2 {
                break;
            }
            if let Err(e) = self.connect(&addr).await {
                debug!("Bootstrap connect to {} failed: {}", addr, e);
            }
        }
    }

    pub async fn connect(self: &Arc<Self>, addr: &str) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Shutdown);
        }
        if self.is_banned(addr).await {
            return Err(GatewayError::Banned(addr.to_string()));
        }
        {
            let peers = self.peers.read().await;
            if peers.contains_key(addr) {
                return Err(GatewayError::AlreadyConnected(addr.to_string()));
            }
            if peers.len() >= MAX_PEERS {
                return Err(GatewayError::TooManyPeers);
            }
        }

        let stream = timeout(Duration::from_secs(10), TcpStream::connect(addr))
            .await
            .map_err(|_| GatewayError::RequestTimeout)??;
        let (mut read_half, mut write_half) = stream.into_split();

        // outbound side speaks first
        peer::write_packet(
            &mut write_half,
            &Packet::Handshake {
                version: VERSION.to_string(),
                listen_port: self.listen_port,
            },
        )
        .await?;

        let version = match peer::read_packet(&mut read_half).await? {
            Packet::Handshake { version, .. } => version,
            _ => return Err(GatewayError::HandshakeFailed),
        };

        self.register_peer(addr.to_string(), false, version, read_half, write_half)
            .await;
        self.add_node(addr);
        info!("Connected to peer {}", addr);
        Ok(())
    }

    async fn accept_peer(
        self: &Arc<Self>,
        stream: TcpStream,
        remote_ip: String,
    ) -> Result<(), GatewayError> {
        if self.is_banned(&remote_ip).await {
            return Err(GatewayError::Banned(remote_ip));
        }
        if self.peers.read().await.len() >= MAX_PEERS {
            return Err(GatewayError::TooManyPeers);
        }

        let (mut read_half, mut write_half) = stream.into_split();

        let (version, listen_port) =
            match timeout(Duration::from_secs(10), peer::read_packet(&mut read_half)).await {
                Ok(Ok(Packet::Handshake {
                    version,
                    listen_port,
                })) => (version, listen_port),
                _ => return Err(GatewayError::HandshakeFailed),
            };

        peer::write_packet(
            &mut write_half,
            &Packet::Handshake {
                version: VERSION.to_string(),
                listen_port: self.listen_port,
            },
        )
        .await?;

        // dial-back address: the remote's IP plus its advertised listen port
        let addr = format!("{}:{}", remote_ip, listen_port);
        if self.peers.read().await.contains_key(&addr) {
            return Err(GatewayError::AlreadyConnected(addr));
        }

        self.register_peer(addr.clone(), true, version, read_half, write_half)
            .await;
        self.add_node(&addr);
        info!("Accepted peer {}", addr);
        Ok(())
    }

    async fn register_peer(
        self: &Arc<Self>,
        addr: String,
        inbound: bool,
        version: String,
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        mut write_half: tokio::net::tcp::OwnedWriteHalf,
    ) {
        let (sender, mut receiver) = mpsc::channel::<Packet>(64);
        let peer = Arc::new(Peer::new(addr.clone(), inbound, version, sender));
        self.peers.write().await.insert(addr.clone(), Arc::clone(&peer));

        // writer task: drains the queue until the channel closes
        let writer_addr = addr.clone();
        tokio::spawn(async move {
            while let Some(packet) = receiver.recv().await {
                if let Err(e) = peer::write_packet(&mut write_half, &packet).await {
                    debug!("Write to {} failed: {}", writer_addr, e);
                    break;
                }
            }
        });

        // reader task: dispatches inbound packets until EOF
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match peer::read_packet(&mut read_half).await {
                    Ok(packet) => gateway.dispatch(&peer, packet).await,
                    Err(e) => {
                        debug!("Peer {} read ended: {}", peer.addr(), e);
                        break;
                    }
                }
            }
            gateway.remove_peer(peer.addr()).await;
        });
    }

    async fn dispatch(self: &Arc<Self>, peer: &Arc<Peer>, packet: Packet) {
        trace!("Packet {} from {}", packet.kind(), peer.addr());
        let handler = self.handler.read().await.clone();
        match packet {
            Packet::RelayBlock(block) => {
                if self.mark_seen(block.id()).await {
                    return;
                }
                if let Some(handler) = handler {
                    handler.block_received(block, peer.addr().to_string()).await;
                }
            }
            Packet::RelayTransactionSet(set) => {
                let set_id = transaction_set_id(&set);
                if self.mark_seen(set_id).await {
                    return;
                }
                if let Some(handler) = handler {
                    handler
                        .transaction_set_received(set, peer.addr().to_string())
                        .await;
                }
            }
            Packet::GetBlocks { known } => {
                if let Some(handler) = handler {
                    let (blocks, more) = handler.blocks_requested(known).await;
                    let _ = peer.send(Packet::Blocks { blocks, more }).await;
                }
            }
            Packet::Blocks { blocks, more } => {
                if !peer.deliver_blocks(blocks, more).await {
                    debug!("Unsolicited blocks from {}", peer.addr());
                }
            }
            Packet::GetPeers => {
                let peers = self.peers.read().await;
                let addresses = peers.keys().cloned().collect();
                drop(peers);
                let _ = peer.send(Packet::Peers(addresses)).await;
            }
            Packet::Peers(addresses) => {
                for addr in addresses {
                    self.add_node(&addr);
                }
            }
            Packet::Handshake { .. } => {
                debug!("Unexpected handshake from {}", peer.addr());
            }
        }
    }

    async fn remove_peer(&self, addr: &str) {
        if self.peers.write().await.shift_remove(addr).is_some() {
            info!("Peer {} disconnected", addr);
        }
    }

    pub async fn disconnect(&self, addr: &str) -> Result<(), GatewayError> {
        match self.peers.write().await.shift_remove(addr) {
            // dropping the peer closes its writer channel, which ends both tasks
            Some(_) => Ok(()),
            None => Err(GatewayError::NotConnected(addr.to_string())),
        }
    }

    // Permanently refuse a misbehaving peer. Keyed by IP so a banned node
    // cannot return on another port.
    pub async fn ban(&self, addr: &str) {
        let ip = addr.rsplit_once(':').map(|(ip, _)| ip).unwrap_or(addr);
        warn!("Banning peer {}", ip);
        self.banned.write().await.insert(ip.to_string());

        let to_drop: Vec<String> = {
            let peers = self.peers.read().await;
            peers
                .keys()
                .filter(|peer_addr| peer_addr.starts_with(ip))
                .cloned()
                .collect()
        };
        for peer_addr in to_drop {
            let _ = self.disconnect(&peer_addr).await;
        }
    }

    async fn is_banned(&self, addr: &str) -> bool {
        let ip = addr.rsplit_once(':').map(|(ip, _)| ip).unwrap_or(addr);
        self.banned.read().await.contains(ip)
    }

    pub async fn peers_info(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .await
            .values()
            .map(|peer| PeerInfo {
                net_address: peer.addr().to_string(),
                inbound: peer.is_inbound(),
                version: peer.version().to_string(),
            })
            .collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    // first connected peer, the documented choice for chain synchronization
    pub async fn first_peer(&self) -> Option<Arc<Peer>> {
        self.peers.read().await.values().next().cloned()
    }

    pub async fn peer(&self, addr: &str) -> Option<Arc<Peer>> {
        self.peers.read().await.get(addr).cloned()
    }

    // returns true when the object was already relayed recently
    async fn mark_seen(&self, id: Hash) -> bool {
        self.seen.lock().await.put(id, ()).is_some()
    }

    pub async fn broadcast_block(&self, block: Block) {
        self.mark_seen(block.id()).await;
        self.broadcast(Packet::RelayBlock(block)).await;
    }

    pub async fn broadcast_transaction_set(&self, set: Vec<Transaction>) {
        self.mark_seen(transaction_set_id(&set)).await;
        self.broadcast(Packet::RelayTransactionSet(set)).await;
    }

    async fn broadcast(&self, packet: Packet) {
        let peers: Vec<Arc<Peer>> = self.peers.read().await.values().cloned().collect();
        for peer in peers {
            if let Err(e) = peer.send(packet.clone()).await {
                debug!("Broadcast to {} failed: {}", peer.addr(), e);
            }
        }
    }

    fn add_node(&self, addr: &str) {
        if addr.parse::<std::net::SocketAddr>().is_err() {
            return;
        }
        let _ = self.nodes.insert(addr.as_bytes(), &[]);
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        self.peers.write().await.clear();
        if let Err(e) = self.db.flush_async().await {
            warn!("Gateway database flush failed: {}", e);
        }
    }
}

// Deterministic identifier for a relayed transaction set
fn transaction_set_id(set: &[Transaction]) -> Hash {
    use sia_common::serializer::Writer;
    let mut writer = Writer::new();
    for txn in set {
        writer.write_hash(&txn.id());
    }
    sia_common::crypto::hash(writer.as_bytes())
}
