use std::sync::Arc;

use sia_common::block::Block;
use sia_common::serializer::Serializer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, Duration};

use super::{GatewayError, Packet};
use crate::config::{MAX_PACKET_SIZE, PEER_REQUEST_TIMEOUT_MS};

// One connected remote node. The writer half is owned by a dedicated task
// fed through a channel so any module can queue packets without holding a
// lock across I/O.
pub struct Peer {
    // canonical dial-back address, also the key in the gateway's peer map
    addr: String,
    inbound: bool,
    version: String,
    sender: mpsc::Sender<Packet>,
    // a single in-flight block request per peer keeps the protocol free of
    // correlation IDs
    pending_blocks: Mutex<Option<oneshot::Sender<(Vec<Block>, bool)>>>,
}

impl Peer {
    pub fn new(
        addr: String,
        inbound: bool,
        version: String,
        sender: mpsc::Sender<Packet>,
    ) -> Self {
        Peer {
            addr,
            inbound,
            version,
            sender,
            pending_blocks: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn send(&self, packet: Packet) -> Result<(), GatewayError> {
        self.sender
            .send(packet)
            .await
            .map_err(|_| GatewayError::PeerDisconnected)
    }

    // Ask the peer for blocks after the latest ID in `known` it recognizes.
    // Resolves when the matching Blocks packet arrives on the reader task.
    pub async fn request_blocks(
        self: &Arc<Self>,
        known: Vec<sia_common::crypto::Hash>,
    ) -> Result<(Vec<Block>, bool), GatewayError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_blocks.lock().await;
            if pending.is_some() {
                return Err(GatewayError::RequestInFlight);
            }
            *pending = Some(tx);
        }

        if let Err(e) = self.send(Packet::GetBlocks { known }).await {
            *self.pending_blocks.lock().await = None;
            return Err(e);
        }

        match timeout(Duration::from_millis(PEER_REQUEST_TIMEOUT_MS), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(GatewayError::PeerDisconnected),
            Err(_) => {
                *self.pending_blocks.lock().await = None;
                Err(GatewayError::RequestTimeout)
            }
        }
    }

    // Called by the reader task when a Blocks packet arrives
    pub async fn deliver_blocks(&self, blocks: Vec<Block>, more: bool) -> bool {
        match self.pending_blocks.lock().await.take() {
            Some(tx) => tx.send((blocks, more)).is_ok(),
            None => false,
        }
    }
}

// Framing: u32 big-endian length prefix, then the packet encoding. The size
// cap is enforced before any allocation happens.
pub async fn read_packet(stream: &mut OwnedReadHalf) -> Result<Packet, GatewayError> {
    let len = stream.read_u32().await.map_err(GatewayError::Io)?;
    if len == 0 || len > MAX_PACKET_SIZE {
        return Err(GatewayError::OversizedPacket(len));
    }

    let mut buffer = vec![0u8; len as usize];
    stream
        .read_exact(&mut buffer)
        .await
        .map_err(GatewayError::Io)?;

    Packet::from_bytes(&buffer).map_err(GatewayError::Malformed)
}

pub async fn write_packet(
    stream: &mut OwnedWriteHalf,
    packet: &Packet,
) -> Result<(), GatewayError> {
    let bytes = packet.to_bytes();
    if bytes.len() > MAX_PACKET_SIZE as usize {
        return Err(GatewayError::OversizedPacket(bytes.len() as u32));
    }

    stream
        .write_u32(bytes.len() as u32)
        .await
        .map_err(GatewayError::Io)?;
    stream.write_all(&bytes).await.map_err(GatewayError::Io)?;
    stream.flush().await.map_err(GatewayError::Io)
}
