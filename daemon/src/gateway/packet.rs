use sia_common::block::Block;
use sia_common::crypto::Hash;
use sia_common::serializer::{read_list, write_list, Reader, ReaderError, Serializer, Writer};
use sia_common::transaction::Transaction;

// Wire messages exchanged between peers. Every packet is framed by a u32
// length prefix and starts with a one-byte discriminant.
#[derive(Clone, Debug)]
pub enum Packet {
    // first packet in both directions; listen_port lets the remote compute
    // our dial-back address
    Handshake { version: String, listen_port: u16 },
    RelayBlock(Block),
    RelayTransactionSet(Vec<Transaction>),
    // latest-first block IDs the requester already has
    GetBlocks { known: Vec<Hash> },
    // `more` signals the responder has blocks beyond the batch ceiling
    Blocks { blocks: Vec<Block>, more: bool },
    GetPeers,
    Peers(Vec<String>),
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Handshake { .. } => "handshake",
            Packet::RelayBlock(_) => "relay-block",
            Packet::RelayTransactionSet(_) => "relay-transaction-set",
            Packet::GetBlocks { .. } => "get-blocks",
            Packet::Blocks { .. } => "blocks",
            Packet::GetPeers => "get-peers",
            Packet::Peers(_) => "peers",
        }
    }
}

const ID_HANDSHAKE: u8 = 0;
const ID_RELAY_BLOCK: u8 = 1;
const ID_RELAY_TRANSACTION_SET: u8 = 2;
const ID_GET_BLOCKS: u8 = 3;
const ID_BLOCKS: u8 = 4;
const ID_GET_PEERS: u8 = 5;
const ID_PEERS: u8 = 6;

impl Serializer for Packet {
    fn write(&self, writer: &mut Writer) {
        match self {
            Packet::Handshake {
                version,
                listen_port,
            } => {
                writer.write_u8(ID_HANDSHAKE);
                writer.write_string(version);
                writer.write_u16(*listen_port);
            }
            Packet::RelayBlock(block) => {
                writer.write_u8(ID_RELAY_BLOCK);
                block.write(writer);
            }
            Packet::RelayTransactionSet(set) => {
                writer.write_u8(ID_RELAY_TRANSACTION_SET);
                write_list(writer, set);
            }
            Packet::GetBlocks { known } => {
                writer.write_u8(ID_GET_BLOCKS);
                write_list(writer, known);
            }
            Packet::Blocks { blocks, more } => {
                writer.write_u8(ID_BLOCKS);
                write_list(writer, blocks);
                writer.write_bool(*more);
            }
            Packet::GetPeers => writer.write_u8(ID_GET_PEERS),
            Packet::Peers(addresses) => {
                writer.write_u8(ID_PEERS);
                write_list(writer, addresses);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            ID_HANDSHAKE => Packet::Handshake {
                version: reader.read_string()?,
                listen_port: reader.read_u16()?,
            },
            ID_RELAY_BLOCK => Packet::RelayBlock(Block::read(reader)?),
            ID_RELAY_TRANSACTION_SET => Packet::RelayTransactionSet(read_list(reader)?),
            ID_GET_BLOCKS => Packet::GetBlocks {
                known: read_list(reader)?,
            },
            ID_BLOCKS => Packet::Blocks {
                blocks: read_list(reader)?,
                more: reader.read_bool()?,
            },
            ID_GET_PEERS => Packet::GetPeers,
            ID_PEERS => Packet::Peers(read_list(reader)?),
            _ => return Err(ReaderError::InvalidValue),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_round_trip() {
        let packets = vec![
            Packet::Handshake {
                version: "0.1.0".to_string(),
                listen_port: 9981,
            },
            Packet::GetBlocks {
                known: vec![Hash::zero()],
            },
            Packet::GetPeers,
            Packet::Peers(vec!["1.2.3.4:9981".to_string()]),
        ];

        for packet in packets {
            let bytes = packet.to_bytes();
            let decoded = Packet::from_bytes(&bytes).unwrap();
            assert_eq!(packet.kind(), decoded.kind());
            assert_eq!(bytes, decoded.to_bytes());
        }
    }
}
