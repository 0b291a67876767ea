mod header;
mod target;

pub use header::BlockHeader;
pub use target::Target;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::crypto::{hash, Hash};
use crate::serializer::{read_list, write_list, Reader, ReaderError, Serializer, Writer};
use crate::transaction::{SiacoinOutput, Transaction, SPECIFIER_MINER_PAYOUT};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub parent_id: Hash,
    pub nonce: u64,
    pub timestamp: u64,
    pub miner_payouts: Vec<SiacoinOutput>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    // Commitment over the block body. The header carries only this root, so
    // external miners grind 80 bytes while the body stays bound to the ID.
    pub fn merkle_root(&self) -> Hash {
        let mut writer = Writer::new();
        write_list(&mut writer, &self.miner_payouts);
        writer.write_u16(self.transactions.len() as u16);
        for txn in &self.transactions {
            writer.write_hash(&txn.id());
        }
        hash(writer.as_bytes())
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            parent_id: self.parent_id.clone(),
            nonce: self.nonce,
            timestamp: self.timestamp,
            merkle_root: self.merkle_root(),
        }
    }

    pub fn id(&self) -> Hash {
        self.header().id()
    }

    pub fn miner_payout_id(&self, index: u64) -> Hash {
        let mut writer = Writer::new();
        writer.write_bytes(SPECIFIER_MINER_PAYOUT.as_bytes());
        writer.write_hash(&self.id());
        writer.write_u64(index);
        hash(writer.as_bytes())
    }

    pub fn transaction(&self, id: &Hash) -> Option<&Transaction> {
        self.transactions.iter().find(|txn| &txn.id() == id)
    }
}

impl Serializer for Block {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.parent_id);
        writer.write_u64(self.nonce);
        writer.write_u64(self.timestamp);
        write_list(writer, &self.miner_payouts);
        write_list(writer, &self.transactions);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Block {
            parent_id: reader.read_hash()?,
            nonce: reader.read_u64()?,
            timestamp: reader.read_u64()?,
            miner_payouts: read_list(reader)?,
            transactions: read_list(reader)?,
        })
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block[{}, parent: {}, timestamp: {}, txs: {}]",
            self.id(),
            self.parent_id,
            self.timestamp,
            self.transactions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use crate::unlock::UnlockHash;

    fn sample_block() -> Block {
        Block {
            parent_id: Hash::zero(),
            nonce: 0,
            timestamp: 100,
            miner_payouts: vec![SiacoinOutput {
                value: Currency::from_coins(300_000),
                unlock_hash: UnlockHash::zero(),
            }],
            transactions: Vec::new(),
        }
    }

    #[test]
    fn test_id_matches_header_id() {
        let block = sample_block();
        assert_eq!(block.id(), block.header().id());
    }

    #[test]
    fn test_body_is_bound_to_id() {
        let mut block = sample_block();
        let before = block.id();
        block.miner_payouts[0].value = Currency::from_coins(1);
        assert_ne!(before, block.id());
    }

    #[test]
    fn test_wire_round_trip() {
        let block = sample_block();
        let decoded = Block::from_bytes(&block.to_bytes()).unwrap();
        assert_eq!(block, decoded);
    }
}
