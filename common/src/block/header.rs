use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::config::BLOCK_HEADER_SIZE;
use crate::crypto::{Hash, Hashable};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

// The 80 bytes a miner grinds on. The block ID is the hash of this header,
// so external workers only ever need the header and the target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_id: Hash,
    pub nonce: u64,
    pub timestamp: u64,
    pub merkle_root: Hash,
}

impl BlockHeader {
    pub fn id(&self) -> Hash {
        Hashable::hash(self)
    }
}

impl Serializer for BlockHeader {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.parent_id);
        writer.write_u64(self.nonce);
        writer.write_u64(self.timestamp);
        writer.write_hash(&self.merkle_root);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(BlockHeader {
            parent_id: reader.read_hash()?,
            nonce: reader.read_u64()?,
            timestamp: reader.read_u64()?,
            merkle_root: reader.read_hash()?,
        })
    }

    fn size(&self) -> usize {
        BLOCK_HEADER_SIZE
    }
}

impl Hashable for BlockHeader {}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockHeader[parent: {}, timestamp: {}, nonce: {}]",
            self.parent_id, self.timestamp, self.nonce
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_80_bytes() {
        let header = BlockHeader {
            parent_id: Hash::zero(),
            nonce: 1,
            timestamp: 2,
            merkle_root: Hash::zero(),
        };
        assert_eq!(header.to_bytes().len(), BLOCK_HEADER_SIZE);
    }

    #[test]
    fn test_nonce_changes_id() {
        let mut header = BlockHeader {
            parent_id: Hash::zero(),
            nonce: 0,
            timestamp: 7,
            merkle_root: Hash::zero(),
        };
        let before = header.id();
        header.nonce = 1;
        assert_ne!(before, header.id());
    }
}
