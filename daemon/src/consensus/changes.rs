use serde::{Deserialize, Serialize};

use sia_common::block::Block;
use sia_common::crypto::{hash, Hash};
use sia_common::serializer::{
    read_list, write_list, Reader, ReaderError, Serializer, Writer,
};
use sia_common::transaction::{FileContract, SiacoinOutput, SiafundOutput};

// Whether a diff creates or removes its object when the change is applied.
// Reverting a change processes its diffs backwards with directions flipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffDirection {
    Apply,
    Revert,
}

impl DiffDirection {
    pub fn inverse(self) -> Self {
        match self {
            DiffDirection::Apply => DiffDirection::Revert,
            DiffDirection::Revert => DiffDirection::Apply,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiacoinOutputDiff {
    pub direction: DiffDirection,
    pub id: Hash,
    pub output: SiacoinOutput,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiafundOutputDiff {
    pub direction: DiffDirection,
    pub id: Hash,
    pub output: SiafundOutput,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileContractDiff {
    pub direction: DiffDirection,
    pub id: Hash,
    pub contract: FileContract,
}

// Everything one block did to consensus state. Kept per block so a reorg
// can undo exactly what the block applied.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockDiffs {
    pub siacoin_diffs: Vec<SiacoinOutputDiff>,
    pub siafund_diffs: Vec<SiafundOutputDiff>,
    pub contract_diffs: Vec<FileContractDiff>,
}

// One state transition of the consensus set: zero or more reverted blocks
// (tip-first) followed by zero or more applied blocks (parent-first),
// sharing a common pivot parent. A reorg is never split across changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusChange {
    pub id: Hash,
    // previous change in the stream; Beginning (all zero) for the first
    pub prev: Hash,
    pub reverted_blocks: Vec<Block>,
    pub applied_blocks: Vec<Block>,
    pub synced: bool,
    // aggregated deltas for subscriber convenience: reverts first, inverted,
    // then applies in block order
    pub siacoin_diffs: Vec<SiacoinOutputDiff>,
    pub siafund_diffs: Vec<SiafundOutputDiff>,
    pub contract_diffs: Vec<FileContractDiff>,
}

impl ConsensusChange {
    // Stable identifier derived from the chain movement itself, so replaying
    // the log reproduces identical IDs.
    pub fn derive_id(prev: &Hash, reverted: &[Block], applied: &[Block]) -> Hash {
        let mut writer = Writer::new();
        writer.write_hash(prev);
        writer.write_u16(reverted.len() as u16);
        for block in reverted {
            writer.write_hash(&block.id());
        }
        writer.write_u16(applied.len() as u16);
        for block in applied {
            writer.write_hash(&block.id());
        }
        hash(writer.as_bytes())
    }
}

impl Serializer for DiffDirection {
    fn write(&self, writer: &mut Writer) {
        writer.write_bool(matches!(self, DiffDirection::Apply));
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(if reader.read_bool()? {
            DiffDirection::Apply
        } else {
            DiffDirection::Revert
        })
    }

    fn size(&self) -> usize {
        1
    }
}

impl Serializer for SiacoinOutputDiff {
    fn write(&self, writer: &mut Writer) {
        self.direction.write(writer);
        writer.write_hash(&self.id);
        self.output.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(SiacoinOutputDiff {
            direction: DiffDirection::read(reader)?,
            id: reader.read_hash()?,
            output: SiacoinOutput::read(reader)?,
        })
    }
}

impl Serializer for SiafundOutputDiff {
    fn write(&self, writer: &mut Writer) {
        self.direction.write(writer);
        writer.write_hash(&self.id);
        self.output.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(SiafundOutputDiff {
            direction: DiffDirection::read(reader)?,
            id: reader.read_hash()?,
            output: SiafundOutput::read(reader)?,
        })
    }
}

impl Serializer for FileContractDiff {
    fn write(&self, writer: &mut Writer) {
        self.direction.write(writer);
        writer.write_hash(&self.id);
        self.contract.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(FileContractDiff {
            direction: DiffDirection::read(reader)?,
            id: reader.read_hash()?,
            contract: FileContract::read(reader)?,
        })
    }
}

impl Serializer for BlockDiffs {
    fn write(&self, writer: &mut Writer) {
        write_list(writer, &self.siacoin_diffs);
        write_list(writer, &self.siafund_diffs);
        write_list(writer, &self.contract_diffs);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(BlockDiffs {
            siacoin_diffs: read_list(reader)?,
            siafund_diffs: read_list(reader)?,
            contract_diffs: read_list(reader)?,
        })
    }
}

impl Serializer for ConsensusChange {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.id);
        writer.write_hash(&self.prev);
        write_list(writer, &self.reverted_blocks);
        write_list(writer, &self.applied_blocks);
        writer.write_bool(self.synced);
        write_list(writer, &self.siacoin_diffs);
        write_list(writer, &self.siafund_diffs);
        write_list(writer, &self.contract_diffs);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(ConsensusChange {
            id: reader.read_hash()?,
            prev: reader.read_hash()?,
            reverted_blocks: read_list(reader)?,
            applied_blocks: read_list(reader)?,
            synced: reader.read_bool()?,
            siacoin_diffs: read_list(reader)?,
            siafund_diffs: read_list(reader)?,
            contract_diffs: read_list(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_inverse() {
        assert_eq!(DiffDirection::Apply.inverse(), DiffDirection::Revert);
        assert_eq!(DiffDirection::Revert.inverse(), DiffDirection::Apply);
    }

    #[test]
    fn test_derived_id_depends_on_movement() {
        let block = Block {
            parent_id: Hash::zero(),
            nonce: 0,
            timestamp: 1,
            miner_payouts: Vec::new(),
            transactions: Vec::new(),
        };
        let a = ConsensusChange::derive_id(&Hash::zero(), &[], &[block.clone()]);
        let b = ConsensusChange::derive_id(&Hash::zero(), &[block.clone()], &[]);
        let c = ConsensusChange::derive_id(&a, &[], &[block]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
