use serde::{Deserialize, Serialize};

use crate::block::Target;
use crate::crypto::Hash;
use crate::currency::Currency;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

// Per-height aggregates maintained by the explorer; functionally determined
// by the consensus change stream it has ingested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFacts {
    pub height: u64,
    #[serde(rename = "blockid")]
    pub block_id: Hash,
    pub timestamp: u64,
    pub target: Target,
    // cumulative work, saturated into 128 bits for the API
    pub difficulty: u128,
    #[serde(rename = "totalcoins")]
    pub total_coins: Currency,

    // running object counts since genesis
    #[serde(rename = "minerpayoutcount")]
    pub miner_payout_count: u64,
    #[serde(rename = "transactioncount")]
    pub transaction_count: u64,
    #[serde(rename = "siacoininputcount")]
    pub siacoin_input_count: u64,
    #[serde(rename = "siacoinoutputcount")]
    pub siacoin_output_count: u64,
    #[serde(rename = "filecontractcount")]
    pub file_contract_count: u64,
    #[serde(rename = "filecontractrevisioncount")]
    pub file_contract_revision_count: u64,
    #[serde(rename = "storageproofcount")]
    pub storage_proof_count: u64,
    #[serde(rename = "siafundoutputcount")]
    pub siafund_output_count: u64,
    #[serde(rename = "arbitrarydatacount")]
    pub arbitrary_data_count: u64,
}

impl Serializer for BlockFacts {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.height);
        writer.write_hash(&self.block_id);
        writer.write_u64(self.timestamp);
        self.target.write(writer);
        writer.write_u128(self.difficulty);
        self.total_coins.write(writer);
        writer.write_u64(self.miner_payout_count);
        writer.write_u64(self.transaction_count);
        writer.write_u64(self.siacoin_input_count);
        writer.write_u64(self.siacoin_output_count);
        writer.write_u64(self.file_contract_count);
        writer.write_u64(self.file_contract_revision_count);
        writer.write_u64(self.storage_proof_count);
        writer.write_u64(self.siafund_output_count);
        writer.write_u64(self.arbitrary_data_count);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(BlockFacts {
            height: reader.read_u64()?,
            block_id: reader.read_hash()?,
            timestamp: reader.read_u64()?,
            target: Target::read(reader)?,
            difficulty: reader.read_u128()?,
            total_coins: Currency::read(reader)?,
            miner_payout_count: reader.read_u64()?,
            transaction_count: reader.read_u64()?,
            siacoin_input_count: reader.read_u64()?,
            siacoin_output_count: reader.read_u64()?,
            file_contract_count: reader.read_u64()?,
            file_contract_revision_count: reader.read_u64()?,
            storage_proof_count: reader.read_u64()?,
            siafund_output_count: reader.read_u64()?,
            arbitrary_data_count: reader.read_u64()?,
        })
    }
}

// What kind of object a 32-byte hash resolves to. Unlock hashes come last:
// they are hashes of arbitrary conditions and carry no collision guarantee
// against the other ID spaces, so they must never shadow a real ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    #[serde(rename = "blockid")]
    BlockId,
    #[serde(rename = "transactionid")]
    TransactionId,
    #[serde(rename = "siacoinoutputid")]
    SiacoinOutputId,
    #[serde(rename = "filecontractid")]
    FileContractId,
    #[serde(rename = "siafundoutputid")]
    SiafundOutputId,
    #[serde(rename = "unlockhash")]
    UnlockHash,
}
