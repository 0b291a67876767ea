use serde::{Deserialize, Serialize};

use sia_common::crypto::Hash;
use sia_common::serializer::{read_list, write_list, Reader, ReaderError, Serializer, Writer};
use sia_common::transaction::FileContract;

// Lifecycle of a hosted contract. Proof submission retries every block
// inside the window until the proof confirms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationStatus {
    // formation transaction not yet on chain
    Unconfirmed,
    OriginConfirmed,
    ProofConfirmed,
    Succeeded,
    Failed,
}

impl Serializer for ObligationStatus {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            ObligationStatus::Unconfirmed => 0,
            ObligationStatus::OriginConfirmed => 1,
            ObligationStatus::ProofConfirmed => 2,
            ObligationStatus::Succeeded => 3,
            ObligationStatus::Failed => 4,
        });
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => ObligationStatus::Unconfirmed,
            1 => ObligationStatus::OriginConfirmed,
            2 => ObligationStatus::ProofConfirmed,
            3 => ObligationStatus::Succeeded,
            4 => ObligationStatus::Failed,
            _ => return Err(ReaderError::InvalidValue),
        })
    }

    fn size(&self) -> usize {
        1
    }
}

// Everything the host must remember about one contract it is party to.
// At most one obligation exists per contract ID.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageObligation {
    #[serde(rename = "contractid")]
    pub contract_id: Hash,
    // latest known revision of the contract terms
    pub contract: FileContract,
    #[serde(rename = "sectorroots")]
    pub sector_roots: Vec<Hash>,
    pub status: ObligationStatus,
}

impl StorageObligation {
    pub fn new(contract_id: Hash, contract: FileContract) -> Self {
        StorageObligation {
            contract_id,
            contract,
            sector_roots: Vec::new(),
            status: ObligationStatus::Unconfirmed,
        }
    }

    pub fn proof_window_open(&self, height: u64) -> bool {
        height >= self.contract.window_start && height <= self.contract.window_end
    }
}

impl Serializer for StorageObligation {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.contract_id);
        self.contract.write(writer);
        write_list(writer, &self.sector_roots);
        self.status.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(StorageObligation {
            contract_id: reader.read_hash()?,
            contract: FileContract::read(reader)?,
            sector_roots: read_list(reader)?,
            status: ObligationStatus::read(reader)?,
        })
    }
}
