use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::crypto::{hash, Hash, Hashable, Signature};
use crate::currency::Currency;
use crate::serializer::{
    list_size, read_list, write_list, Reader, ReaderError, Serializer, Writer,
};
use crate::unlock::{UnlockConditions, UnlockHash};

pub const SPECIFIER_SIZE: usize = 16;

// Domain separator for deterministic child-ID derivation. Every ID space
// (coin outputs, contracts, fund outputs, proof payouts, payouts) hashes a
// distinct specifier first so IDs can never collide across spaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specifier([u8; SPECIFIER_SIZE]);

impl Specifier {
    pub const fn new(tag: &'static [u8]) -> Self {
        let mut bytes = [0u8; SPECIFIER_SIZE];
        let mut i = 0;
        while i < tag.len() && i < SPECIFIER_SIZE {
            bytes[i] = tag[i];
            i += 1;
        }
        Specifier(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SPECIFIER_SIZE] {
        &self.0
    }
}

pub const SPECIFIER_SIACOIN_OUTPUT: Specifier = Specifier::new(b"siacoin output");
pub const SPECIFIER_SIAFUND_OUTPUT: Specifier = Specifier::new(b"siafund output");
pub const SPECIFIER_FILE_CONTRACT: Specifier = Specifier::new(b"file contract");
pub const SPECIFIER_STORAGE_PROOF: Specifier = Specifier::new(b"storage proof");
pub const SPECIFIER_SIAFUND_CLAIM: Specifier = Specifier::new(b"siafund claim");
pub const SPECIFIER_MINER_PAYOUT: Specifier = Specifier::new(b"miner payout");

// References a previous siacoin output and proves authority to spend it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinInput {
    pub parent_id: Hash,
    pub unlock_conditions: UnlockConditions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiafundInput {
    pub parent_id: Hash,
    pub unlock_conditions: UnlockConditions,
    // accrued siacoin claims are paid out here when the fund output is spent
    pub claim_unlock_hash: UnlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiafundOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
    pub claim_start: Currency,
}

// On-chain storage promise. The payout splits into valid outputs when a
// storage proof lands inside the window and missed outputs otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContract {
    pub file_size: u64,
    pub file_merkle_root: Hash,
    pub window_start: u64,
    pub window_end: u64,
    pub payout: Currency,
    pub valid_proof_outputs: Vec<SiacoinOutput>,
    pub missed_proof_outputs: Vec<SiacoinOutput>,
    pub unlock_hash: UnlockHash,
    pub revision_number: u64,
}

impl FileContract {
    // per-output IDs of the contract payout, valid and missed branches
    pub fn payout_id(contract_id: &Hash, valid: bool, index: u64) -> Hash {
        let mut writer = Writer::new();
        writer.write_bytes(SPECIFIER_STORAGE_PROOF.as_bytes());
        writer.write_hash(contract_id);
        writer.write_bool(valid);
        writer.write_u64(index);
        hash(writer.as_bytes())
    }
}

// Replaces the fields of an unexpired contract; only accepted when the
// revision number strictly increases
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContractRevision {
    pub parent_id: Hash,
    pub unlock_conditions: UnlockConditions,
    pub new_revision_number: u64,
    pub new_file_size: u64,
    pub new_file_merkle_root: Hash,
    pub new_window_start: u64,
    pub new_window_end: u64,
    pub new_valid_proof_outputs: Vec<SiacoinOutput>,
    pub new_missed_proof_outputs: Vec<SiacoinOutput>,
    pub new_unlock_hash: UnlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    pub parent_id: Hash,
    #[serde(with = "segment_hex")]
    pub segment: [u8; 64],
    pub hash_set: Vec<Hash>,
}

mod segment_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let raw = String::deserialize(d)?;
        let decoded = hex::decode(raw).map_err(serde::de::Error::custom)?;
        decoded
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid segment length"))
    }
}

// Which parts of the transaction a signature commits to. Whole-transaction
// coverage is the common case; partial coverage lists signature indices so
// collaborating signers can append without invalidating each other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveredFields {
    pub whole_transaction: bool,
    pub signatures: Vec<u64>,
}

impl CoveredFields {
    pub fn whole_transaction() -> Self {
        CoveredFields {
            whole_transaction: true,
            signatures: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub parent_id: Hash,
    pub public_key_index: u64,
    pub timelock: u64,
    pub covered_fields: CoveredFields,
    pub signature: Signature,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub siacoin_inputs: Vec<SiacoinInput>,
    #[serde(default)]
    pub siacoin_outputs: Vec<SiacoinOutput>,
    #[serde(default)]
    pub file_contracts: Vec<FileContract>,
    #[serde(default)]
    pub file_contract_revisions: Vec<FileContractRevision>,
    #[serde(default)]
    pub storage_proofs: Vec<StorageProof>,
    #[serde(default)]
    pub siafund_inputs: Vec<SiafundInput>,
    #[serde(default)]
    pub siafund_outputs: Vec<SiafundOutput>,
    #[serde(default)]
    pub miner_fees: Vec<Currency>,
    #[serde(default)]
    pub arbitrary_data: Vec<Vec<u8>>,
    #[serde(default)]
    pub signatures: Vec<TransactionSignature>,
}

impl Transaction {
    // Encoding of everything except signatures. The transaction ID and all
    // child IDs derive from this so appending a signature never changes an
    // ID another transaction depends on.
    fn write_unsigned(&self, writer: &mut Writer) {
        write_list(writer, &self.siacoin_inputs);
        write_list(writer, &self.siacoin_outputs);
        write_list(writer, &self.file_contracts);
        write_list(writer, &self.file_contract_revisions);
        write_list(writer, &self.storage_proofs);
        write_list(writer, &self.siafund_inputs);
        write_list(writer, &self.siafund_outputs);
        write_list(writer, &self.miner_fees);
        write_list(writer, &self.arbitrary_data);
    }

    pub fn id(&self) -> Hash {
        let mut writer = Writer::new();
        self.write_unsigned(&mut writer);
        hash(writer.as_bytes())
    }

    fn child_id(&self, specifier: &Specifier, index: u64) -> Hash {
        let mut writer = Writer::new();
        writer.write_bytes(specifier.as_bytes());
        self.write_unsigned(&mut writer);
        writer.write_u64(index);
        hash(writer.as_bytes())
    }

    pub fn siacoin_output_id(&self, index: u64) -> Hash {
        self.child_id(&SPECIFIER_SIACOIN_OUTPUT, index)
    }

    pub fn siafund_output_id(&self, index: u64) -> Hash {
        self.child_id(&SPECIFIER_SIAFUND_OUTPUT, index)
    }

    pub fn file_contract_id(&self, index: u64) -> Hash {
        self.child_id(&SPECIFIER_FILE_CONTRACT, index)
    }

    // claim outputs spawned when a siafund output is spent
    pub fn siafund_claim_output_id(siafund_output_id: &Hash) -> Hash {
        let mut writer = Writer::new();
        writer.write_bytes(SPECIFIER_SIAFUND_CLAIM.as_bytes());
        writer.write_hash(siafund_output_id);
        hash(writer.as_bytes())
    }

    // What a transaction signature actually signs: the unsigned encoding
    // plus the signature's own binding fields. Partial coverage folds in
    // the covered sibling signatures instead of the whole transaction.
    pub fn sig_hash(&self, sig_index: usize) -> Result<Hash, ReaderError> {
        let sig = self
            .signatures
            .get(sig_index)
            .ok_or(ReaderError::InvalidValue)?;

        let mut writer = Writer::new();
        if sig.covered_fields.whole_transaction {
            self.write_unsigned(&mut writer);
        } else {
            for index in &sig.covered_fields.signatures {
                let covered = self
                    .signatures
                    .get(*index as usize)
                    .ok_or(ReaderError::InvalidValue)?;
                covered.write(&mut writer);
            }
        }
        writer.write_hash(&sig.parent_id);
        writer.write_u64(sig.public_key_index);
        writer.write_u64(sig.timelock);
        Ok(hash(writer.as_bytes()))
    }

    pub fn total_fees(&self) -> Currency {
        self.miner_fees.iter().copied().sum()
    }

    pub fn siacoin_output_sum(&self) -> Currency {
        self.siacoin_outputs.iter().map(|o| o.value).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.siacoin_inputs.is_empty()
            && self.siacoin_outputs.is_empty()
            && self.file_contracts.is_empty()
            && self.file_contract_revisions.is_empty()
            && self.storage_proofs.is_empty()
            && self.siafund_inputs.is_empty()
            && self.siafund_outputs.is_empty()
            && self.arbitrary_data.is_empty()
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}, inputs: {}, outputs: {}, contracts: {}]",
            self.id(),
            self.siacoin_inputs.len(),
            self.siacoin_outputs.len(),
            self.file_contracts.len()
        )
    }
}

impl Serializer for SiacoinInput {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.parent_id);
        self.unlock_conditions.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(SiacoinInput {
            parent_id: reader.read_hash()?,
            unlock_conditions: UnlockConditions::read(reader)?,
        })
    }
}

impl Serializer for SiacoinOutput {
    fn write(&self, writer: &mut Writer) {
        self.value.write(writer);
        self.unlock_hash.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(SiacoinOutput {
            value: Currency::read(reader)?,
            unlock_hash: UnlockHash::read(reader)?,
        })
    }

    fn size(&self) -> usize {
        self.value.size() + self.unlock_hash.size()
    }
}

impl Serializer for SiafundInput {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.parent_id);
        self.unlock_conditions.write(writer);
        self.claim_unlock_hash.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(SiafundInput {
            parent_id: reader.read_hash()?,
            unlock_conditions: UnlockConditions::read(reader)?,
            claim_unlock_hash: UnlockHash::read(reader)?,
        })
    }
}

impl Serializer for SiafundOutput {
    fn write(&self, writer: &mut Writer) {
        self.value.write(writer);
        self.unlock_hash.write(writer);
        self.claim_start.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(SiafundOutput {
            value: Currency::read(reader)?,
            unlock_hash: UnlockHash::read(reader)?,
            claim_start: Currency::read(reader)?,
        })
    }

    fn size(&self) -> usize {
        self.value.size() + self.unlock_hash.size() + self.claim_start.size()
    }
}

impl Serializer for FileContract {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.file_size);
        writer.write_hash(&self.file_merkle_root);
        writer.write_u64(self.window_start);
        writer.write_u64(self.window_end);
        self.payout.write(writer);
        write_list(writer, &self.valid_proof_outputs);
        write_list(writer, &self.missed_proof_outputs);
        self.unlock_hash.write(writer);
        writer.write_u64(self.revision_number);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(FileContract {
            file_size: reader.read_u64()?,
            file_merkle_root: reader.read_hash()?,
            window_start: reader.read_u64()?,
            window_end: reader.read_u64()?,
            payout: Currency::read(reader)?,
            valid_proof_outputs: read_list(reader)?,
            missed_proof_outputs: read_list(reader)?,
            unlock_hash: UnlockHash::read(reader)?,
            revision_number: reader.read_u64()?,
        })
    }
}

impl Serializer for FileContractRevision {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.parent_id);
        self.unlock_conditions.write(writer);
        writer.write_u64(self.new_revision_number);
        writer.write_u64(self.new_file_size);
        writer.write_hash(&self.new_file_merkle_root);
        writer.write_u64(self.new_window_start);
        writer.write_u64(self.new_window_end);
        write_list(writer, &self.new_valid_proof_outputs);
        write_list(writer, &self.new_missed_proof_outputs);
        self.new_unlock_hash.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(FileContractRevision {
            parent_id: reader.read_hash()?,
            unlock_conditions: UnlockConditions::read(reader)?,
            new_revision_number: reader.read_u64()?,
            new_file_size: reader.read_u64()?,
            new_file_merkle_root: reader.read_hash()?,
            new_window_start: reader.read_u64()?,
            new_window_end: reader.read_u64()?,
            new_valid_proof_outputs: read_list(reader)?,
            new_missed_proof_outputs: read_list(reader)?,
            new_unlock_hash: UnlockHash::read(reader)?,
        })
    }
}

impl Serializer for StorageProof {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.parent_id);
        writer.write_bytes(&self.segment);
        write_list(writer, &self.hash_set);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(StorageProof {
            parent_id: reader.read_hash()?,
            segment: reader.read_bytes_64()?,
            hash_set: read_list(reader)?,
        })
    }
}

impl Serializer for CoveredFields {
    fn write(&self, writer: &mut Writer) {
        writer.write_bool(self.whole_transaction);
        write_list(writer, &self.signatures);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(CoveredFields {
            whole_transaction: reader.read_bool()?,
            signatures: read_list(reader)?,
        })
    }
}

impl Serializer for TransactionSignature {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.parent_id);
        writer.write_u64(self.public_key_index);
        writer.write_u64(self.timelock);
        self.covered_fields.write(writer);
        self.signature.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(TransactionSignature {
            parent_id: reader.read_hash()?,
            public_key_index: reader.read_u64()?,
            timelock: reader.read_u64()?,
            covered_fields: CoveredFields::read(reader)?,
            signature: Signature::read(reader)?,
        })
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        self.write_unsigned(writer);
        write_list(writer, &self.signatures);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Transaction {
            siacoin_inputs: read_list(reader)?,
            siacoin_outputs: read_list(reader)?,
            file_contracts: read_list(reader)?,
            file_contract_revisions: read_list(reader)?,
            storage_proofs: read_list(reader)?,
            siafund_inputs: read_list(reader)?,
            siafund_outputs: read_list(reader)?,
            miner_fees: read_list(reader)?,
            arbitrary_data: read_list(reader)?,
            signatures: read_list(reader)?,
        })
    }

    fn size(&self) -> usize {
        list_size(&self.siacoin_inputs)
            + list_size(&self.siacoin_outputs)
            + list_size(&self.file_contracts)
            + list_size(&self.file_contract_revisions)
            + list_size(&self.storage_proofs)
            + list_size(&self.siafund_inputs)
            + list_size(&self.siafund_outputs)
            + list_size(&self.miner_fees)
            + list_size(&self.arbitrary_data)
            + list_size(&self.signatures)
    }
}

impl Hashable for Transaction {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    fn sample_output(value: u128) -> SiacoinOutput {
        SiacoinOutput {
            value: Currency::new(value),
            unlock_hash: UnlockHash::zero(),
        }
    }

    fn sample_transaction() -> Transaction {
        Transaction {
            siacoin_outputs: vec![sample_output(5), sample_output(7)],
            miner_fees: vec![Currency::new(1)],
            arbitrary_data: vec![b"hello".to_vec()],
            ..Default::default()
        }
    }

    #[test]
    fn test_id_ignores_signatures() {
        let mut txn = sample_transaction();
        let before = txn.id();

        let key = SecretKey::from_bytes(&[5u8; 32]);
        txn.signatures.push(TransactionSignature {
            parent_id: Hash::zero(),
            public_key_index: 0,
            timelock: 0,
            covered_fields: CoveredFields::whole_transaction(),
            signature: key.sign(b"whatever"),
        });
        assert_eq!(before, txn.id());
    }

    #[test]
    fn test_child_ids_are_distinct_per_space() {
        let txn = sample_transaction();
        assert_ne!(txn.siacoin_output_id(0), txn.siacoin_output_id(1));
        assert_ne!(txn.siacoin_output_id(0), txn.siafund_output_id(0));
        assert_ne!(txn.siacoin_output_id(0), txn.file_contract_id(0));
    }

    #[test]
    fn test_wire_round_trip() {
        let txn = sample_transaction();
        let decoded = Transaction::from_bytes(&txn.to_bytes()).unwrap();
        assert_eq!(txn, decoded);
        assert_eq!(txn.id(), decoded.id());
    }

    #[test]
    fn test_payout_ids_differ_by_branch() {
        let contract_id = hash(b"contract");
        assert_ne!(
            FileContract::payout_id(&contract_id, true, 0),
            FileContract::payout_id(&contract_id, false, 0),
        );
    }

    #[test]
    fn test_signing_round_trip() {
        let key = SecretKey::from_bytes(&[8u8; 32]);
        let mut txn = sample_transaction();
        txn.signatures.push(TransactionSignature {
            parent_id: hash(b"parent"),
            public_key_index: 0,
            timelock: 0,
            covered_fields: CoveredFields::whole_transaction(),
            signature: key.sign(b"placeholder"),
        });

        let sig_hash = txn.sig_hash(0).unwrap();
        let signature = key.sign(sig_hash.as_bytes());
        txn.signatures[0].signature = signature.clone();
        assert!(key.public_key().verify(sig_hash.as_bytes(), &signature));

        // replacing the signature must not move the sig hash
        assert_eq!(sig_hash, txn.sig_hash(0).unwrap());
    }
}
