use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::crypto::{Hash, Hashable, PublicKey};
use crate::serializer::{read_list, write_list, Reader, ReaderError, Serializer, Writer};

// Spend-authorization predicate: the conditions must hash to the output's
// unlock hash, and the transaction must carry `signatures_required` valid
// signatures from the listed keys after `timelock` has passed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockConditions {
    pub timelock: u64,
    pub public_keys: Vec<PublicKey>,
    pub signatures_required: u64,
}

impl UnlockConditions {
    // standard single-signature conditions, the shape every wallet address uses
    pub fn standard(public_key: PublicKey) -> Self {
        UnlockConditions {
            timelock: 0,
            public_keys: vec![public_key],
            signatures_required: 1,
        }
    }

    pub fn unlock_hash(&self) -> UnlockHash {
        UnlockHash(Hashable::hash(self))
    }
}

impl Serializer for UnlockConditions {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.timelock);
        write_list(writer, &self.public_keys);
        writer.write_u64(self.signatures_required);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(UnlockConditions {
            timelock: reader.read_u64()?,
            public_keys: read_list(reader)?,
            signatures_required: reader.read_u64()?,
        })
    }
}

impl Hashable for UnlockConditions {}

// The address form of a set of unlock conditions
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnlockHash(pub Hash);

impl UnlockHash {
    pub const fn zero() -> Self {
        UnlockHash(Hash::zero())
    }

    pub fn as_hash(&self) -> &Hash {
        &self.0
    }
}

impl Display for UnlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UnlockHash {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(UnlockHash(s.parse()?))
    }
}

impl Serializer for UnlockHash {
    fn write(&self, writer: &mut Writer) {
        self.0.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(UnlockHash(Hash::read(reader)?))
    }

    fn size(&self) -> usize {
        self.0.size()
    }
}

impl From<Hash> for UnlockHash {
    fn from(hash: Hash) -> Self {
        UnlockHash(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn test_address_string_round_trip() {
        let key = SecretKey::from_bytes(&[3u8; 32]);
        let address = UnlockConditions::standard(key.public_key()).unlock_hash();
        let parsed: UnlockHash = address.to_string().parse().unwrap();
        assert_eq!(address, parsed);
    }

    #[test]
    fn test_unlock_hash_binds_conditions() {
        let a = UnlockConditions::standard(SecretKey::from_bytes(&[1u8; 32]).public_key());
        let mut b = a.clone();
        b.timelock = 10;
        assert_ne!(a.unlock_hash(), b.unlock_hash());
    }
}
