use ed25519_dalek::{Signer, Verifier};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::serializer::{Reader, ReaderError, Serializer, Writer};

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;
pub const SECRET_KEY_SIZE: usize = 32;

// ed25519 public key, kept in verified form so signature checks never
// re-parse the point
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, ReaderError> {
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| ReaderError::InvalidValue)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify(message, &signature.0).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ed25519:{}", self.to_hex())
    }
}

impl Serializer for PublicKey {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(self.as_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes_32()?;
        PublicKey::from_bytes(&bytes)
    }

    fn size(&self) -> usize {
        PUBLIC_KEY_SIZE
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        // accept both the raw hex form and the prefixed display form
        let hex = hex.strip_prefix("ed25519:").unwrap_or(&hex);
        let decoded = hex::decode(hex).map_err(SerdeError::custom)?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = decoded
            .try_into()
            .map_err(|_| SerdeError::custom("invalid public key length"))?;
        PublicKey::from_bytes(&bytes).map_err(SerdeError::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8; SIGNATURE_SIZE]) -> Self {
        Signature(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        self.0.to_bytes()
    }
}

impl Serializer for Signature {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.to_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes_64()?;
        Ok(Signature::from_bytes(&bytes))
    }

    fn size(&self) -> usize {
        SIGNATURE_SIZE
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'a> Deserialize<'a> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        let decoded = hex::decode(hex).map_err(SerdeError::custom)?;
        let bytes: [u8; SIGNATURE_SIZE] = decoded
            .try_into()
            .map_err(|_| SerdeError::custom("invalid signature length"))?;
        Ok(Signature::from_bytes(&bytes))
    }
}

// Signing half; derived deterministically from wallet seeds
pub struct SecretKey(ed25519_dalek::SigningKey);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8; SECRET_KEY_SIZE]) -> Self {
        SecretKey(ed25519_dalek::SigningKey::from_bytes(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.0.as_bytes()
    }
}

impl Clone for SecretKey {
    fn clone(&self) -> Self {
        SecretKey::from_bytes(self.0.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let secret = SecretKey::from_bytes(&[7u8; SECRET_KEY_SIZE]);
        let public = secret.public_key();
        let signature = secret.sign(b"payload");
        assert!(public.verify(b"payload", &signature));
        assert!(!public.verify(b"tampered", &signature));
    }

    #[test]
    fn test_public_key_serializer_round_trip() {
        let secret = SecretKey::from_bytes(&[9u8; SECRET_KEY_SIZE]);
        let public = secret.public_key();
        let decoded = PublicKey::from_bytes(public.as_bytes()).unwrap();
        assert_eq!(public, decoded);
    }
}
