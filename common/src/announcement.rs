use thiserror::Error;

use crate::crypto::{PublicKey, SecretKey, Signature};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use crate::transaction::{Specifier, SPECIFIER_SIZE};

// Hosts advertise themselves through signed blobs in transaction arbitrary
// data. The pubkey is the host's identity; the net address may change from
// one announcement to the next.
pub const SPECIFIER_HOST_ANNOUNCEMENT: Specifier = Specifier::new(b"HostAnnouncement");

#[derive(Error, Debug)]
pub enum AnnouncementError {
    #[error("blob is not a host announcement")]
    NotAnAnnouncement,
    #[error("announcement is malformed: {0}")]
    Malformed(#[from] ReaderError),
    #[error("announcement signature does not verify")]
    BadSignature,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostAnnouncement {
    pub net_address: String,
    pub public_key: PublicKey,
}

fn signed_portion(net_address: &str, public_key: &PublicKey) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.write_bytes(SPECIFIER_HOST_ANNOUNCEMENT.as_bytes());
    writer.write_string(net_address);
    public_key.write(&mut writer);
    writer.bytes()
}

// Build the arbitrary-data blob: signed portion followed by the signature
pub fn create_announcement(net_address: &str, secret: &SecretKey) -> Vec<u8> {
    let mut blob = signed_portion(net_address, &secret.public_key());
    let signature = secret.sign(&blob);
    blob.extend_from_slice(&signature.to_bytes());
    blob
}

// Decode and verify a candidate blob. Non-announcement blobs are common in
// arbitrary data and get the distinct NotAnAnnouncement error so scanners
// can skip them quietly.
pub fn decode_announcement(blob: &[u8]) -> Result<HostAnnouncement, AnnouncementError> {
    if blob.len() < SPECIFIER_SIZE || &blob[..SPECIFIER_SIZE] != SPECIFIER_HOST_ANNOUNCEMENT.as_bytes() {
        return Err(AnnouncementError::NotAnAnnouncement);
    }

    let mut reader = Reader::new(blob);
    reader.read_bytes_ref(SPECIFIER_SIZE)?;
    let net_address = reader.read_string()?;
    let public_key = PublicKey::read(&mut reader)?;
    let signed_len = reader.total_read();
    let signature = Signature::read(&mut reader)?;

    if !public_key.verify(&blob[..signed_len], &signature) {
        return Err(AnnouncementError::BadSignature);
    }

    Ok(HostAnnouncement {
        net_address,
        public_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_round_trip() {
        let secret = SecretKey::from_bytes(&[2u8; 32]);
        let blob = create_announcement("host.example:9982", &secret);
        let decoded = decode_announcement(&blob).unwrap();
        assert_eq!(decoded.net_address, "host.example:9982");
        assert_eq!(decoded.public_key, secret.public_key());
    }

    #[test]
    fn test_tampered_announcement_is_rejected() {
        let secret = SecretKey::from_bytes(&[2u8; 32]);
        let mut blob = create_announcement("host.example:9982", &secret);
        let flip = SPECIFIER_SIZE + 3;
        blob[flip] ^= 0xFF;
        assert!(matches!(
            decode_announcement(&blob),
            Err(AnnouncementError::BadSignature) | Err(AnnouncementError::Malformed(_))
        ));
    }

    #[test]
    fn test_other_blobs_are_skipped() {
        assert!(matches!(
            decode_announcement(b"unrelated data"),
            Err(AnnouncementError::NotAnAnnouncement)
        ));
    }
}
