use chacha20poly1305::{
    aead::{Aead, Generate},
    KeyInit, XChaCha20Poly1305, XNonce,
};

use sia_common::crypto::{hash, HASH_SIZE};

use super::WalletError;

pub const SALT_SIZE: usize = 32;

pub struct Cipher {
    cipher: XChaCha20Poly1305,
    // this salt is mixed into hashed lookup keys
    salt: Option<[u8; SALT_SIZE]>,
}

impl Cipher {
    pub const NONCE_SIZE: usize = 24;

    pub fn new(key: &[u8], salt: Option<[u8; SALT_SIZE]>) -> Result<Self, WalletError> {
        Ok(Self {
            cipher: XChaCha20Poly1305::new_from_slice(key).map_err(|_| WalletError::Cipher)?,
            salt,
        })
    }

    // encrypt value passed in param and prepend the plaintext nonce
    // a nonce is generated randomly at each call
    pub fn encrypt_value(&self, value: &[u8]) -> Result<Vec<u8>, WalletError> {
        let nonce = XNonce::generate();

        let data = self
            .cipher
            .encrypt(&nonce, value)
            .map_err(|_| WalletError::Cipher)?;

        let mut encrypted = Vec::with_capacity(Self::NONCE_SIZE + data.len());
        encrypted.extend_from_slice(&nonce);
        encrypted.extend_from_slice(&data);
        Ok(encrypted)
    }

    // decrypt a value in the format produced above
    pub fn decrypt_value(&self, encrypted: &[u8]) -> Result<Vec<u8>, WalletError> {
        // nonce is 24 bytes and is mandatory in the encrypted slice
        if encrypted.len() <= Self::NONCE_SIZE {
            return Err(WalletError::InvalidEncryptedValue);
        }

        let nonce = XNonce::try_from(&encrypted[..Self::NONCE_SIZE])
            .map_err(|_| WalletError::InvalidEncryptedValue)?;

        self.cipher
            .decrypt(&nonce, &encrypted[Self::NONCE_SIZE..])
            .map_err(|_| WalletError::BadPassphrase)
    }

    // hash a lookup key together with the salt
    pub fn hash_key<S: AsRef<[u8]>>(&self, key: S) -> [u8; HASH_SIZE] {
        let mut data = Vec::new();
        if let Some(salt) = &self.salt {
            data.extend_from_slice(salt);
        }
        data.extend_from_slice(key.as_ref());
        hash(&data).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = Cipher::new(&[1u8; 32], Some([2u8; SALT_SIZE])).unwrap();
        let encrypted = cipher.encrypt_value(b"seed material").unwrap();
        assert_ne!(&encrypted[Cipher::NONCE_SIZE..], b"seed material");
        let decrypted = cipher.decrypt_value(&encrypted).unwrap();
        assert_eq!(decrypted, b"seed material");
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = Cipher::new(&[1u8; 32], None).unwrap();
        let other = Cipher::new(&[9u8; 32], None).unwrap();
        let encrypted = cipher.encrypt_value(b"secret").unwrap();
        assert!(other.decrypt_value(&encrypted).is_err());
    }

    #[test]
    fn test_nonces_are_unique() {
        let cipher = Cipher::new(&[1u8; 32], None).unwrap();
        let a = cipher.encrypt_value(b"x").unwrap();
        let b = cipher.encrypt_value(b"x").unwrap();
        assert_ne!(a, b);
    }
}
