use sia_common::mnemonics::{SeedBytes, SEED_SIZE};
use sia_common::serializer::{Reader, ReaderError, Serializer, Writer};

use super::cipher::{Cipher, SALT_SIZE};
use super::WalletError;

// plaintext keys
const SALT_KEY: &[u8] = b"SALT";
// encrypted under the master key; decrypting it proves the key is right
const VERIFY_KEY: &[u8] = b"VERIFY";
const VERIFY_PLAINTEXT: &[u8] = b"wallet-verification";

// encrypted keys (hashed through the cipher before lookup)
const SEEDS_KEY: &[u8] = b"SEEDS";
const PROGRESS_KEY: &[u8] = b"PROGRESS";
const AUX_KEYS_KEY: &[u8] = b"AUXKEYS";
const DICTIONARY_KEY: &[u8] = b"DICT";

// Durable wallet state. Every value is sealed with the master-key cipher;
// only the salt and the verification token are stored in the clear (the
// token is itself ciphertext).
pub struct WalletStore {
    db: sled::Db,
    meta: sled::Tree,
}

// seed material on disk: count-prefixed fixed-size secrets
fn encode_secrets(secrets: &[[u8; SEED_SIZE]]) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.write_u16(secrets.len() as u16);
    for secret in secrets {
        writer.write_bytes(secret);
    }
    writer.bytes()
}

fn decode_secrets(bytes: &[u8]) -> Result<Vec<[u8; SEED_SIZE]>, ReaderError> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u16()? as usize;
    let mut secrets = Vec::with_capacity(count);
    for _ in 0..count {
        secrets.push(reader.read_bytes_32()?);
    }
    Ok(secrets)
}

impl WalletStore {
    pub fn open(data_dir: &str) -> Result<Self, WalletError> {
        let db = sled::open(format!("{}/wallet", data_dir))?;
        let meta = db.open_tree("meta")?;
        Ok(WalletStore { db, meta })
    }

    pub fn is_encrypted(&self) -> Result<bool, WalletError> {
        Ok(self.meta.contains_key(VERIFY_KEY)?)
    }

    pub fn salt(&self) -> Result<Option<[u8; SALT_SIZE]>, WalletError> {
        match self.meta.get(SALT_KEY)? {
            Some(value) => {
                let salt: [u8; SALT_SIZE] = value
                    .as_ref()
                    .try_into()
                    .map_err(|_| WalletError::InvalidEncryptedValue)?;
                Ok(Some(salt))
            }
            None => Ok(None),
        }
    }

    pub fn set_salt(&self, salt: &[u8; SALT_SIZE]) -> Result<(), WalletError> {
        self.meta.insert(SALT_KEY, salt.as_slice())?;
        Ok(())
    }

    // seal the verification token; from now on the wallet counts as encrypted
    pub fn initialize(&self, cipher: &Cipher) -> Result<(), WalletError> {
        let token = cipher.encrypt_value(VERIFY_PLAINTEXT)?;
        self.meta.insert(VERIFY_KEY, token)?;
        Ok(())
    }

    pub fn check_key(&self, cipher: &Cipher) -> Result<bool, WalletError> {
        let token = self
            .meta
            .get(VERIFY_KEY)?
            .ok_or(WalletError::NotEncrypted)?;
        match cipher.decrypt_value(&token) {
            Ok(plaintext) => Ok(plaintext == VERIFY_PLAINTEXT),
            Err(_) => Ok(false),
        }
    }

    fn put(&self, cipher: &Cipher, key: &[u8], value: &[u8]) -> Result<(), WalletError> {
        let hashed = cipher.hash_key(key);
        let sealed = cipher.encrypt_value(value)?;
        self.meta.insert(hashed.as_slice(), sealed)?;
        Ok(())
    }

    fn get(&self, cipher: &Cipher, key: &[u8]) -> Result<Option<Vec<u8>>, WalletError> {
        let hashed = cipher.hash_key(key);
        match self.meta.get(hashed.as_slice())? {
            Some(sealed) => Ok(Some(cipher.decrypt_value(&sealed)?)),
            None => Ok(None),
        }
    }

    pub fn save_seeds(&self, cipher: &Cipher, seeds: &[SeedBytes]) -> Result<(), WalletError> {
        self.put(cipher, SEEDS_KEY, &encode_secrets(seeds))
    }

    pub fn load_seeds(&self, cipher: &Cipher) -> Result<Vec<SeedBytes>, WalletError> {
        match self.get(cipher, SEEDS_KEY)? {
            Some(bytes) => Ok(decode_secrets(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn save_aux_keys(&self, cipher: &Cipher, keys: &[[u8; 32]]) -> Result<(), WalletError> {
        self.put(cipher, AUX_KEYS_KEY, &encode_secrets(keys))
    }

    pub fn load_aux_keys(&self, cipher: &Cipher) -> Result<Vec<[u8; 32]>, WalletError> {
        match self.get(cipher, AUX_KEYS_KEY)? {
            Some(bytes) => Ok(decode_secrets(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn save_progress(&self, cipher: &Cipher, progress: u64) -> Result<(), WalletError> {
        self.put(cipher, PROGRESS_KEY, &progress.to_be_bytes())
    }

    pub fn load_progress(&self, cipher: &Cipher) -> Result<u64, WalletError> {
        match self.get(cipher, PROGRESS_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| WalletError::InvalidEncryptedValue)?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    pub fn save_dictionary(&self, cipher: &Cipher, name: &str) -> Result<(), WalletError> {
        self.put(cipher, DICTIONARY_KEY, name.as_bytes())
    }

    pub fn load_dictionary(&self, cipher: &Cipher) -> Result<String, WalletError> {
        match self.get(cipher, DICTIONARY_KEY)? {
            Some(bytes) => {
                String::from_utf8(bytes).map_err(|_| WalletError::InvalidEncryptedValue)
            }
            None => Ok("english".to_string()),
        }
    }

    pub async fn flush(&self) -> Result<(), WalletError> {
        self.db.flush_async().await?;
        Ok(())
    }
}
