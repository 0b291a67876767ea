mod builder;
mod cipher;
mod store;
mod update;

pub use cipher::{Cipher, SALT_SIZE};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::RngCore;
use serde::Serialize;
use sia_common::crypto::{hash, Hash, SecretKey};
use sia_common::currency::Currency;
use sia_common::mnemonics::{
    mnemonic_to_seed, seed_to_mnemonic, Dictionary, MnemonicError, SeedBytes,
};
use sia_common::serializer::{ReaderError, Writer};
use sia_common::transaction::{SiacoinOutput, SiafundOutput, Transaction};
use sia_common::unlock::{UnlockConditions, UnlockHash};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::CONSENSUS_CHANGE_BEGINNING;
use crate::consensus::{ConsensusError, ConsensusSet};
use crate::tpool::{TPoolError, TransactionPool};
use store::WalletStore;

// keys derived beyond the highest used index, so a recovered seed re-finds
// funds sent to addresses the previous wallet had handed out
const LOOKAHEAD: u64 = 50;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("wallet has already been encrypted")]
    AlreadyEncrypted,
    #[error("wallet has not been encrypted yet")]
    NotEncrypted,
    #[error("wallet must be unlocked before it can be used")]
    Locked,
    #[error("provided encryption key is incorrect")]
    BadPassphrase,
    #[error("cipher failure")]
    Cipher,
    #[error("could not generate a nonce")]
    NonceGeneration,
    #[error("encrypted value is malformed")]
    InvalidEncryptedValue,
    #[error("source must be an absolute path")]
    SourceNotAbsolute,
    #[error("destination must be an absolute path")]
    DestinationNotAbsolute,
    #[error("keyfiles contains a non-absolute path")]
    KeyfileNotAbsolute,
    #[error("unable to fund transaction: insufficient balance")]
    InsufficientFunds,
    #[error("invalid height range")]
    InvalidRange,
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    #[error("wallet database error: {0}")]
    Database(#[from] sled::Error),
    #[error("wallet encoding error: {0}")]
    Serialization(#[from] ReaderError),
    #[error(transparent)]
    Mnemonic(#[from] MnemonicError),
    #[error(transparent)]
    TPool(#[from] TPoolError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

// A key the wallet can spend with. Seed-derived keys remember their origin
// so derivation progress can advance when a lookahead address gets used.
#[derive(Clone)]
pub(crate) struct SpendableKey {
    pub secret: SecretKey,
    pub conditions: UnlockConditions,
    pub seed_origin: Option<(usize, u64)>,
}

// one entry of the wallet's transaction history, confirmed or pending
#[derive(Clone, Debug, Serialize)]
pub struct ProcessedTransaction {
    #[serde(rename = "transactionid")]
    pub transaction_id: Hash,
    pub transaction: Transaction,
    // u64::MAX while unconfirmed
    #[serde(rename = "confirmationheight")]
    pub confirmation_height: u64,
    pub inputs: Vec<ProcessedFlow>,
    pub outputs: Vec<ProcessedFlow>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessedFlow {
    #[serde(rename = "relatedaddress")]
    pub address: UnlockHash,
    pub value: Currency,
    #[serde(rename = "walletaddress")]
    pub wallet_owned: bool,
}

pub(crate) struct WalletState {
    pub unlocked: bool,
    pub master: Option<Cipher>,
    pub seeds: Vec<SeedBytes>,
    pub dictionary: Dictionary,
    pub progress: u64,
    pub keys: HashMap<UnlockHash, SpendableKey>,
    pub addresses: Vec<UnlockHash>,

    // balance view, driven entirely by the consensus change stream
    pub confirmed_outputs: HashMap<Hash, SiacoinOutput>,
    pub confirmed_fund_outputs: HashMap<Hash, SiafundOutput>,
    // history entries keyed by the block that confirmed them
    pub processed: Vec<(Hash, ProcessedTransaction)>,
    // pending entries keyed by their pool set
    pub unconfirmed: Vec<(Hash, ProcessedTransaction)>,
    // outputs already committed to a pending transaction of ours
    pub unconfirmed_spent: HashSet<Hash>,
    pub height: u64,
    pub blocks_seen: u64,
}

impl WalletState {
    fn new() -> Self {
        WalletState {
            unlocked: false,
            master: None,
            seeds: Vec::new(),
            dictionary: Dictionary::English,
            progress: 0,
            keys: HashMap::new(),
            addresses: Vec::new(),
            confirmed_outputs: HashMap::new(),
            confirmed_fund_outputs: HashMap::new(),
            processed: Vec::new(),
            unconfirmed: Vec::new(),
            unconfirmed_spent: HashSet::new(),
            height: 0,
            blocks_seen: 0,
        }
    }

    pub fn owns(&self, address: &UnlockHash) -> bool {
        self.keys.contains_key(address)
    }
}

// deterministic key schedule: one ed25519 key per (seed, index)
pub(crate) fn derive_key(seed: &SeedBytes, index: u64) -> SecretKey {
    let mut writer = Writer::new();
    writer.write_bytes(seed);
    writer.write_u64(index);
    SecretKey::from_bytes(hash(writer.as_bytes()).as_bytes())
}

pub(crate) fn spendable_key(seed: &SeedBytes, seed_number: usize, index: u64) -> SpendableKey {
    let secret = derive_key(seed, index);
    let conditions = UnlockConditions::standard(secret.public_key());
    SpendableKey {
        secret,
        conditions,
        seed_origin: Some((seed_number, index)),
    }
}

// Private key custody, balance tracking and transaction construction. Keys
// live encrypted at rest; balances are a pure function of the consensus and
// pool streams the wallet subscribes to.
pub struct Wallet {
    consensus: Arc<ConsensusSet>,
    tpool: Arc<TransactionPool>,
    store: WalletStore,
    pub(crate) state: RwLock<WalletState>,
    subscribed: AtomicBool,
}

impl Wallet {
    pub fn new(
        consensus: Arc<ConsensusSet>,
        tpool: Arc<TransactionPool>,
        data_dir: &str,
    ) -> Result<Arc<Self>, WalletError> {
        let store = WalletStore::open(data_dir)?;
        Ok(Arc::new(Wallet {
            consensus,
            tpool,
            store,
            state: RwLock::new(WalletState::new()),
            subscribed: AtomicBool::new(false),
        }))
    }

    pub fn is_encrypted(&self) -> Result<bool, WalletError> {
        self.store.is_encrypted()
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state.read().await.unlocked
    }

    // Generate the wallet: fresh seed, master key derived from the
    // passphrase (or the seed itself when the passphrase is empty), seed
    // sealed on disk. Returns the seed's mnemonic. The wallet stays locked.
    pub async fn encrypt(
        &self,
        passphrase: &str,
        dictionary: Dictionary,
    ) -> Result<String, WalletError> {
        if self.store.is_encrypted()? {
            return Err(WalletError::AlreadyEncrypted);
        }

        let mut seed: SeedBytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let mut salt = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let master_key = master_key_bytes(passphrase, &seed);
        let cipher = Cipher::new(&master_key, Some(salt))?;

        self.store.set_salt(&salt)?;
        self.store.initialize(&cipher)?;
        self.store.save_seeds(&cipher, &[seed])?;
        self.store.save_progress(&cipher, 0)?;
        self.store.save_dictionary(&cipher, &dictionary.to_string())?;
        self.store.flush().await?;

        info!("Wallet encrypted, seed generated");
        seed_to_mnemonic(&seed, dictionary).map_err(WalletError::from)
    }

    // Unlock with the passphrase (or the seed mnemonic when the wallet was
    // created with an empty passphrase). Loads keys and, on first unlock,
    // subscribes to the consensus and pool streams from the very beginning
    // so balances are rebuilt from genesis.
    pub async fn unlock(self: &Arc<Self>, passphrase: &str) -> Result<(), WalletError> {
        if !self.store.is_encrypted()? {
            return Err(WalletError::NotEncrypted);
        }
        let salt = self.store.salt()?;

        // candidate keys, tried in order
        let mut candidates: Vec<[u8; 32]> = vec![hash(passphrase.as_bytes()).to_bytes()];
        if let Ok((seed, _)) = mnemonic_to_seed(passphrase) {
            candidates.push(seed);
        }

        let mut unlocked_cipher = None;
        for key in candidates {
            let cipher = Cipher::new(&key, salt)?;
            if self.store.check_key(&cipher)? {
                unlocked_cipher = Some(cipher);
                break;
            }
        }
        let cipher = unlocked_cipher.ok_or(WalletError::BadPassphrase)?;

        {
            let mut state = self.state.write().await;
            state.seeds = self.store.load_seeds(&cipher)?;
            state.progress = self.store.load_progress(&cipher)?;
            state.dictionary = self
                .store
                .load_dictionary(&cipher)?
                .parse()
                .unwrap_or(Dictionary::English);

            state.keys.clear();
            state.addresses.clear();
            let seeds = state.seeds.clone();
            for (seed_number, seed) in seeds.iter().enumerate() {
                for index in 0..state.progress + LOOKAHEAD {
                    let key = spendable_key(seed, seed_number, index);
                    let address = key.conditions.unlock_hash();
                    if seed_number == 0 && index < state.progress {
                        state.addresses.push(address.clone());
                    }
                    state.keys.insert(address, key);
                }
            }
            for secret_bytes in self.store.load_aux_keys(&cipher)? {
                let secret = SecretKey::from_bytes(&secret_bytes);
                let conditions = UnlockConditions::standard(secret.public_key());
                state.keys.insert(
                    conditions.unlock_hash(),
                    SpendableKey {
                        secret,
                        conditions,
                        seed_origin: None,
                    },
                );
            }

            state.master = Some(cipher);
            state.unlocked = true;
        }

        // first unlock wires the wallet into the change streams; the bus
        // replays the whole history so the balance view starts complete
        if !self.subscribed.swap(true, Ordering::SeqCst) {
            self.consensus
                .subscribe(Arc::clone(self) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
                .await?;
            self.tpool.subscribe(Arc::clone(self) as Arc<_>).await;
        }

        info!("Wallet unlocked");
        Ok(())
    }

    // Drop the master key. Derived public keys stay resident so the balance
    // view keeps tracking the chain; spending requires unlocking again.
    pub async fn lock(&self) -> Result<(), WalletError> {
        let mut state = self.state.write().await;
        if !state.unlocked {
            return Err(WalletError::Locked);
        }
        for key in state.keys.values_mut() {
            key.secret = SecretKey::from_bytes(&[0u8; 32]);
        }
        state.master = None;
        state.unlocked = false;
        info!("Wallet locked");
        Ok(())
    }

    pub async fn next_address(&self) -> Result<UnlockConditions, WalletError> {
        let mut state = self.state.write().await;
        if !state.unlocked {
            return Err(WalletError::Locked);
        }
        let seed = *state.seeds.first().ok_or(WalletError::NotEncrypted)?;
        let index = state.progress;
        let key = spendable_key(&seed, 0, index);
        let conditions = key.conditions.clone();
        let address = conditions.unlock_hash();

        state.progress += 1;
        state.addresses.push(address.clone());
        state.keys.insert(address, key);

        // keep the lookahead window ahead of the new progress
        let target = state.progress + LOOKAHEAD;
        for index in 0..target {
            let key = spendable_key(&seed, 0, index);
            state
                .keys
                .entry(key.conditions.unlock_hash())
                .or_insert(key);
        }

        let cipher = state.master.as_ref().ok_or(WalletError::Locked)?;
        self.store.save_progress(cipher, state.progress)?;
        Ok(conditions)
    }

    pub async fn all_addresses(&self) -> Vec<UnlockHash> {
        self.state.read().await.addresses.clone()
    }

    // Stable address for recurring payouts (mining, host revenue); derives
    // the first address on demand.
    pub async fn payout_address(&self) -> Result<UnlockHash, WalletError> {
        if let Some(address) = self.state.read().await.addresses.first() {
            return Ok(address.clone());
        }
        Ok(self.next_address().await?.unlock_hash())
    }

    pub async fn all_seeds(&self) -> Result<Vec<String>, WalletError> {
        let state = self.state.read().await;
        if !state.unlocked {
            return Err(WalletError::Locked);
        }
        state
            .seeds
            .iter()
            .map(|seed| seed_to_mnemonic(seed, state.dictionary).map_err(WalletError::from))
            .collect()
    }

    pub async fn primary_seed(&self) -> Result<(String, u64), WalletError> {
        let state = self.state.read().await;
        if !state.unlocked {
            return Err(WalletError::Locked);
        }
        let seed = state.seeds.first().ok_or(WalletError::NotEncrypted)?;
        let phrase = seed_to_mnemonic(seed, state.dictionary)?;
        Ok((phrase, state.progress))
    }

    // Import an auxiliary seed; its funds become spendable after the next
    // balance rebuild picks its addresses up.
    pub async fn load_seed(
        self: &Arc<Self>,
        passphrase: &str,
        phrase: &str,
    ) -> Result<(), WalletError> {
        let (seed, _) = mnemonic_to_seed(phrase)?;
        let mut state = self.state.write().await;
        if !state.unlocked {
            return Err(WalletError::Locked);
        }
        // the passphrase must still check out before key material changes
        let salt = self.store.salt()?;
        let candidate = Cipher::new(&master_key_bytes_checked(passphrase, &state.seeds)?, salt)?;
        if !self.store.check_key(&candidate)? {
            return Err(WalletError::BadPassphrase);
        }

        if state.seeds.contains(&seed) {
            return Ok(());
        }
        state.seeds.push(seed);
        let seed_number = state.seeds.len() - 1;
        let limit = state.progress + LOOKAHEAD;
        for index in 0..limit {
            let key = spendable_key(&seed, seed_number, index);
            state.keys.insert(key.conditions.unlock_hash(), key);
        }

        let seeds = state.seeds.clone();
        let cipher = state.master.as_ref().ok_or(WalletError::Locked)?;
        self.store.save_seeds(cipher, &seeds)?;
        info!("Auxiliary seed loaded, {} seeds tracked", seeds.len());
        Ok(())
    }

    // Write a sealed copy of all seed material to an absolute path
    pub async fn create_backup(&self, destination: &str) -> Result<(), WalletError> {
        if !Path::new(destination).is_absolute() {
            return Err(WalletError::DestinationNotAbsolute);
        }
        let state = self.state.read().await;
        if !state.unlocked {
            return Err(WalletError::Locked);
        }
        let cipher = state.master.as_ref().ok_or(WalletError::Locked)?;

        let mut writer = Writer::new();
        writer.write_u16(state.seeds.len() as u16);
        for seed in &state.seeds {
            writer.write_bytes(seed);
        }
        let sealed = cipher.encrypt_value(writer.as_bytes())?;
        std::fs::write(destination, sealed)?;
        info!("Wallet backup written to {}", destination);
        Ok(())
    }

    // Import spend keys from a v0.3.3.x wallet file: a count-prefixed list
    // of raw 32-byte secret keys
    pub async fn load_033x(&self, source: &str) -> Result<(), WalletError> {
        if !Path::new(source).is_absolute() {
            return Err(WalletError::SourceNotAbsolute);
        }
        let bytes = std::fs::read(source)?;
        let mut reader = sia_common::serializer::Reader::new(&bytes);
        let count = reader.read_u16()? as usize;
        let mut secrets = Vec::with_capacity(count);
        for _ in 0..count {
            secrets.push(reader.read_bytes_32()?);
        }
        self.import_keys(secrets).await
    }

    // Import standalone siag keyfiles, one raw secret key per file
    pub async fn load_siag_keys(&self, keyfiles: &[String]) -> Result<(), WalletError> {
        let mut secrets = Vec::with_capacity(keyfiles.len());
        for path in keyfiles {
            if !Path::new(path).is_absolute() {
                return Err(WalletError::KeyfileNotAbsolute);
            }
            let bytes = std::fs::read(path)?;
            let secret: [u8; 32] = bytes
                .try_into()
                .map_err(|_| WalletError::InvalidEncryptedValue)?;
            secrets.push(secret);
        }
        self.import_keys(secrets).await
    }

    async fn import_keys(&self, secrets: Vec<[u8; 32]>) -> Result<(), WalletError> {
        let mut state = self.state.write().await;
        if !state.unlocked {
            return Err(WalletError::Locked);
        }

        for secret_bytes in &secrets {
            let secret = SecretKey::from_bytes(secret_bytes);
            let conditions = UnlockConditions::standard(secret.public_key());
            state.keys.insert(
                conditions.unlock_hash(),
                SpendableKey {
                    secret,
                    conditions,
                    seed_origin: None,
                },
            );
        }

        let cipher = state.master.as_ref().ok_or(WalletError::Locked)?;
        let mut all = self.store.load_aux_keys(cipher)?;
        all.extend(secrets);
        self.store.save_aux_keys(cipher, &all)?;
        info!("Imported {} auxiliary keys", all.len());
        Ok(())
    }

    pub async fn confirmed_balance(&self) -> (Currency, Currency) {
        let state = self.state.read().await;
        let coins = state.confirmed_outputs.values().map(|o| o.value).sum();
        let funds = state
            .confirmed_fund_outputs
            .values()
            .map(|o| o.value)
            .sum();
        (coins, funds)
    }

    // (incoming, outgoing) deltas from pending transactions
    pub async fn unconfirmed_balance(&self) -> (Currency, Currency) {
        let state = self.state.read().await;
        let mut incoming = Currency::ZERO;
        let mut outgoing = Currency::ZERO;
        for (_, txn) in &state.unconfirmed {
            for flow in &txn.inputs {
                if flow.wallet_owned {
                    outgoing = outgoing.checked_add(flow.value).unwrap_or(outgoing);
                }
            }
            for flow in &txn.outputs {
                if flow.wallet_owned {
                    incoming = incoming.checked_add(flow.value).unwrap_or(incoming);
                }
            }
        }
        (incoming, outgoing)
    }

    pub async fn height(&self) -> u64 {
        self.state.read().await.height
    }

    pub async fn transactions(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<ProcessedTransaction>, WalletError> {
        if start > end {
            return Err(WalletError::InvalidRange);
        }
        let state = self.state.read().await;
        Ok(state
            .processed
            .iter()
            .filter(|(_, txn)| txn.confirmation_height >= start && txn.confirmation_height <= end)
            .map(|(_, txn)| txn.clone())
            .collect())
    }

    pub async fn transaction(&self, id: &Hash) -> Option<ProcessedTransaction> {
        let state = self.state.read().await;
        state
            .processed
            .iter()
            .map(|(_, txn)| txn)
            .chain(state.unconfirmed.iter().map(|(_, txn)| txn))
            .find(|txn| &txn.transaction_id == id)
            .cloned()
    }

    pub async fn address_transactions(&self, address: &UnlockHash) -> Vec<ProcessedTransaction> {
        let state = self.state.read().await;
        state
            .processed
            .iter()
            .map(|(_, txn)| txn)
            .filter(|txn| {
                txn.inputs.iter().any(|flow| &flow.address == address)
                    || txn.outputs.iter().any(|flow| &flow.address == address)
            })
            .cloned()
            .collect()
    }

    pub async fn unconfirmed_transactions(&self) -> Vec<ProcessedTransaction> {
        let state = self.state.read().await;
        state.unconfirmed.iter().map(|(_, txn)| txn.clone()).collect()
    }

    pub async fn close(&self) -> Result<(), WalletError> {
        self.store.flush().await
    }
}

fn master_key_bytes(passphrase: &str, seed: &SeedBytes) -> [u8; 32] {
    if passphrase.is_empty() {
        *seed
    } else {
        hash(passphrase.as_bytes()).to_bytes()
    }
}

fn master_key_bytes_checked(
    passphrase: &str,
    seeds: &[SeedBytes],
) -> Result<[u8; 32], WalletError> {
    if passphrase.is_empty() {
        seeds.first().copied().ok_or(WalletError::NotEncrypted)
    } else {
        Ok(hash(passphrase.as_bytes()).to_bytes())
    }
}
