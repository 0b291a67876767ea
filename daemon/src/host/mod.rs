mod obligations;
pub mod protocol;
mod storage;
mod update;

pub use obligations::{ObligationStatus, StorageObligation};
pub use storage::{sector_root, SectorStore, StorageFolder};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::RngCore;
use sia_common::announcement::create_announcement;
use sia_common::api::host::{
    HostExternalSettings, HostFinancialMetrics, HostInternalSettings, StorageFolderInfo,
};
use sia_common::config::VERSION;
use sia_common::crypto::{Hash, PublicKey, SecretKey};
use sia_common::currency::Currency;
use sia_common::serializer::{Reader, ReaderError, Serializer, Writer};
use sia_common::transaction::Transaction;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::consensus::ConsensusSet;
use crate::tpool::{TPoolError, TransactionPool};
use crate::wallet::{Wallet, WalletError};
use protocol::{HostRequest, HostResponse};

#[derive(Error, Debug)]
pub enum HostError {
    #[error("folder already in use")]
    RepeatFolder,
    #[error("folder already has that size")]
    NoResize,
    #[error("storage folder is too small")]
    SmallStorageFolder,
    #[error("storage folder is too large")]
    LargeStorageFolder,
    #[error("storage folder not found")]
    StorageFolderNotFound,
    #[error("folder still holds data; use force to discard it")]
    IncompleteOffload,
    #[error("sector exceeds the sector size")]
    OversizedSector,
    #[error("not enough storage remaining to hold sector")]
    InsufficientStorage,
    #[error("sector not found")]
    SectorNotFound,
    #[error("host is not accepting contracts")]
    NotAcceptingContracts,
    #[error("no storage obligation for that contract")]
    UnknownObligation,
    #[error("a storage obligation already exists for that contract")]
    ObligationExists,
    #[error("contract transaction set is malformed")]
    BadContractSet,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("host database error: {0}")]
    Database(#[from] sled::Error),
    #[error("host encoding error: {0}")]
    Serialization(#[from] ReaderError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    TPool(#[from] TPoolError),
}

const META_SECRET: &[u8] = b"secret";
const META_SETTINGS: &[u8] = b"settings";
const META_METRICS: &[u8] = b"metrics";
const META_FOLDERS: &[u8] = b"folders";

pub(crate) struct HostState {
    pub settings: HostInternalSettings,
    pub store: SectorStore,
    pub obligations: HashMap<Hash, StorageObligation>,
    pub metrics: HostFinancialMetrics,
    pub blocks_seen: u64,
}

// Offers storage to the network: manages folders and sectors, accepts
// contracts over its listener, and proves storage within each contract's
// window.
pub struct Host {
    consensus: Arc<ConsensusSet>,
    tpool: Arc<TransactionPool>,
    wallet: Arc<Wallet>,
    listen_addr: String,
    secret: SecretKey,
    db: sled::Db,
    meta: sled::Tree,
    obligations_tree: sled::Tree,
    pub(crate) state: RwLock<HostState>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    announced: AtomicBool,
}

impl Host {
    pub fn new(
        consensus: Arc<ConsensusSet>,
        tpool: Arc<TransactionPool>,
        wallet: Arc<Wallet>,
        listen_addr: &str,
        data_dir: &str,
    ) -> Result<Arc<Self>, HostError> {
        let db = sled::open(format!("{}/host", data_dir))?;
        let meta = db.open_tree("meta")?;
        let obligations_tree = db.open_tree("obligations")?;

        // host identity persists across restarts; the pubkey is what
        // renters bind contracts to
        let secret = match meta.get(META_SECRET)? {
            Some(bytes) => {
                let bytes: [u8; 32] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| ReaderError::InvalidValue)?;
                SecretKey::from_bytes(&bytes)
            }
            None => {
                let mut bytes = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                meta.insert(META_SECRET, bytes.as_slice())?;
                SecretKey::from_bytes(&bytes)
            }
        };

        let mut settings = match meta.get(META_SETTINGS)? {
            Some(bytes) => HostInternalSettings::from_bytes(&bytes)?,
            None => HostInternalSettings::default(),
        };
        if settings.net_address.is_empty() {
            settings.net_address = listen_addr.to_string();
        }

        let metrics = match meta.get(META_METRICS)? {
            Some(bytes) => HostFinancialMetrics::from_bytes(&bytes)?,
            None => HostFinancialMetrics::default(),
        };

        let mut store = SectorStore::new();
        if let Some(bytes) = meta.get(META_FOLDERS)? {
            let mut reader = Reader::new(&bytes);
            let count = reader.read_u16()? as usize;
            for _ in 0..count {
                let path = reader.read_string()?;
                let capacity = reader.read_u64()?;
                store.folders.push(StorageFolder {
                    path,
                    capacity,
                    used: 0,
                });
            }
        }
        store.rescan();

        let mut obligations = HashMap::new();
        for entry in obligations_tree.iter() {
            let (_, value) = entry?;
            let obligation = StorageObligation::from_bytes(&value)?;
            obligations.insert(obligation.contract_id.clone(), obligation);
        }
        if !obligations.is_empty() {
            info!("Host loaded {} storage obligations", obligations.len());
        }

        Ok(Arc::new(Host {
            consensus,
            tpool,
            wallet,
            listen_addr: listen_addr.to_string(),
            secret,
            db,
            meta,
            obligations_tree,
            state: RwLock::new(HostState {
                settings,
                store,
                obligations,
                metrics,
                blocks_seen: 0,
            }),
            listener_task: Mutex::new(None),
            announced: AtomicBool::new(false),
        }))
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    // Start serving renters
    pub async fn start(self: &Arc<Self>) -> Result<(), HostError> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!("Host listening on {}", self.listen_addr);

        let host = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((mut stream, remote)) => {
                        let host = Arc::clone(&host);
                        tokio::spawn(async move {
                            let response = match protocol::read_frame::<HostRequest>(&mut stream)
                                .await
                            {
                                Ok(request) => host.handle_request(request).await,
                                Err(e) => {
                                    debug!("Bad host request from {}: {}", remote, e);
                                    return;
                                }
                            };
                            if let Err(e) = protocol::write_frame(&mut stream, &response).await {
                                debug!("Host reply to {} failed: {}", remote, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Host accept error: {}", e);
                        break;
                    }
                }
            }
        });
        *self.listener_task.lock().await = Some(task);
        Ok(())
    }

    // Publish a signed announcement on chain; renters learn the address and
    // bind to the pubkey.
    pub async fn announce(&self, net_address: Option<String>) -> Result<(), HostError> {
        let address = match net_address {
            Some(address) => {
                let mut state = self.state.write().await;
                state.settings.net_address = address.clone();
                self.persist_settings(&state.settings)?;
                address
            }
            None => self.state.read().await.settings.net_address.clone(),
        };

        let blob = create_announcement(&address, &self.secret);
        let txn = Transaction {
            arbitrary_data: vec![blob],
            miner_fees: vec![Currency::from_coins(10)],
            ..Default::default()
        };
        let txn = self.wallet.fund_and_sign(txn).await?;
        self.tpool.accept_transaction_set(vec![txn]).await?;
        self.announced.store(true, Ordering::SeqCst);
        info!("Host announced at {}", address);
        Ok(())
    }

    pub async fn internal_settings(&self) -> HostInternalSettings {
        self.state.read().await.settings.clone()
    }

    pub async fn set_internal_settings(
        &self,
        settings: HostInternalSettings,
    ) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        state.settings = settings;
        self.persist_settings(&state.settings)
    }

    pub async fn external_settings(&self) -> HostExternalSettings {
        let state = self.state.read().await;
        HostExternalSettings {
            accepting_contracts: state.settings.accepting_contracts,
            net_address: state.settings.net_address.clone(),
            public_key: self.public_key(),
            remaining_storage: state.store.remaining(),
            window_size: state.settings.window_size,
            max_duration: state.settings.max_duration,
            collateral: state.settings.collateral,
            contract_price: state.settings.minimum_contract_price,
            storage_price: state.settings.minimum_storage_price,
            download_bandwidth_price: state.settings.minimum_download_bandwidth_price,
            upload_bandwidth_price: state.settings.minimum_upload_bandwidth_price,
            version: VERSION.to_string(),
        }
    }

    pub async fn storage_folders(&self) -> Vec<StorageFolderInfo> {
        let state = self.state.read().await;
        state
            .store
            .folders
            .iter()
            .map(|folder| StorageFolderInfo {
                path: folder.path.clone(),
                capacity: folder.capacity,
                capacity_remaining: folder.remaining(),
            })
            .collect()
    }

    pub async fn add_storage_folder(&self, path: &str, size: u64) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        state.store.add_folder(path, size)?;
        self.persist_folders(&state.store)
    }

    pub async fn resize_storage_folder(&self, path: &str, size: u64) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        state.store.resize_folder(path, size)?;
        self.persist_folders(&state.store)
    }

    pub async fn remove_storage_folder(&self, path: &str, force: bool) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        state.store.remove_folder(path, force)?;
        self.persist_folders(&state.store)
    }

    pub async fn delete_sector(&self, root: &Hash) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        state.store.delete_sector(root)?;
        for obligation in state.obligations.values_mut() {
            obligation.sector_roots.retain(|r| r != root);
        }
        Ok(())
    }

    pub async fn storage_obligations(&self) -> Vec<StorageObligation> {
        self.state.read().await.obligations.values().cloned().collect()
    }

    pub async fn financial_metrics(&self) -> HostFinancialMetrics {
        self.state.read().await.metrics.clone()
    }

    async fn handle_request(self: &Arc<Self>, request: HostRequest) -> HostResponse {
        match self.dispatch_request(request).await {
            Ok(response) => response,
            Err(e) => HostResponse::Error {
                message: e.to_string(),
            },
        }
    }

    async fn dispatch_request(
        self: &Arc<Self>,
        request: HostRequest,
    ) -> Result<HostResponse, HostError> {
        match request {
            HostRequest::Settings => Ok(HostResponse::Settings(self.external_settings().await)),
            HostRequest::FormContract { transaction_set }
            | HostRequest::RenewContract {
                transaction_set, ..
            } => {
                let contract_id = self.accept_contract(transaction_set).await?;
                Ok(HostResponse::ContractAccepted { contract_id })
            }
            HostRequest::UploadSector { contract_id, data } => {
                let root = self.upload_sector(&contract_id, data).await?;
                Ok(HostResponse::SectorStored { root })
            }
            HostRequest::DownloadSector { contract_id, root } => {
                let data = self.download_sector(&contract_id, &root).await?;
                Ok(HostResponse::Sector { data })
            }
        }
    }

    // Record the obligation for a renter-built formation set. The renter is
    // responsible for funding; the host only tracks and proves.
    async fn accept_contract(&self, transaction_set: Vec<Transaction>) -> Result<Hash, HostError> {
        let txn = transaction_set.last().ok_or(HostError::BadContractSet)?;
        if txn.file_contracts.is_empty() {
            return Err(HostError::BadContractSet);
        }
        let contract = txn.file_contracts[0].clone();
        let contract_id = txn.file_contract_id(0);

        let mut state = self.state.write().await;
        if !state.settings.accepting_contracts {
            return Err(HostError::NotAcceptingContracts);
        }
        let height = self.consensus.height().await;
        if contract.window_end.saturating_sub(height) > state.settings.max_duration {
            return Err(HostError::BadContractSet);
        }
        if state.obligations.contains_key(&contract_id) {
            return Err(HostError::ObligationExists);
        }

        let obligation = StorageObligation::new(contract_id.clone(), contract);
        self.persist_obligation(&obligation)?;
        state.obligations.insert(contract_id.clone(), obligation);

        state.metrics.contract_compensation = state
            .metrics
            .contract_compensation
            .checked_add(state.settings.minimum_contract_price)
            .unwrap_or(state.metrics.contract_compensation);
        self.persist_metrics(&state.metrics)?;

        info!("Host accepted contract {}", contract_id);
        Ok(contract_id)
    }

    async fn upload_sector(&self, contract_id: &Hash, data: Vec<u8>) -> Result<Hash, HostError> {
        let mut state = self.state.write().await;
        if !state.obligations.contains_key(contract_id) {
            return Err(HostError::UnknownObligation);
        }

        let root = state.store.store_sector(&data)?;
        let height = self.consensus.height().await;

        let obligation = state
            .obligations
            .get_mut(contract_id)
            .ok_or(HostError::UnknownObligation)?;
        if !obligation.sector_roots.contains(&root) {
            obligation.sector_roots.push(root.clone());
        }
        let remaining_blocks = obligation.contract.window_end.saturating_sub(height);
        let obligation = obligation.clone();
        self.persist_obligation(&obligation)?;

        // revenue accrues as the service is rendered
        let stored = data.len() as u64;
        let storage_revenue = state
            .settings
            .minimum_storage_price
            .checked_mul_u64(stored)
            .and_then(|c| c.checked_mul_u64(remaining_blocks.max(1)))
            .unwrap_or(Currency::ZERO);
        state.metrics.storage_revenue = state
            .metrics
            .storage_revenue
            .checked_add(storage_revenue)
            .unwrap_or(state.metrics.storage_revenue);
        let upload_revenue = state
            .settings
            .minimum_upload_bandwidth_price
            .checked_mul_u64(stored)
            .unwrap_or(Currency::ZERO);
        state.metrics.upload_bandwidth_revenue = state
            .metrics
            .upload_bandwidth_revenue
            .checked_add(upload_revenue)
            .unwrap_or(state.metrics.upload_bandwidth_revenue);
        self.persist_metrics(&state.metrics)?;

        trace!("Stored sector {} for contract {}", root, contract_id);
        Ok(root)
    }

    async fn download_sector(
        &self,
        contract_id: &Hash,
        root: &Hash,
    ) -> Result<Vec<u8>, HostError> {
        let mut state = self.state.write().await;
        let obligation = state
            .obligations
            .get(contract_id)
            .ok_or(HostError::UnknownObligation)?;
        if !obligation.sector_roots.contains(root) {
            return Err(HostError::SectorNotFound);
        }
        let data = state.store.read_sector(root)?;

        let revenue = state
            .settings
            .minimum_download_bandwidth_price
            .checked_mul_u64(data.len() as u64)
            .unwrap_or(Currency::ZERO);
        state.metrics.download_bandwidth_revenue = state
            .metrics
            .download_bandwidth_revenue
            .checked_add(revenue)
            .unwrap_or(state.metrics.download_bandwidth_revenue);
        self.persist_metrics(&state.metrics)?;

        Ok(data)
    }

    fn persist_settings(&self, settings: &HostInternalSettings) -> Result<(), HostError> {
        self.meta.insert(META_SETTINGS, settings.to_bytes())?;
        Ok(())
    }

    fn persist_metrics(&self, metrics: &HostFinancialMetrics) -> Result<(), HostError> {
        self.meta.insert(META_METRICS, metrics.to_bytes())?;
        Ok(())
    }

    fn persist_folders(&self, store: &SectorStore) -> Result<(), HostError> {
        let mut writer = Writer::new();
        writer.write_u16(store.folders.len() as u16);
        for folder in &store.folders {
            writer.write_string(&folder.path);
            writer.write_u64(folder.capacity);
        }
        self.meta.insert(META_FOLDERS, writer.bytes())?;
        Ok(())
    }

    pub(crate) fn persist_obligation(&self, obligation: &StorageObligation) -> Result<(), HostError> {
        self.obligations_tree
            .insert(obligation.contract_id.as_bytes(), obligation.to_bytes())?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), HostError> {
        if let Some(task) = self.listener_task.lock().await.take() {
            task.abort();
        }
        self.db.flush_async().await?;
        Ok(())
    }
}
