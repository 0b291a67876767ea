mod contracts;
mod files;
pub mod hostdb;

pub use contracts::RenterContract;
pub use files::{decode_chunk, encode_chunk, piece_size, Piece, RenterFile};
pub use hostdb::{HostDb, HostDbEntry};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sia_common::api::renter::{Allowance, DownloadInfo, FileInfo, RenterContractInfo};
use sia_common::crypto::Hash;
use sia_common::currency::Currency;
use sia_common::serializer::{ReaderError, Serializer};
use sia_common::transaction::{FileContract, SiacoinOutput, Transaction};
use sia_common::unlock::UnlockConditions;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::consensus::{ConsensusChange, ConsensusSet, ConsensusSubscriber};
use crate::host::protocol::{host_round_trip, HostRequest, HostResponse};
use crate::tpool::{TPoolError, TransactionPool};
use crate::wallet::{Wallet, WalletError};

#[derive(Error, Debug)]
pub enum RenterError {
    #[error("allowance has not been set")]
    AllowanceNotSet,
    #[error("insufficient hosts to recover file")]
    InsufficientHosts,
    #[error("no file known by that path")]
    FileNotFound,
    #[error("a file already exists at that path")]
    FileExists,
    #[error("source must be an absolute path")]
    SourceNotAbsolute,
    #[error("destination must be an absolute path")]
    DestinationNotAbsolute,
    #[error("erasure coding failure: {0}")]
    Erasure(String),
    #[error("host refused the request: {0}")]
    HostRefused(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("renter database error: {0}")]
    Database(#[from] sled::Error),
    #[error("renter encoding error: {0}")]
    Serialization(#[from] ReaderError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    TPool(#[from] TPoolError),
}

const META_ALLOWANCE: &[u8] = b"allowance";

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) struct RenterState {
    pub allowance: Allowance,
    pub contracts: HashMap<Hash, RenterContract>,
    pub files: HashMap<String, RenterFile>,
    pub downloads: Vec<DownloadInfo>,
    pub blocks_seen: u64,
}

// Forms and renews file contracts against an allowance, uploads files with
// erasure coding, downloads from any sufficient subset of hosts, and
// repairs redundancy as hosts come and go.
pub struct Renter {
    consensus: Arc<ConsensusSet>,
    tpool: Arc<TransactionPool>,
    wallet: Arc<Wallet>,
    pub hostdb: Arc<HostDb>,
    db: sled::Db,
    files_tree: sled::Tree,
    contracts_tree: sled::Tree,
    meta: sled::Tree,
    state: RwLock<RenterState>,
    // one pending wakeup at most; the maintenance loop drains it
    maintenance_tx: mpsc::Sender<()>,
    maintenance_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Renter {
    pub fn new(
        consensus: Arc<ConsensusSet>,
        tpool: Arc<TransactionPool>,
        wallet: Arc<Wallet>,
        data_dir: &str,
    ) -> Result<Arc<Self>, RenterError> {
        let db = sled::open(format!("{}/renter", data_dir))?;
        let files_tree = db.open_tree("files")?;
        let contracts_tree = db.open_tree("contracts")?;
        let meta = db.open_tree("meta")?;
        let hostdb = HostDb::new(&db).map_err(|e| match e {
            hostdb::HostDbError::Database(e) => RenterError::Database(e),
            hostdb::HostDbError::Serialization(e) => RenterError::Serialization(e),
            hostdb::HostDbError::UnknownHost => RenterError::FileNotFound,
        })?;

        let allowance = match meta.get(META_ALLOWANCE)? {
            Some(bytes) => Allowance::from_bytes(&bytes)?,
            None => Allowance::default(),
        };

        let mut contracts = HashMap::new();
        for entry in contracts_tree.iter() {
            let (_, value) = entry?;
            let contract = RenterContract::from_bytes(&value)?;
            contracts.insert(contract.id.clone(), contract);
        }

        let mut files = HashMap::new();
        for entry in files_tree.iter() {
            let (_, value) = entry?;
            let file = RenterFile::from_bytes(&value)?;
            files.insert(file.siapath.clone(), file);
        }
        if !contracts.is_empty() || !files.is_empty() {
            info!(
                "Renter loaded {} contracts, {} files",
                contracts.len(),
                files.len()
            );
        }

        let (maintenance_tx, maintenance_rx) = mpsc::channel(1);
        Ok(Arc::new(Renter {
            consensus,
            tpool,
            wallet,
            hostdb,
            db,
            files_tree,
            contracts_tree,
            meta,
            state: RwLock::new(RenterState {
                allowance,
                contracts,
                files,
                downloads: Vec::new(),
                blocks_seen: 0,
            }),
            maintenance_tx,
            maintenance_rx: Mutex::new(Some(maintenance_rx)),
        }))
    }

    // Start the maintenance loop: contract formation, renewal, host
    // scanning and repair, woken by each consensus change tick.
    pub async fn start(self: &Arc<Self>) {
        let Some(mut rx) = self.maintenance_rx.lock().await.take() else {
            return;
        };
        let renter = Arc::clone(self);
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                renter.maintenance().await;
            }
            debug!("Renter maintenance loop ended");
        });
    }

    pub async fn allowance(&self) -> Allowance {
        self.state.read().await.allowance.clone()
    }

    // Setting all-zero cancels: no more formation or renewal
    pub async fn set_allowance(&self, allowance: Allowance) -> Result<(), RenterError> {
        {
            let mut state = self.state.write().await;
            self.meta.insert(META_ALLOWANCE, allowance.to_bytes())?;
            if allowance.active() {
                info!(
                    "Allowance set: {} over {} hosts, period {}",
                    allowance.funds, allowance.hosts, allowance.period
                );
            } else {
                info!("Allowance cancelled");
            }
            state.allowance = allowance;
        }
        let _ = self.maintenance_tx.try_send(());
        Ok(())
    }

    pub async fn contracts(&self) -> Vec<RenterContractInfo> {
        let state = self.state.read().await;
        let mut infos = Vec::with_capacity(state.contracts.len());
        for contract in state.contracts.values() {
            let net_address = self
                .hostdb
                .host(&contract.host_public_key)
                .await
                .map(|entry| entry.net_address)
                .unwrap_or_default();
            infos.push(RenterContractInfo {
                id: contract.id.clone(),
                host_public_key: contract.host_public_key.clone(),
                net_address,
                renter_funds: contract.renter_funds,
                end_height: contract.end_height,
                size: contract.size,
            });
        }
        infos
    }

    pub async fn files(&self) -> Vec<FileInfo> {
        let state = self.state.read().await;
        let reachable = self.reachable_hosts().await;
        state
            .files
            .values()
            .map(|file| {
                let redundancy = file_redundancy(file, &reachable);
                FileInfo {
                    siapath: file.siapath.clone(),
                    filesize: file.size,
                    available: redundancy >= 1.0,
                    renewing: state.allowance.active(),
                    redundancy,
                    upload_progress: file.upload_progress(),
                    expiration: file
                        .pieces
                        .iter()
                        .filter_map(|piece| state.contracts.get(&piece.contract_id))
                        .map(|contract| contract.end_height)
                        .min()
                        .unwrap_or(0),
                }
            })
            .collect()
    }

    pub async fn downloads(&self) -> Vec<DownloadInfo> {
        self.state.read().await.downloads.clone()
    }

    // Queue an upload. Splitting, encoding and placement happen on a
    // background task; progress is visible through the files listing.
    pub async fn upload(
        self: &Arc<Self>,
        source: &str,
        siapath: &str,
        data_pieces: u64,
        parity_pieces: u64,
    ) -> Result<(), RenterError> {
        if !Path::new(source).is_absolute() {
            return Err(RenterError::SourceNotAbsolute);
        }
        let data = std::fs::read(source)?;

        {
            let mut state = self.state.write().await;
            if !state.allowance.active() {
                return Err(RenterError::AllowanceNotSet);
            }
            if state.files.contains_key(siapath) {
                return Err(RenterError::FileExists);
            }
            let file = RenterFile {
                siapath: siapath.to_string(),
                size: data.len() as u64,
                data_pieces: data_pieces.max(1),
                parity_pieces,
                local_path: source.to_string(),
                pieces: Vec::new(),
            };
            self.persist_file(&file)?;
            state.files.insert(siapath.to_string(), file);
        }

        let renter = Arc::clone(self);
        let siapath = siapath.to_string();
        tokio::spawn(async move {
            if let Err(e) = renter.upload_pieces(&siapath, &data).await {
                warn!("Upload of {} failed: {}", siapath, e);
            }
        });
        Ok(())
    }

    // Place every piece of every chunk; pieces rotate across contracts so
    // each chunk spreads over as many distinct hosts as are available.
    async fn upload_pieces(&self, siapath: &str, data: &[u8]) -> Result<(), RenterError> {
        let (data_pieces, parity_pieces) = {
            let state = self.state.read().await;
            let file = state.files.get(siapath).ok_or(RenterError::FileNotFound)?;
            (file.data_pieces as usize, file.parity_pieces as usize)
        };

        let chunk_size = (data_pieces as u64 * piece_size()) as usize;
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(chunk_size).collect()
        };

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            let shards = encode_chunk(chunk, data_pieces, parity_pieces)?;
            for (piece_index, shard) in shards.into_iter().enumerate() {
                if let Err(e) = self
                    .upload_one_piece(siapath, chunk_index as u64, piece_index as u64, shard)
                    .await
                {
                    debug!(
                        "Piece {}/{} of {} not placed yet: {}",
                        chunk_index, piece_index, siapath, e
                    );
                }
            }
        }
        info!("Upload of {} finished", siapath);
        Ok(())
    }

    async fn upload_one_piece(
        &self,
        siapath: &str,
        chunk: u64,
        index: u64,
        shard: Vec<u8>,
    ) -> Result<(), RenterError> {
        // pick a contract: prefer hosts not yet holding a piece of this chunk
        let (contract_id, host_key) = {
            let state = self.state.read().await;
            let file = state.files.get(siapath).ok_or(RenterError::FileNotFound)?;
            if file
                .pieces
                .iter()
                .any(|piece| piece.chunk == chunk && piece.index == index)
            {
                return Ok(());
            }
            let holding: HashSet<[u8; 32]> = file
                .pieces
                .iter()
                .filter(|piece| piece.chunk == chunk)
                .map(|piece| *piece.host_public_key.as_bytes())
                .collect();

            let mut active: Vec<&RenterContract> = state
                .contracts
                .values()
                .filter(|contract| !contract.retired)
                .collect();
            active.sort_by(|a, b| a.id.cmp(&b.id));

            let chosen = active
                .iter()
                .find(|contract| !holding.contains(contract.host_public_key.as_bytes()))
                .or_else(|| active.first())
                .ok_or(RenterError::InsufficientHosts)?;

            (chosen.id.clone(), chosen.host_public_key.clone())
        };

        let address = self
            .hostdb
            .host(&host_key)
            .await
            .map(|entry| entry.net_address)
            .filter(|addr| !addr.is_empty())
            .ok_or(RenterError::InsufficientHosts)?;

        let size = shard.len() as u64;
        let response = host_round_trip(
            &address,
            &HostRequest::UploadSector {
                contract_id: contract_id.clone(),
                data: shard,
            },
        )
        .await?;

        let root = match response {
            HostResponse::SectorStored { root } => root,
            HostResponse::Error { message } => return Err(RenterError::HostRefused(message)),
            _ => return Err(RenterError::HostRefused("unexpected response".to_string())),
        };

        let mut state = self.state.write().await;
        if let Some(contract) = state.contracts.get_mut(&contract_id) {
            contract.size += size;
            let contract = contract.clone();
            self.persist_contract(&contract)?;
        }
        let file = state
            .files
            .get_mut(siapath)
            .ok_or(RenterError::FileNotFound)?;
        file.pieces.push(Piece {
            chunk,
            index,
            host_public_key: host_key,
            contract_id,
            root,
            size,
        });
        let file = file.clone();
        self.persist_file(&file)?;
        Ok(())
    }

    // Fetch, reconstruct and write out a file. Any D healthy pieces per
    // chunk suffice; hosts are looked up by pubkey so address changes since
    // upload are harmless.
    pub async fn download(&self, siapath: &str, destination: &str) -> Result<(), RenterError> {
        if !Path::new(destination).is_absolute() {
            return Err(RenterError::DestinationNotAbsolute);
        }

        let file = {
            let state = self.state.read().await;
            state
                .files
                .get(siapath)
                .cloned()
                .ok_or(RenterError::FileNotFound)?
        };

        let mut entry = DownloadInfo {
            siapath: siapath.to_string(),
            destination: destination.to_string(),
            filesize: file.size,
            received: 0,
            start_time: unix_now(),
            error: String::new(),
        };

        let result = self.fetch_file(&file, destination, &mut entry).await;
        if let Err(e) = &result {
            entry.error = e.to_string();
        }
        self.state.write().await.downloads.push(entry);
        result
    }

    async fn fetch_file(
        &self,
        file: &RenterFile,
        destination: &str,
        entry: &mut DownloadInfo,
    ) -> Result<(), RenterError> {
        let data_pieces = file.data_pieces as usize;
        let parity_pieces = file.parity_pieces as usize;
        let total_pieces = data_pieces + parity_pieces;
        let chunk_size = file.data_pieces * piece_size();

        let mut plaintext = Vec::with_capacity(file.size as usize);
        for chunk_index in 0..file.chunk_count() {
            let mut shards: Vec<Option<Vec<u8>>> = vec![None; total_pieces];
            let mut fetched = 0usize;

            for piece in file.pieces.iter().filter(|p| p.chunk == chunk_index) {
                if fetched >= data_pieces {
                    break;
                }
                let slot = piece.index as usize;
                if slot >= total_pieces || shards[slot].is_some() {
                    continue;
                }
                let Some(host) = self.hostdb.host(&piece.host_public_key).await else {
                    continue;
                };
                match host_round_trip(
                    &host.net_address,
                    &HostRequest::DownloadSector {
                        contract_id: piece.contract_id.clone(),
                        root: piece.root.clone(),
                    },
                )
                .await
                {
                    Ok(HostResponse::Sector { data }) => {
                        entry.received += data.len() as u64;
                        shards[slot] = Some(data);
                        fetched += 1;
                        self.hostdb
                            .record_scan(&piece.host_public_key, host.settings.clone())
                            .await;
                    }
                    Ok(_) | Err(_) => {
                        self.hostdb.record_scan(&piece.host_public_key, None).await;
                    }
                }
            }

            let remaining = file.size.saturating_sub(chunk_index * chunk_size);
            let chunk_len = remaining.min(chunk_size) as usize;
            let chunk = decode_chunk(shards, data_pieces, parity_pieces, chunk_len)?;
            plaintext.extend_from_slice(&chunk);
        }

        plaintext.truncate(file.size as usize);
        std::fs::write(destination, &plaintext)?;
        info!("Downloaded {} to {}", file.siapath, destination);
        Ok(())
    }

    pub async fn delete_file(&self, siapath: &str) -> Result<(), RenterError> {
        let mut state = self.state.write().await;
        state
            .files
            .remove(siapath)
            .ok_or(RenterError::FileNotFound)?;
        self.files_tree.remove(siapath.as_bytes())?;
        Ok(())
    }

    pub async fn rename_file(&self, siapath: &str, new_siapath: &str) -> Result<(), RenterError> {
        let mut state = self.state.write().await;
        if state.files.contains_key(new_siapath) {
            return Err(RenterError::FileExists);
        }
        let mut file = state
            .files
            .remove(siapath)
            .ok_or(RenterError::FileNotFound)?;
        self.files_tree.remove(siapath.as_bytes())?;
        file.siapath = new_siapath.to_string();
        self.persist_file(&file)?;
        state.files.insert(new_siapath.to_string(), file);
        Ok(())
    }

    // One pass of background upkeep. Runs on the maintenance task only.
    async fn maintenance(&self) {
        self.scan_hosts().await;
        if let Err(e) = self.manage_contracts().await {
            debug!("Contract maintenance: {}", e);
        }
        self.repair_files().await;
    }

    // Probe contracted and candidate hosts so uptime and liveness stay fresh
    async fn scan_hosts(&self) {
        let targets: Vec<HostDbEntry> = self.hostdb.all_hosts().await;
        for host in targets {
            match host_round_trip(&host.net_address, &HostRequest::Settings).await {
                Ok(HostResponse::Settings(settings)) => {
                    self.hostdb
                        .record_scan(&host.public_key, Some(settings))
                        .await;
                }
                _ => self.hostdb.record_scan(&host.public_key, None).await,
            }
        }
    }

    async fn manage_contracts(&self) -> Result<(), RenterError> {
        // the maintenance task runs outside bus callbacks, so asking the
        // consensus set for a fresh height is safe here
        let height = self.consensus.height().await;
        let (allowance, active_count, contracted, renewals) = {
            let state = self.state.read().await;
            let active: Vec<&RenterContract> = state
                .contracts
                .values()
                .filter(|c| !c.retired && c.end_height > height)
                .collect();
            let contracted: HashSet<[u8; 32]> = active
                .iter()
                .map(|c| *c.host_public_key.as_bytes())
                .collect();
            let renewals: Vec<RenterContract> = active
                .iter()
                .filter(|c| height >= c.end_height.saturating_sub(state.allowance.renew_window))
                .map(|c| (*c).clone())
                .collect();
            (
                state.allowance.clone(),
                active.len() as u64,
                contracted,
                renewals,
            )
        };

        if !allowance.active() {
            return Ok(());
        }

        // renewals first: the old ID is retired, a fresh contract with the
        // same host takes its place
        for old in renewals {
            let Some(host) = self.hostdb.host(&old.host_public_key).await else {
                continue;
            };
            match self.form_contract(&host, &allowance, height).await {
                Ok(new_id) => {
                    info!("Renewed contract {} into {}", old.id, new_id);
                    let mut state = self.state.write().await;
                    if let Some(contract) = state.contracts.get_mut(&old.id) {
                        contract.retired = true;
                        let contract = contract.clone();
                        self.persist_contract(&contract)?;
                    }
                }
                Err(e) => debug!("Renewal with {} failed: {}", old.host_public_key, e),
            }
        }

        // then top up to the allowance's host count with the best-scored
        // hosts we have no contract with
        let mut needed = allowance.hosts.saturating_sub(active_count);
        if needed == 0 {
            return Ok(());
        }
        for host in self.hostdb.active_hosts().await {
            if needed == 0 {
                break;
            }
            if contracted.contains(host.public_key.as_bytes()) {
                continue;
            }
            match self.form_contract(&host, &allowance, height).await {
                Ok(id) => {
                    info!("Formed contract {} with {}", id, host.public_key);
                    needed -= 1;
                }
                Err(e) => debug!("Contract with {} failed: {}", host.public_key, e),
            }
        }
        Ok(())
    }

    // Negotiate one contract: renter funds the payout, host tracks the
    // obligation, the formation set goes to the pool.
    async fn form_contract(
        &self,
        host: &HostDbEntry,
        allowance: &Allowance,
        height: u64,
    ) -> Result<Hash, RenterError> {
        let settings = match host_round_trip(&host.net_address, &HostRequest::Settings).await {
            Ok(HostResponse::Settings(settings)) => settings,
            _ => {
                self.hostdb.record_scan(&host.public_key, None).await;
                return Err(RenterError::InsufficientHosts);
            }
        };
        self.hostdb
            .record_scan(&host.public_key, Some(settings.clone()))
            .await;
        if !settings.accepting_contracts {
            return Err(RenterError::HostRefused(
                "not accepting contracts".to_string(),
            ));
        }

        // half the per-host budget per period, leaving room for the renewal
        let payout = allowance
            .funds
            .checked_div_u64(allowance.hosts.max(1))
            .and_then(|c| c.checked_div_u64(2))
            .ok_or(RenterError::AllowanceNotSet)?;
        if payout <= settings.contract_price {
            return Err(RenterError::AllowanceNotSet);
        }

        let renter_conditions = self.wallet.next_address().await?;
        let renter_payout = payout.saturating_sub(settings.contract_price);
        let host_address = UnlockConditions::standard(settings.public_key.clone()).unlock_hash();

        let end_height = height + allowance.period.max(2);
        let contract = FileContract {
            file_size: 0,
            file_merkle_root: Hash::zero(),
            window_start: end_height,
            window_end: end_height + settings.window_size.max(1),
            payout,
            valid_proof_outputs: vec![
                SiacoinOutput {
                    value: renter_payout,
                    unlock_hash: renter_conditions.unlock_hash(),
                },
                SiacoinOutput {
                    value: settings.contract_price,
                    unlock_hash: host_address.clone(),
                },
            ],
            missed_proof_outputs: vec![
                SiacoinOutput {
                    value: renter_payout,
                    unlock_hash: renter_conditions.unlock_hash(),
                },
                SiacoinOutput {
                    value: settings.contract_price,
                    unlock_hash: host_address,
                },
            ],
            unlock_hash: renter_conditions.unlock_hash(),
            revision_number: 0,
        };

        let txn = Transaction {
            file_contracts: vec![contract],
            miner_fees: vec![Currency::from_coins(10)],
            ..Default::default()
        };
        let txn = self.wallet.fund_and_sign(txn).await?;
        let contract_id = txn.file_contract_id(0);

        match host_round_trip(
            &host.net_address,
            &HostRequest::FormContract {
                transaction_set: vec![txn.clone()],
            },
        )
        .await?
        {
            HostResponse::ContractAccepted { .. } => {}
            HostResponse::Error { message } => return Err(RenterError::HostRefused(message)),
            _ => return Err(RenterError::HostRefused("unexpected response".to_string())),
        }

        self.tpool.accept_transaction_set(vec![txn]).await?;

        let record = RenterContract::new(
            contract_id.clone(),
            host.public_key.clone(),
            end_height,
            renter_payout,
        );
        self.persist_contract(&record)?;
        self.state
            .write()
            .await
            .contracts
            .insert(contract_id.clone(), record);
        Ok(contract_id)
    }

    // Re-place pieces whose hosts went away, preferring the local copy as
    // the source; remote reconstruction is the fallback.
    async fn repair_files(&self) {
        let files: Vec<RenterFile> = {
            let state = self.state.read().await;
            state.files.values().cloned().collect()
        };
        let reachable = self.reachable_hosts().await;

        for file in files {
            if file_redundancy(&file, &reachable) >= target_redundancy(&file) {
                continue;
            }

            let data = match std::fs::read(&file.local_path) {
                Ok(data) => data,
                Err(_) => {
                    // local source gone; rebuild from the network
                    let mut entry = DownloadInfo {
                        siapath: file.siapath.clone(),
                        destination: String::new(),
                        filesize: file.size,
                        received: 0,
                        start_time: unix_now(),
                        error: String::new(),
                    };
                    let temp = std::env::temp_dir().join(format!("repair-{}", file.siapath.replace('/', "_")));
                    let temp_str = temp.to_string_lossy().to_string();
                    match self.fetch_file(&file, &temp_str, &mut entry).await {
                        Ok(()) => std::fs::read(&temp).unwrap_or_default(),
                        Err(e) => {
                            debug!("Repair source for {} unavailable: {}", file.siapath, e);
                            continue;
                        }
                    }
                }
            };
            if data.is_empty() && file.size > 0 {
                continue;
            }

            debug!("Repairing {}", file.siapath);
            // drop piece records whose hosts are gone so upload re-places them
            {
                let mut state = self.state.write().await;
                if let Some(stored) = state.files.get_mut(&file.siapath) {
                    stored
                        .pieces
                        .retain(|piece| reachable.contains(piece.host_public_key.as_bytes()));
                    let stored = stored.clone();
                    if let Err(e) = self.persist_file(&stored) {
                        error!("Repair persist failed: {}", e);
                    }
                }
            }
            if let Err(e) = self.upload_pieces(&file.siapath, &data).await {
                debug!("Repair of {} incomplete: {}", file.siapath, e);
            }
        }
    }

    async fn reachable_hosts(&self) -> HashSet<[u8; 32]> {
        self.hostdb
            .all_hosts()
            .await
            .into_iter()
            .filter(|host| host.reachable)
            .map(|host| *host.public_key.as_bytes())
            .collect()
    }

    fn persist_file(&self, file: &RenterFile) -> Result<(), RenterError> {
        self.files_tree
            .insert(file.siapath.as_bytes(), file.to_bytes())?;
        Ok(())
    }

    fn persist_contract(&self, contract: &RenterContract) -> Result<(), RenterError> {
        self.contracts_tree
            .insert(contract.id.as_bytes(), contract.to_bytes())?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), RenterError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

// redundancy of the worst chunk: distinct reachable hosts holding a piece
// of it, divided by the required data pieces
fn file_redundancy(file: &RenterFile, reachable: &HashSet<[u8; 32]>) -> f64 {
    let mut worst = f64::MAX;
    for chunk in 0..file.chunk_count() {
        let hosts: HashSet<[u8; 32]> = file
            .pieces
            .iter()
            .filter(|piece| piece.chunk == chunk)
            .filter(|piece| reachable.contains(piece.host_public_key.as_bytes()))
            .map(|piece| *piece.host_public_key.as_bytes())
            .collect();
        let redundancy = hosts.len() as f64 / file.data_pieces.max(1) as f64;
        worst = worst.min(redundancy);
    }
    if worst == f64::MAX {
        0.0
    } else {
        worst
    }
}

fn target_redundancy(file: &RenterFile) -> f64 {
    (file.data_pieces + file.parity_pieces) as f64 / file.data_pieces.max(1) as f64
}

#[async_trait]
impl ConsensusSubscriber for Renter {
    fn name(&self) -> &'static str {
        "renter"
    }

    async fn process_consensus_change(&self, change: Arc<ConsensusChange>) {
        {
            let mut state = self.state.write().await;
            state.blocks_seen = state
                .blocks_seen
                .saturating_sub(change.reverted_blocks.len() as u64);
            state.blocks_seen += change.applied_blocks.len() as u64;
        }
        // kick the maintenance loop; a full queue means a pass is already due
        let _ = self.maintenance_tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sia_common::crypto::SecretKey;

    fn piece_for(host_byte: u8, chunk: u64, index: u64) -> Piece {
        let key = SecretKey::from_bytes(&[host_byte; 32]);
        Piece {
            chunk,
            index,
            host_public_key: key.public_key(),
            contract_id: Hash::zero(),
            root: Hash::zero(),
            size: 10,
        }
    }

    fn reachable_set(bytes: &[u8]) -> HashSet<[u8; 32]> {
        bytes
            .iter()
            .map(|b| *SecretKey::from_bytes(&[*b; 32]).public_key().as_bytes())
            .collect()
    }

    #[test]
    fn test_redundancy_counts_distinct_live_hosts() {
        let file = RenterFile {
            siapath: "test".to_string(),
            size: 100,
            data_pieces: 2,
            parity_pieces: 4,
            local_path: String::new(),
            pieces: vec![
                piece_for(1, 0, 0),
                piece_for(2, 0, 1),
                piece_for(3, 0, 2),
                piece_for(4, 0, 3),
            ],
        };

        assert_eq!(file_redundancy(&file, &reachable_set(&[1, 2, 3, 4])), 2.0);
        // losing two hosts halves the redundancy but keeps it downloadable
        assert_eq!(file_redundancy(&file, &reachable_set(&[1, 2])), 1.0);
        assert_eq!(file_redundancy(&file, &reachable_set(&[])), 0.0);
    }

    #[test]
    fn test_redundancy_is_worst_chunk() {
        let file = RenterFile {
            siapath: "test".to_string(),
            size: 100,
            data_pieces: 1,
            parity_pieces: 1,
            local_path: String::new(),
            pieces: vec![
                piece_for(1, 0, 0),
                piece_for(2, 0, 1),
                piece_for(1, 1, 0),
            ],
        };
        // chunk 1 only lives on host 1
        assert_eq!(file_redundancy(&file, &reachable_set(&[1, 2])), 1.0);
    }
}
