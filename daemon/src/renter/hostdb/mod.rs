mod score;

pub use score::score_breakdown;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sia_common::announcement::decode_announcement;
use sia_common::api::host::HostExternalSettings;
use sia_common::api::renter::HostDbEntryInfo;
use sia_common::crypto::PublicKey;
use sia_common::serializer::{Reader, ReaderError, Serializer, Writer};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::consensus::{ConsensusChange, ConsensusSubscriber};

#[derive(Error, Debug)]
pub enum HostDbError {
    #[error("no host known with that public key")]
    UnknownHost,
    #[error("hostdb database error: {0}")]
    Database(#[from] sled::Error),
    #[error("hostdb encoding error: {0}")]
    Serialization(#[from] ReaderError),
}

// One host ever announced. The pubkey is the identity; the net address is
// whatever the most recent announcement claimed.
#[derive(Clone, Debug)]
pub struct HostDbEntry {
    pub public_key: PublicKey,
    pub net_address: String,
    // height of the first announcement
    pub first_seen: u64,
    pub settings: Option<HostExternalSettings>,
    pub historic_uptime: u64,
    pub historic_downtime: u64,
    // outcome of the most recent scan
    pub reachable: bool,
}

impl HostDbEntry {
    pub fn new(public_key: PublicKey, net_address: String, first_seen: u64) -> Self {
        HostDbEntry {
            public_key,
            net_address,
            first_seen,
            settings: None,
            historic_uptime: 0,
            historic_downtime: 0,
            reachable: true,
        }
    }

    pub fn accepting_contracts(&self) -> bool {
        self.settings
            .as_ref()
            .map(|s| s.accepting_contracts)
            .unwrap_or(false)
    }
}

impl Serializer for HostDbEntry {
    fn write(&self, writer: &mut Writer) {
        self.public_key.write(writer);
        writer.write_string(&self.net_address);
        writer.write_u64(self.first_seen);
        self.settings.write(writer);
        writer.write_u64(self.historic_uptime);
        writer.write_u64(self.historic_downtime);
        writer.write_bool(self.reachable);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(HostDbEntry {
            public_key: PublicKey::read(reader)?,
            net_address: reader.read_string()?,
            first_seen: reader.read_u64()?,
            settings: Option::read(reader)?,
            historic_uptime: reader.read_u64()?,
            historic_downtime: reader.read_u64()?,
            reachable: reader.read_bool()?,
        })
    }
}

struct HostDbState {
    hosts: HashMap<[u8; 32], HostDbEntry>,
    blocks_seen: u64,
}

// Directory of every host announcement ever seen on chain, with the scoring
// model contract formation ranks by.
pub struct HostDb {
    tree: sled::Tree,
    state: RwLock<HostDbState>,
}

impl HostDb {
    pub fn new(db: &sled::Db) -> Result<Arc<Self>, HostDbError> {
        let tree = db.open_tree("hostdb")?;
        let mut hosts = HashMap::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            let host = HostDbEntry::from_bytes(&value)?;
            hosts.insert(*host.public_key.as_bytes(), host);
        }
        if !hosts.is_empty() {
            debug!("HostDB loaded {} hosts", hosts.len());
        }

        Ok(Arc::new(HostDb {
            tree,
            state: RwLock::new(HostDbState {
                hosts,
                blocks_seen: 0,
            }),
        }))
    }

    pub async fn height(&self) -> u64 {
        self.state.read().await.blocks_seen.saturating_sub(1)
    }

    pub async fn host(&self, public_key: &PublicKey) -> Option<HostDbEntry> {
        self.state
            .read()
            .await
            .hosts
            .get(public_key.as_bytes())
            .cloned()
    }

    pub async fn all_hosts(&self) -> Vec<HostDbEntry> {
        self.state.read().await.hosts.values().cloned().collect()
    }

    // hosts worth forming contracts with, best score first
    pub async fn active_hosts(&self) -> Vec<HostDbEntry> {
        let state = self.state.read().await;
        let height = state.blocks_seen.saturating_sub(1);
        let mut active: Vec<HostDbEntry> = state
            .hosts
            .values()
            .filter(|host| host.accepting_contracts())
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            let score_a = score_breakdown(a, height).score;
            let score_b = score_breakdown(b, height).score;
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        active
    }

    pub async fn entry_info(&self, entry: &HostDbEntry) -> HostDbEntryInfo {
        let height = self.height().await;
        let settings = entry.settings.as_ref();
        HostDbEntryInfo {
            public_key: entry.public_key.clone(),
            net_address: entry.net_address.clone(),
            accepting_contracts: entry.accepting_contracts(),
            remaining_storage: settings.map(|s| s.remaining_storage).unwrap_or(0),
            storage_price: settings
                .map(|s| s.storage_price)
                .unwrap_or(sia_common::currency::Currency::ZERO),
            collateral: settings
                .map(|s| s.collateral)
                .unwrap_or(sia_common::currency::Currency::ZERO),
            version: settings.map(|s| s.version.clone()).unwrap_or_default(),
            first_seen: entry.first_seen,
            historic_uptime: entry.historic_uptime,
            historic_downtime: entry.historic_downtime,
            score_breakdown: score_breakdown(entry, height),
        }
    }

    // Record the outcome of a scan so uptime scoring tracks reality
    pub async fn record_scan(
        &self,
        public_key: &PublicKey,
        settings: Option<HostExternalSettings>,
    ) {
        let mut state = self.state.write().await;
        let Some(entry) = state.hosts.get_mut(public_key.as_bytes()) else {
            return;
        };
        match settings {
            Some(settings) => {
                entry.historic_uptime += 1;
                entry.reachable = true;
                entry.settings = Some(settings);
            }
            None => {
                entry.historic_downtime += 1;
                entry.reachable = false;
            }
        }
        let entry = entry.clone();
        drop(state);
        self.persist(&entry);
    }

    fn persist(&self, entry: &HostDbEntry) {
        if let Err(e) = self
            .tree
            .insert(entry.public_key.as_bytes(), entry.to_bytes())
        {
            error!("HostDB persist failed: {}", e);
        }
    }

    // Ingest announcements from one block's arbitrary data. A known pubkey
    // announcing a new address is rebound; existing contracts keep working
    // through the identity.
    async fn scan_block(&self, block: &sia_common::block::Block, height: u64) {
        for txn in &block.transactions {
            for blob in &txn.arbitrary_data {
                let announcement = match decode_announcement(blob) {
                    Ok(announcement) => announcement,
                    Err(_) => continue,
                };

                let mut state = self.state.write().await;
                let entry = state
                    .hosts
                    .entry(*announcement.public_key.as_bytes())
                    .or_insert_with(|| {
                        info!(
                            "New host announced: {} at {}",
                            announcement.public_key, announcement.net_address
                        );
                        HostDbEntry::new(
                            announcement.public_key.clone(),
                            announcement.net_address.clone(),
                            height,
                        )
                    });
                if entry.net_address != announcement.net_address {
                    info!(
                        "Host {} moved from {} to {}",
                        announcement.public_key, entry.net_address, announcement.net_address
                    );
                    entry.net_address = announcement.net_address.clone();
                }
                let entry = entry.clone();
                drop(state);
                self.persist(&entry);
            }
        }
    }
}

#[async_trait]
impl ConsensusSubscriber for HostDb {
    fn name(&self) -> &'static str {
        "hostdb"
    }

    async fn process_consensus_change(&self, change: Arc<ConsensusChange>) {
        {
            let mut state = self.state.write().await;
            state.blocks_seen = state
                .blocks_seen
                .saturating_sub(change.reverted_blocks.len() as u64);
            state.blocks_seen += change.applied_blocks.len() as u64;
        }

        let height = self.height().await;
        for block in &change.applied_blocks {
            self.scan_block(block, height).await;
        }
    }
}
