use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use lru::LruCache;
use sia_common::block::{Block, BlockHeader, Target};
use sia_common::config::{BLOCK_HEADER_SIZE, MAX_BLOCK_SIZE};
use sia_common::crypto::{Hash, HASH_SIZE};
use sia_common::serializer::Serializer;
use sia_common::transaction::SiacoinOutput;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::consensus::{block_subsidy, ConsensusError, ConsensusSet};
use crate::tpool::TransactionPool;
use crate::wallet::{Wallet, WalletError};

// how many recent templates are kept so externally mined headers can be
// matched back to their block bodies
const TEMPLATE_CACHE_SIZE: usize = 64;
// nonces ground per cooperative yield in the CPU miner
const NONCES_PER_YIELD: u64 = 4_096;

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("submitted header does not match any recent template")]
    UnknownHeader,
    #[error("submitted header is stale")]
    StaleHeader,
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// Assembles candidate blocks from the pool, serves 80-byte headers to
// external workers, and optionally grinds nonces on a local task.
pub struct Miner {
    consensus: Arc<ConsensusSet>,
    tpool: Arc<TransactionPool>,
    wallet: Arc<Wallet>,
    // templates by merkle root; a submitted header carries the root, which
    // is enough to recover the full body
    templates: Mutex<LruCache<Hash, Block>>,
    mining: AtomicBool,
    blocks_mined: AtomicU64,
    stale_blocks_mined: AtomicU64,
    // hashes per second observed by the CPU miner
    hashrate: AtomicU64,
    cpu_task: Mutex<Option<JoinHandle<()>>>,
}

impl Miner {
    pub fn new(
        consensus: Arc<ConsensusSet>,
        tpool: Arc<TransactionPool>,
        wallet: Arc<Wallet>,
    ) -> Arc<Self> {
        Arc::new(Miner {
            consensus,
            tpool,
            wallet,
            templates: Mutex::new(LruCache::new(
                NonZeroUsize::new(TEMPLATE_CACHE_SIZE).unwrap(),
            )),
            mining: AtomicBool::new(false),
            blocks_mined: AtomicU64::new(0),
            stale_blocks_mined: AtomicU64::new(0),
            hashrate: AtomicU64::new(0),
            cpu_task: Mutex::new(None),
        })
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    pub fn blocks_mined(&self) -> (u64, u64) {
        (
            self.blocks_mined.load(Ordering::SeqCst),
            self.stale_blocks_mined.load(Ordering::SeqCst),
        )
    }

    pub fn cpu_hashrate(&self) -> u64 {
        self.hashrate.load(Ordering::SeqCst)
    }

    // Fresh candidate block on top of the current tip: pool transactions up
    // to the size limit, one payout collecting subsidy plus fees.
    pub async fn block_template(&self) -> Result<Block, MinerError> {
        let parent_id = self.consensus.current_tip().await;
        let height = self.consensus.height().await + 1;
        let address = self.wallet.payout_address().await?;

        let mut transactions = Vec::new();
        let mut fees = sia_common::currency::Currency::ZERO;
        let mut size = BLOCK_HEADER_SIZE;
        for txn in self.tpool.transaction_list().await {
            let txn_size = txn.size();
            if size + txn_size > MAX_BLOCK_SIZE {
                break;
            }
            size += txn_size;
            fees = fees.checked_add(txn.total_fees()).unwrap_or(fees);
            transactions.push(txn);
        }

        let payout_value = block_subsidy(height)
            .checked_add(fees)
            .unwrap_or_else(|| block_subsidy(height));

        Ok(Block {
            parent_id,
            nonce: 0,
            timestamp: unix_now(),
            miner_payouts: vec![SiacoinOutput {
                value: payout_value,
                unlock_hash: address,
            }],
            transactions,
        })
    }

    // 112 bytes for remote workers: the 32-byte target followed by the
    // 80-byte header, so difficulty can be checked without a round trip.
    pub async fn header_for_work(&self) -> Result<Vec<u8>, MinerError> {
        let block = self.block_template().await?;
        let target = self
            .consensus
            .child_target(&block.parent_id)
            .await
            .ok_or(ConsensusError::Orphan)?;

        let header = block.header();
        self.templates
            .lock()
            .await
            .put(header.merkle_root.clone(), block);

        let mut out = Vec::with_capacity(HASH_SIZE + BLOCK_HEADER_SIZE);
        out.extend_from_slice(target.as_hash().as_bytes());
        out.extend_from_slice(&header.to_bytes());
        Ok(out)
    }

    // Accept an externally mined 80-byte header, reunite it with its body
    // and hand the block to consensus.
    pub async fn submit_header(&self, bytes: &[u8]) -> Result<(), MinerError> {
        let header = BlockHeader::from_bytes(bytes).map_err(|_| MinerError::UnknownHeader)?;

        let mut block = {
            let mut templates = self.templates.lock().await;
            templates
                .get(&header.merkle_root)
                .cloned()
                .ok_or(MinerError::UnknownHeader)?
        };
        block.nonce = header.nonce;
        block.timestamp = header.timestamp;

        self.integrate_block(block).await
    }

    // Testing aid: submit an externally assembled block as if it were mined
    // locally
    pub async fn add_block(&self, block: Block) -> Result<(), MinerError> {
        self.integrate_block(block).await
    }

    async fn integrate_block(&self, block: Block) -> Result<(), MinerError> {
        match self.consensus.accept_block(block.clone()).await {
            Ok(()) => {
                self.blocks_mined.fetch_add(1, Ordering::SeqCst);
                info!(
                    "Mined block {} at height {}",
                    block.id(),
                    self.consensus.height().await
                );
                self.consensus.gateway().broadcast_block(block).await;
                Ok(())
            }
            Err(ConsensusError::BlockKnown) | Err(ConsensusError::NonExtending) => {
                self.stale_blocks_mined.fetch_add(1, Ordering::SeqCst);
                Err(MinerError::StaleHeader)
            }
            Err(e) => Err(MinerError::Consensus(e)),
        }
    }

    // Grind nonces until the template solves its target. Only the 80-byte
    // header is rehashed per attempt; the body stays bound through the
    // merkle root. Yields regularly so mining cannot starve the runtime.
    pub async fn find_block(&self) -> Result<Block, MinerError> {
        let mut block = self.block_template().await?;
        let target = self
            .consensus
            .child_target(&block.parent_id)
            .await
            .ok_or(ConsensusError::Orphan)?;
        let mut header = block.header();

        let started = Instant::now();
        let mut hashes = 0u64;
        loop {
            for _ in 0..NONCES_PER_YIELD {
                if target.meets(&header.id()) {
                    self.update_hashrate(hashes, started);
                    block.nonce = header.nonce;
                    let solved = block.clone();
                    self.integrate_block(block).await?;
                    return Ok(solved);
                }
                header.nonce = header.nonce.wrapping_add(1);
                hashes += 1;
            }
            self.update_hashrate(hashes, started);
            tokio::task::yield_now().await;
        }
    }

    fn update_hashrate(&self, hashes: u64, started: Instant) {
        let secs = started.elapsed().as_secs().max(1);
        self.hashrate.store(hashes / secs, Ordering::SeqCst);
    }

    // Local CPU mining loop; one block after another until stopped
    pub async fn start_cpu_mining(self: &Arc<Self>) {
        if self.mining.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("CPU miner started");

        let miner = Arc::clone(self);
        let task = tokio::spawn(async move {
            while miner.mining.load(Ordering::SeqCst) {
                match miner.find_block().await {
                    Ok(block) => debug!("CPU miner found block {}", block.id()),
                    Err(MinerError::StaleHeader) => continue,
                    Err(e) => {
                        warn!("CPU miner stopping: {}", e);
                        miner.mining.store(false, Ordering::SeqCst);
                    }
                }
            }
        });
        *self.cpu_task.lock().await = Some(task);
    }

    pub async fn stop_cpu_mining(&self) {
        if !self.mining.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.cpu_task.lock().await.take() {
            task.abort();
        }
        info!("CPU miner stopped");
    }

    pub async fn close(&self) {
        self.stop_cpu_mining().await;
    }
}
