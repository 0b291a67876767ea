mod changes;
mod database;
mod subscribe;
mod validate;

pub use changes::{
    BlockDiffs, ConsensusChange, DiffDirection, FileContractDiff, SiacoinOutputDiff,
    SiafundOutputDiff,
};
pub use subscribe::ConsensusSubscriber;
pub use validate::block_subsidy;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use primitive_types::U256;
use sia_common::block::{Block, Target};
use sia_common::config::{
    FUTURE_THRESHOLD, MAX_BLOCK_SIZE, MAX_BLOCKS_REQUEST, MEDIAN_TIMESTAMP_WINDOW, TARGET_WINDOW,
};
use sia_common::crypto::Hash;
use sia_common::serializer::{Reader, ReaderError, Serializer, Writer};
use sia_common::transaction::Transaction;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::{CONSENSUS_CHANGE_BEGINNING, GENESIS_TIMESTAMP};
use crate::gateway::{Gateway, GatewayError};
use database::ConsensusDb;
use subscribe::SubscriberList;

// Initial proof-of-work threshold; roughly one in sixteen hashes qualifies,
// which keeps test networks minable on a single CPU core
pub const ROOT_TARGET: Target = {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x10;
    Target::new(bytes)
};

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("block already known")]
    BlockKnown,
    #[error("block is an orphan, parent unknown")]
    Orphan,
    #[error("block was previously found invalid")]
    DoSBlock,
    #[error("block timestamp is too far in the future")]
    FutureTimestamp,
    #[error("block timestamp is earlier than the median of its ancestors")]
    EarlyTimestamp,
    #[error("block does not meet its proof-of-work target")]
    UnsolvedBlock,
    #[error("block exceeds the maximum block size")]
    OversizedBlock,
    #[error("block is valid but does not extend the heaviest chain")]
    NonExtending,
    #[error("transaction references a nonexistent or spent output")]
    MissingOutput,
    #[error("unlock conditions do not hash to the output's unlock hash")]
    WrongUnlockConditions,
    #[error("input timelock has not expired")]
    PrematureInput,
    #[error("transaction carries insufficient valid signatures")]
    MissingSignatures,
    #[error("transaction signature does not verify")]
    InvalidSignature,
    #[error("transaction inputs and outputs do not balance")]
    CoinMismatch,
    #[error("file contract is malformed")]
    InvalidContract,
    #[error("revision references an unknown file contract")]
    UnknownContract,
    #[error("revision number does not increase")]
    LateRevision,
    #[error("revision payouts do not preserve the contract payout")]
    InvalidRevision,
    #[error("storage proof is outside the contract's proof window")]
    ProofOutsideWindow,
    #[error("miner payouts do not match subsidy plus fees")]
    BadMinerPayout,
    #[error("unknown consensus change ID")]
    InvalidConsensusChangeID,
    #[error("no peers available for synchronization")]
    NoPeers,
    #[error("consensus database error: {0}")]
    Database(#[from] sled::Error),
    #[error("consensus encoding error: {0}")]
    Serialization(#[from] ReaderError),
    #[error("consensus database is corrupt")]
    CorruptDatabase,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("consensus invariant violated: {0}")]
    InvariantViolated(&'static str),
}

// Log-and-panic in debug builds, typed error in release. Used for states
// that indicate a programming error rather than bad input.
#[macro_export]
macro_rules! assert_invariant {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            if cfg!(debug_assertions) {
                log::error!("invariant violated: {}", $msg);
                panic!("invariant violated: {}", $msg);
            }
            return Err($crate::consensus::ConsensusError::InvariantViolated($msg).into());
        }
    };
}

// A block plus everything needed to evaluate and undo it: its height, the
// cumulative work of its chain, the target its children must meet, and the
// state diffs it generated (present once the block has been applied).
#[derive(Clone, Debug)]
pub struct BlockNode {
    pub block: Block,
    pub height: u64,
    pub depth: U256,
    pub child_target: Target,
    pub diffs: Option<BlockDiffs>,
}

impl Serializer for BlockNode {
    fn write(&self, writer: &mut Writer) {
        self.block.write(writer);
        writer.write_u64(self.height);
        writer.write_bytes(&self.depth.to_big_endian());
        self.child_target.write(writer);
        self.diffs.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(BlockNode {
            block: Block::read(reader)?,
            height: reader.read_u64()?,
            depth: U256::from_big_endian(&reader.read_bytes_32()?),
            child_target: Target::read(reader)?,
            diffs: Option::read(reader)?,
        })
    }
}

// The in-memory view of the canonical chain, rebuilt from the durable
// change log at startup. All mutation happens under the consensus set's
// write discipline.
pub(crate) struct ChainState {
    pub blocks: HashMap<Hash, BlockNode>,
    // canonical chain, indexed by height
    pub path: Vec<Hash>,
    pub siacoin_outputs: HashMap<Hash, sia_common::transaction::SiacoinOutput>,
    pub siafund_outputs: HashMap<Hash, sia_common::transaction::SiafundOutput>,
    pub file_contracts: HashMap<Hash, sia_common::transaction::FileContract>,
    pub dos_blocks: HashSet<Hash>,
    pub last_change_id: Hash,
}

impl ChainState {
    fn new() -> Self {
        ChainState {
            blocks: HashMap::new(),
            path: Vec::new(),
            siacoin_outputs: HashMap::new(),
            siafund_outputs: HashMap::new(),
            file_contracts: HashMap::new(),
            dos_blocks: HashSet::new(),
            last_change_id: CONSENSUS_CHANGE_BEGINNING,
        }
    }

    pub fn height(&self) -> u64 {
        self.path.len().saturating_sub(1) as u64
    }

    pub fn tip(&self) -> Hash {
        self.path.last().cloned().unwrap_or(Hash::zero())
    }

    fn on_path(&self, node: &BlockNode) -> bool {
        self.path.get(node.height as usize) == Some(&node.block.id())
    }

    // median timestamp of the window ending at (and including) `id`
    fn median_timestamp(&self, id: &Hash) -> u64 {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIMESTAMP_WINDOW);
        let mut cursor = id.clone();
        while let Some(node) = self.blocks.get(&cursor) {
            timestamps.push(node.block.timestamp);
            if timestamps.len() == MEDIAN_TIMESTAMP_WINDOW || node.height == 0 {
                break;
            }
            cursor = node.block.parent_id.clone();
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }

    // Target for children of `parent`: inherited except on retarget
    // boundaries, where the window's observed pace adjusts it.
    fn child_target_for(&self, parent: &BlockNode, child_height: u64) -> Target {
        if child_height == 0 || child_height % TARGET_WINDOW != 0 {
            return parent.child_target.clone();
        }

        // walk back through the window to find its opening timestamp
        let mut cursor = parent.block.id();
        let mut opening = parent.block.timestamp;
        for _ in 0..TARGET_WINDOW.min(parent.height) {
            match self.blocks.get(&cursor) {
                Some(node) => {
                    opening = node.block.timestamp;
                    cursor = node.block.parent_id.clone();
                }
                None => break,
            }
        }

        let elapsed = parent.block.timestamp.saturating_sub(opening);
        let expected = sia_common::config::BLOCK_FREQUENCY * TARGET_WINDOW;
        parent.child_target.retarget(elapsed, expected)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// The genesis block is fixed so every node starts from the same state
pub fn genesis_block() -> Block {
    Block {
        parent_id: Hash::zero(),
        nonce: 0,
        timestamp: GENESIS_TIMESTAMP,
        miner_payouts: Vec::new(),
        transactions: Vec::new(),
    }
}

// Authoritative blockchain state machine. Accepts blocks, resolves reorgs,
// and feeds the ordered consensus change stream that every other module
// subscribes to.
pub struct ConsensusSet {
    gateway: Arc<Gateway>,
    db: ConsensusDb,
    state: RwLock<ChainState>,
    // serializes mutation + publication so subscribers always observe the
    // state belonging to the change being delivered
    accept_lock: Mutex<()>,
    subscribers: SubscriberList,
    synced: AtomicBool,
}

impl ConsensusSet {
    pub fn new(gateway: Arc<Gateway>, data_dir: &str) -> Result<Arc<Self>, ConsensusError> {
        let db = ConsensusDb::open(data_dir)?;
        let mut state = ChainState::new();

        // load every block node ever seen, side chains included
        for node in db.all_block_nodes()? {
            state.blocks.insert(node.block.id(), node);
        }

        if state.blocks.is_empty() {
            let genesis = genesis_block();
            let genesis_id = genesis.id();
            let node = BlockNode {
                block: genesis.clone(),
                height: 0,
                depth: ROOT_TARGET.difficulty(),
                child_target: ROOT_TARGET,
                diffs: Some(BlockDiffs::default()),
            };
            db.store_block_node(&node)?;
            db.set_path(0, &genesis_id)?;
            state.blocks.insert(genesis_id.clone(), node);
            state.path.push(genesis_id);

            let change = ConsensusChange {
                id: ConsensusChange::derive_id(&CONSENSUS_CHANGE_BEGINNING, &[], &[genesis.clone()]),
                prev: CONSENSUS_CHANGE_BEGINNING,
                reverted_blocks: Vec::new(),
                applied_blocks: vec![genesis],
                synced: false,
                siacoin_diffs: Vec::new(),
                siafund_diffs: Vec::new(),
                contract_diffs: Vec::new(),
            };
            db.append_change(&change)?;
            state.last_change_id = change.id;
            info!("Initialized new consensus database at genesis");
        } else {
            // replay the change log to rebuild the canonical view
            let mut cursor = CONSENSUS_CHANGE_BEGINNING;
            while let Some(next_id) = db.next_of(&cursor)? {
                let change = db.change(&next_id)?.ok_or(ConsensusError::CorruptDatabase)?;
                for _ in &change.reverted_blocks {
                    state.path.pop();
                }
                for block in &change.applied_blocks {
                    state.path.push(block.id());
                }
                state.apply_change_diffs(&change);
                cursor = next_id;
            }
            state.last_change_id = cursor;
            info!(
                "Loaded consensus database, height {} tip {}",
                state.height(),
                state.tip()
            );
        }

        Ok(Arc::new(ConsensusSet {
            gateway,
            db,
            state: RwLock::new(state),
            accept_lock: Mutex::new(()),
            subscribers: SubscriberList::new(),
            synced: AtomicBool::new(false),
        }))
    }

    pub async fn current_tip(&self) -> Hash {
        self.state.read().await.tip()
    }

    pub async fn height(&self) -> u64 {
        self.state.read().await.height()
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub async fn child_target(&self, id: &Hash) -> Option<Target> {
        self.state
            .read()
            .await
            .blocks
            .get(id)
            .map(|node| node.child_target.clone())
    }

    pub async fn block_at_height(&self, height: u64) -> Option<Block> {
        let state = self.state.read().await;
        let id = state.path.get(height as usize)?;
        state.blocks.get(id).map(|node| node.block.clone())
    }

    pub async fn block(&self, id: &Hash) -> Option<(Block, u64)> {
        let state = self.state.read().await;
        state
            .blocks
            .get(id)
            .filter(|node| state.on_path(node))
            .map(|node| (node.block.clone(), node.height))
    }

    // Validate and integrate a block. On success the change is durably
    // logged and delivered to every subscriber before this returns, so the
    // accept path back-pressures on the slowest subscriber by design.
    pub async fn accept_block(&self, block: Block) -> Result<(), ConsensusError> {
        let _guard = self.accept_lock.lock().await;

        let change = {
            let mut state = self.state.write().await;
            self.integrate_block(&mut state, block)?
        };

        self.subscribers.publish(Arc::new(change)).await;
        Ok(())
    }

    fn integrate_block(
        &self,
        state: &mut ChainState,
        block: Block,
    ) -> Result<ConsensusChange, ConsensusError> {
        let id = block.id();
        if state.dos_blocks.contains(&id) {
            return Err(ConsensusError::DoSBlock);
        }
        if state.blocks.contains_key(&id) {
            return Err(ConsensusError::BlockKnown);
        }
        if block.size() > MAX_BLOCK_SIZE {
            return Err(ConsensusError::OversizedBlock);
        }

        let parent = state
            .blocks
            .get(&block.parent_id)
            .cloned()
            .ok_or(ConsensusError::Orphan)?;

        if !parent.child_target.meets(&id) {
            return Err(ConsensusError::UnsolvedBlock);
        }
        if block.timestamp > unix_now() + FUTURE_THRESHOLD {
            return Err(ConsensusError::FutureTimestamp);
        }
        if block.timestamp < state.median_timestamp(&block.parent_id) {
            return Err(ConsensusError::EarlyTimestamp);
        }

        let height = parent.height + 1;
        let node = BlockNode {
            depth: Target::add_difficulty(parent.depth, &parent.child_target),
            child_target: state.child_target_for(&parent, height),
            block,
            height,
            diffs: None,
        };

        let current_tip_depth = state
            .blocks
            .get(&state.tip())
            .map(|n| n.depth)
            .unwrap_or_default();

        state.blocks.insert(id.clone(), node.clone());
        self.db.store_block_node(&node)?;

        if node.depth <= current_tip_depth {
            debug!("Block {} extends a side chain at height {}", id, height);
            return Err(ConsensusError::NonExtending);
        }

        // the new block is the heaviest tip; move the canonical path to it
        let change = match self.reorganize(state, id.clone()) {
            Ok(change) => change,
            Err(e) => {
                // validation failures during connect are permanent
                warn!("Block {} rejected during connect: {}", id, e);
                state.blocks.remove(&id);
                state.dos_blocks.insert(id.clone());
                self.db.remove_block_node(&id)?;
                return Err(e);
            }
        };

        self.db.append_change(&change)?;
        state.last_change_id = change.id.clone();
        Ok(change)
    }

    // Move the canonical path to `new_tip`. Either fully succeeds or leaves
    // the state exactly as it was.
    fn reorganize(
        &self,
        state: &mut ChainState,
        new_tip: Hash,
    ) -> Result<ConsensusChange, ConsensusError> {
        // collect the new branch back to the common ancestor
        let mut branch: Vec<Hash> = Vec::new();
        let mut cursor = new_tip;
        loop {
            let node = state
                .blocks
                .get(&cursor)
                .ok_or(ConsensusError::CorruptDatabase)?;
            if state.on_path(node) {
                break;
            }
            branch.push(cursor.clone());
            cursor = node.block.parent_id.clone();
        }
        branch.reverse();
        let ancestor_height = state
            .blocks
            .get(&cursor)
            .map(|n| n.height)
            .ok_or(ConsensusError::CorruptDatabase)?;

        // revert everything above the ancestor, tip first
        let mut reverted_nodes: Vec<BlockNode> = Vec::new();
        while state.height() > ancestor_height {
            let tip_id = state.tip();
            let node = state
                .blocks
                .get(&tip_id)
                .cloned()
                .ok_or(ConsensusError::CorruptDatabase)?;
            state.revert_block(&node)?;
            reverted_nodes.push(node);
        }

        // apply the new branch, parent first; on failure undo and restore
        let mut applied_nodes: Vec<BlockNode> = Vec::new();
        let mut failure: Option<ConsensusError> = None;
        for block_id in &branch {
            let block = state
                .blocks
                .get(block_id)
                .map(|n| n.block.clone())
                .ok_or(ConsensusError::CorruptDatabase)?;
            match state.apply_block(&block) {
                Ok(diffs) => {
                    let node = state
                        .blocks
                        .get_mut(block_id)
                        .ok_or(ConsensusError::CorruptDatabase)?;
                    node.diffs = Some(diffs);
                    let node = node.clone();
                    self.db.store_block_node(&node)?;
                    applied_nodes.push(node);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            // roll the partial application back and restore the old chain
            for node in applied_nodes.iter().rev() {
                state.revert_block(node)?;
            }
            for node in reverted_nodes.iter().rev() {
                let diffs = node
                    .diffs
                    .clone()
                    .ok_or(ConsensusError::CorruptDatabase)?;
                state.reapply_block(node, &diffs);
            }
            return Err(e);
        }

        // persist the new canonical path
        self.db.truncate_path(ancestor_height + 1)?;
        for node in &applied_nodes {
            self.db.set_path(node.height, &node.block.id())?;
        }

        // aggregate diffs: reverts first (inverted, reverse order), then
        // applies in block order
        let mut change = ConsensusChange {
            id: Hash::zero(),
            prev: state.last_change_id.clone(),
            reverted_blocks: reverted_nodes.iter().map(|n| n.block.clone()).collect(),
            applied_blocks: applied_nodes.iter().map(|n| n.block.clone()).collect(),
            synced: self.is_synced(),
            siacoin_diffs: Vec::new(),
            siafund_diffs: Vec::new(),
            contract_diffs: Vec::new(),
        };
        for node in &reverted_nodes {
            if let Some(diffs) = &node.diffs {
                for diff in diffs.siacoin_diffs.iter().rev() {
                    change.siacoin_diffs.push(SiacoinOutputDiff {
                        direction: diff.direction.inverse(),
                        id: diff.id.clone(),
                        output: diff.output.clone(),
                    });
                }
                for diff in diffs.siafund_diffs.iter().rev() {
                    change.siafund_diffs.push(SiafundOutputDiff {
                        direction: diff.direction.inverse(),
                        id: diff.id.clone(),
                        output: diff.output.clone(),
                    });
                }
                for diff in diffs.contract_diffs.iter().rev() {
                    change.contract_diffs.push(FileContractDiff {
                        direction: diff.direction.inverse(),
                        id: diff.id.clone(),
                        contract: diff.contract.clone(),
                    });
                }
            }
        }
        for node in &applied_nodes {
            if let Some(diffs) = &node.diffs {
                change.siacoin_diffs.extend(diffs.siacoin_diffs.iter().cloned());
                change.siafund_diffs.extend(diffs.siafund_diffs.iter().cloned());
                change
                    .contract_diffs
                    .extend(diffs.contract_diffs.iter().cloned());
            }
        }

        change.id =
            ConsensusChange::derive_id(&change.prev, &change.reverted_blocks, &change.applied_blocks);

        if !change.reverted_blocks.is_empty() {
            info!(
                "Reorganized: reverted {} blocks, applied {} blocks, new tip {}",
                change.reverted_blocks.len(),
                change.applied_blocks.len(),
                state.tip()
            );
        }

        Ok(change)
    }

    // Register a subscriber and deliver every change after `from_id` in
    // order. `Beginning` replays the whole stream. Catch-up and the
    // registration happen under the publish lock so the sequence is gap-free
    // and duplicate-free.
    pub async fn subscribe(
        &self,
        subscriber: Arc<dyn ConsensusSubscriber>,
        from_id: Hash,
    ) -> Result<(), ConsensusError> {
        if from_id != CONSENSUS_CHANGE_BEGINNING && self.db.change(&from_id)?.is_none() {
            return Err(ConsensusError::InvalidConsensusChangeID);
        }

        let changes = |cursor: &Hash| -> Result<Option<ConsensusChange>, ConsensusError> {
            match self.db.next_of(cursor)? {
                Some(next_id) => Ok(Some(
                    self.db
                        .change(&next_id)?
                        .ok_or(ConsensusError::CorruptDatabase)?,
                )),
                None => Ok(None),
            }
        };

        self.subscribers.subscribe(subscriber, from_id, changes).await
    }

    pub fn get_consensus_change(
        &self,
        id: &Hash,
    ) -> Result<(ConsensusChange, Option<Hash>), ConsensusError> {
        let change = if *id == CONSENSUS_CHANGE_BEGINNING {
            let first = self
                .db
                .next_of(&CONSENSUS_CHANGE_BEGINNING)?
                .ok_or(ConsensusError::InvalidConsensusChangeID)?;
            self.db
                .change(&first)?
                .ok_or(ConsensusError::CorruptDatabase)?
        } else {
            self.db
                .change(id)?
                .ok_or(ConsensusError::InvalidConsensusChangeID)?
        };
        let next = self.db.next_of(&change.id)?;
        Ok((change, next))
    }

    // Answer a peer's request: blocks on the canonical path after the most
    // recent ID in `known` that we recognize.
    pub async fn blocks_after(&self, known: Vec<Hash>) -> (Vec<Block>, bool) {
        let state = self.state.read().await;
        let mut start_height = 0u64;
        for id in &known {
            if let Some(node) = state.blocks.get(id) {
                if state.on_path(node) {
                    start_height = node.height + 1;
                    break;
                }
            }
        }

        let mut blocks = Vec::new();
        let mut height = start_height;
        while blocks.len() < MAX_BLOCKS_REQUEST as usize {
            match state.path.get(height as usize) {
                Some(id) => match state.blocks.get(id) {
                    Some(node) => blocks.push(node.block.clone()),
                    None => break,
                },
                None => break,
            }
            height += 1;
        }
        let more = (height as usize) < state.path.len();
        (blocks, more)
    }

    // IDs describing our chain for a GetBlocks request: dense near the tip,
    // then exponentially sparse back to genesis
    pub async fn block_history(&self) -> Vec<Hash> {
        let state = self.state.read().await;
        let height = state.height();
        let mut history = Vec::new();
        let mut step = 1u64;
        let mut offset = 0u64;
        while history.len() < 32 {
            let h = height.saturating_sub(offset);
            if let Some(id) = state.path.get(h as usize) {
                history.push(id.clone());
            }
            if h == 0 {
                break;
            }
            offset += step;
            if history.len() > 10 {
                step *= 2;
            }
        }
        history
    }

    // Block until the local chain has caught up with `peer`, or fail. The
    // peer defaults to the first connected one.
    pub async fn synchronize(&self, peer_addr: Option<&str>) -> Result<(), ConsensusError> {
        loop {
            let peer = match peer_addr {
                Some(addr) => self.gateway.peer(addr).await,
                None => self.gateway.first_peer().await,
            }
            .ok_or(ConsensusError::NoPeers)?;

            let known = self.block_history().await;
            let (blocks, more) = peer.request_blocks(known).await?;

            let mut progressed = false;
            for block in blocks {
                match self.accept_block(block).await {
                    Ok(()) => progressed = true,
                    // both are expected while replaying shared history
                    Err(ConsensusError::BlockKnown) | Err(ConsensusError::NonExtending) => {}
                    Err(e) => {
                        self.gateway.ban(peer.addr()).await;
                        return Err(e);
                    }
                }
            }

            if !more {
                break;
            }
            if !progressed {
                // the peer keeps promising more but sends nothing new
                return Err(ConsensusError::NoPeers);
            }
        }
        self.set_synced(true);
        Ok(())
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    // Lightweight copy of the spendable state for dry-run validation: the
    // UTXO views and active contracts at the current tip, without the block
    // index
    pub(crate) async fn state_snapshot(&self) -> (ChainState, u64) {
        let state = self.state.read().await;
        let scratch = ChainState {
            blocks: HashMap::new(),
            path: Vec::new(),
            siacoin_outputs: state.siacoin_outputs.clone(),
            siafund_outputs: state.siafund_outputs.clone(),
            file_contracts: state.file_contracts.clone(),
            dos_blocks: HashSet::new(),
            last_change_id: state.last_change_id.clone(),
        };
        (scratch, state.height())
    }

    // Dry-run a transaction set against the current tip; nothing is mutated
    pub async fn validate_transaction_set(
        &self,
        set: &[Transaction],
    ) -> Result<(), ConsensusError> {
        let (mut scratch, height) = self.state_snapshot().await;
        let mut diffs = BlockDiffs::default();
        for txn in set {
            scratch.apply_transaction(txn, height + 1, &mut diffs)?;
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<(), ConsensusError> {
        self.subscribers.close().await;
        self.db.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sia_common::currency::Currency;
    use sia_common::transaction::SiacoinOutput;
    use sia_common::unlock::UnlockHash;
    use tempdir::TempDir;

    async fn test_consensus(name: &str) -> (TempDir, Arc<ConsensusSet>) {
        let dir = TempDir::new(name).unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        let gateway = Gateway::new("127.0.0.1:0", &data_dir).unwrap();
        let consensus = ConsensusSet::new(gateway, &data_dir).unwrap();
        (dir, consensus)
    }

    // assemble a valid child block and grind its nonce against the target
    async fn solve_block(consensus: &ConsensusSet, parent_id: Hash, height: u64) -> Block {
        let parent_timestamp = {
            // walk by height for main-chain parents, fall back to genesis time
            consensus
                .block(&parent_id)
                .await
                .map(|(block, _)| block.timestamp)
                .unwrap_or(GENESIS_TIMESTAMP)
        };
        let mut block = Block {
            parent_id,
            nonce: 0,
            timestamp: parent_timestamp + 1,
            miner_payouts: vec![SiacoinOutput {
                value: validate::block_subsidy(height),
                unlock_hash: UnlockHash::zero(),
            }],
            transactions: Vec::new(),
        };
        while !ROOT_TARGET.meets(&block.id()) {
            block.nonce += 1;
        }
        block
    }

    #[tokio::test]
    async fn test_accept_extends_chain() {
        let (_dir, consensus) = test_consensus("cs-extend").await;
        assert_eq!(consensus.height().await, 0);

        let genesis_id = consensus.current_tip().await;
        let block = solve_block(&consensus, genesis_id, 1).await;
        let block_id = block.id();
        consensus.accept_block(block).await.unwrap();

        assert_eq!(consensus.height().await, 1);
        assert_eq!(consensus.current_tip().await, block_id);
    }

    #[tokio::test]
    async fn test_duplicate_and_orphan_blocks() {
        let (_dir, consensus) = test_consensus("cs-dup").await;
        let genesis_id = consensus.current_tip().await;

        let block = solve_block(&consensus, genesis_id, 1).await;
        consensus.accept_block(block.clone()).await.unwrap();
        assert!(matches!(
            consensus.accept_block(block).await,
            Err(ConsensusError::BlockKnown)
        ));

        let orphan = solve_block(&consensus, Hash::max(), 9).await;
        assert!(matches!(
            consensus.accept_block(orphan).await,
            Err(ConsensusError::Orphan)
        ));
    }

    #[tokio::test]
    async fn test_reorg_moves_to_heavier_chain() {
        let (_dir, consensus) = test_consensus("cs-reorg").await;
        let genesis_id = consensus.current_tip().await;

        // main chain: one block
        let main = solve_block(&consensus, genesis_id.clone(), 1).await;
        consensus.accept_block(main.clone()).await.unwrap();

        // side chain: two blocks from genesis; first is non-extending. The
        // timestamp nudge keeps it distinct from the main block, which was
        // solved from identical inputs.
        let mut side_one = solve_block(&consensus, genesis_id, 1).await;
        side_one.timestamp += 1;
        while !ROOT_TARGET.meets(&side_one.id()) {
            side_one.nonce += 1;
        }
        assert!(matches!(
            consensus.accept_block(side_one.clone()).await,
            Err(ConsensusError::NonExtending)
        ));

        let mut side_two = Block {
            parent_id: side_one.id(),
            nonce: 0,
            timestamp: side_one.timestamp + 1,
            miner_payouts: vec![SiacoinOutput {
                value: validate::block_subsidy(2),
                unlock_hash: UnlockHash::zero(),
            }],
            transactions: Vec::new(),
        };
        while !ROOT_TARGET.meets(&side_two.id()) {
            side_two.nonce += 1;
        }
        consensus.accept_block(side_two.clone()).await.unwrap();

        assert_eq!(consensus.height().await, 2);
        assert_eq!(consensus.current_tip().await, side_two.id());

        // the reorg change reverts the main block and applies both side
        // blocks, never split across changes
        let mut cursor = CONSENSUS_CHANGE_BEGINNING;
        let mut last = None;
        loop {
            let (change, next) = consensus.get_consensus_change(&cursor).unwrap();
            match next {
                Some(next) => cursor = next,
                None => {
                    last = Some(change);
                    break;
                }
            }
        }
        let last = last.unwrap();
        assert_eq!(last.reverted_blocks.len(), 1);
        assert_eq!(last.reverted_blocks[0].id(), main.id());
        assert_eq!(last.applied_blocks.len(), 2);
        assert_eq!(last.applied_blocks[0].id(), side_one.id());
        assert_eq!(last.applied_blocks[1].id(), side_two.id());
    }

    #[tokio::test]
    async fn test_bad_miner_payout_is_permanent() {
        let (_dir, consensus) = test_consensus("cs-payout").await;
        let genesis_id = consensus.current_tip().await;

        let mut block = solve_block(&consensus, genesis_id, 1).await;
        block.miner_payouts[0].value = Currency::from_coins(1);
        // the payout change invalidated the solve
        while !ROOT_TARGET.meets(&block.id()) {
            block.nonce += 1;
        }

        assert!(matches!(
            consensus.accept_block(block.clone()).await,
            Err(ConsensusError::BadMinerPayout)
        ));
        // a rejected block is remembered and refused outright
        assert!(matches!(
            consensus.accept_block(block).await,
            Err(ConsensusError::DoSBlock)
        ));
    }
}
