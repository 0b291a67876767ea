use std::sync::Arc;

use async_trait::async_trait;
use sia_common::api::explorer::{BlockFacts, HashType};
use sia_common::block::{Block, Target};
use sia_common::crypto::Hash;
use sia_common::serializer::{
    read_list, write_list, Reader, ReaderError, Serializer, Writer,
};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::consensus::{ConsensusChange, ConsensusSet, ConsensusSubscriber, ROOT_TARGET};

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("hash not found in any index")]
    HashNotFound,
    #[error("invalid block range")]
    InvalidRange,
    #[error("explorer database error: {0}")]
    Database(#[from] sled::Error),
    #[error("explorer encoding error: {0}")]
    Serialization(#[from] ReaderError),
}

fn encode_ids(ids: &[Hash]) -> Vec<u8> {
    let mut writer = Writer::new();
    write_list(&mut writer, ids);
    writer.bytes()
}

fn decode_ids(bytes: &[u8]) -> Result<Vec<Hash>, ReaderError> {
    let mut reader = Reader::new(bytes);
    read_list(&mut reader)
}

struct ExplorerState {
    blocks_seen: u64,
    // running aggregates carried from the current tip's facts
    totals: BlockFacts,
}

// Read-only hash index over every block the consensus stream has delivered:
// blocks, transactions, output IDs, contract IDs, unlock-hash occurrences,
// and per-height aggregate facts. The view is a pure function of the
// consensus change sequence.
pub struct Explorer {
    consensus: Arc<ConsensusSet>,
    db: sled::Db,
    blocks: sled::Tree,
    heights: sled::Tree,
    transactions: sled::Tree,
    coin_outputs: sled::Tree,
    fund_outputs: sled::Tree,
    contracts: sled::Tree,
    unlock_hashes: sled::Tree,
    facts: sled::Tree,
    state: RwLock<ExplorerState>,
}

fn empty_facts() -> BlockFacts {
    BlockFacts {
        height: 0,
        block_id: Hash::zero(),
        timestamp: 0,
        target: ROOT_TARGET,
        difficulty: 0,
        total_coins: sia_common::currency::Currency::ZERO,
        miner_payout_count: 0,
        transaction_count: 0,
        siacoin_input_count: 0,
        siacoin_output_count: 0,
        file_contract_count: 0,
        file_contract_revision_count: 0,
        storage_proof_count: 0,
        siafund_output_count: 0,
        arbitrary_data_count: 0,
    }
}

impl Explorer {
    pub fn new(consensus: Arc<ConsensusSet>, data_dir: &str) -> Result<Arc<Self>, ExplorerError> {
        let db = sled::open(format!("{}/explorer", data_dir))?;
        Ok(Arc::new(Explorer {
            consensus,
            blocks: db.open_tree("blocks")?,
            heights: db.open_tree("heights")?,
            transactions: db.open_tree("transactions")?,
            coin_outputs: db.open_tree("coin_outputs")?,
            fund_outputs: db.open_tree("fund_outputs")?,
            contracts: db.open_tree("contracts")?,
            unlock_hashes: db.open_tree("unlock_hashes")?,
            facts: db.open_tree("facts")?,
            db,
            state: RwLock::new(ExplorerState {
                blocks_seen: 0,
                totals: empty_facts(),
            }),
        }))
    }

    pub async fn height(&self) -> u64 {
        self.state.read().await.blocks_seen.saturating_sub(1)
    }

    pub async fn latest_facts(&self) -> BlockFacts {
        self.state.read().await.totals.clone()
    }

    pub fn facts_at(&self, height: u64) -> Result<BlockFacts, ExplorerError> {
        match self.facts.get(height.to_be_bytes())? {
            Some(bytes) => Ok(BlockFacts::from_bytes(&bytes)?),
            None => Err(ExplorerError::HashNotFound),
        }
    }

    pub fn block_at(&self, height: u64) -> Result<Block, ExplorerError> {
        let id = self
            .heights
            .get(height.to_be_bytes())?
            .ok_or(ExplorerError::HashNotFound)?;
        let bytes = self.blocks.get(&id)?.ok_or(ExplorerError::HashNotFound)?;
        let mut reader = Reader::new(&bytes);
        let block = Block::read(&mut reader)?;
        Ok(block)
    }

    pub fn block(&self, id: &Hash) -> Result<(Block, u64), ExplorerError> {
        let bytes = self
            .blocks
            .get(id.as_bytes())?
            .ok_or(ExplorerError::HashNotFound)?;
        let mut reader = Reader::new(&bytes);
        let block = Block::read(&mut reader)?;
        let height = reader.read_u64()?;
        Ok((block, height))
    }

    // Which ID space a 32-byte hash belongs to. The unlock-hash bucket is
    // deliberately checked last: unlock hashes carry no collision guarantee
    // against real IDs and must never shadow them.
    pub fn hash_type(&self, hash: &Hash) -> Result<HashType, ExplorerError> {
        let key = hash.as_bytes();
        if self.blocks.contains_key(key)? {
            return Ok(HashType::BlockId);
        }
        if self.transactions.contains_key(key)? {
            return Ok(HashType::TransactionId);
        }
        if self.coin_outputs.contains_key(key)? {
            return Ok(HashType::SiacoinOutputId);
        }
        if self.contracts.contains_key(key)? {
            return Ok(HashType::FileContractId);
        }
        if self.fund_outputs.contains_key(key)? {
            return Ok(HashType::SiafundOutputId);
        }
        if self.unlock_hashes.contains_key(key)? {
            return Ok(HashType::UnlockHash);
        }
        Err(ExplorerError::HashNotFound)
    }

    // block ID containing a transaction
    pub fn transaction_block(&self, id: &Hash) -> Result<Hash, ExplorerError> {
        let bytes = self
            .transactions
            .get(id.as_bytes())?
            .ok_or(ExplorerError::HashNotFound)?;
        let raw: [u8; 32] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| ExplorerError::HashNotFound)?;
        Ok(Hash::new(raw))
    }

    fn ids_in(&self, tree: &sled::Tree, key: &Hash) -> Result<Vec<Hash>, ExplorerError> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(decode_ids(&bytes)?),
            None => Err(ExplorerError::HashNotFound),
        }
    }

    pub fn coin_output_transactions(&self, id: &Hash) -> Result<Vec<Hash>, ExplorerError> {
        self.ids_in(&self.coin_outputs, id)
    }

    pub fn fund_output_transactions(&self, id: &Hash) -> Result<Vec<Hash>, ExplorerError> {
        self.ids_in(&self.fund_outputs, id)
    }

    pub fn contract_history(&self, id: &Hash) -> Result<Vec<Hash>, ExplorerError> {
        self.ids_in(&self.contracts, id)
    }

    pub fn unlock_hash_transactions(&self, id: &Hash) -> Result<Vec<Hash>, ExplorerError> {
        self.ids_in(&self.unlock_hashes, id)
    }

    fn append_id(&self, tree: &sled::Tree, key: &Hash, id: &Hash) -> Result<(), ExplorerError> {
        let mut ids = match tree.get(key.as_bytes())? {
            Some(bytes) => decode_ids(&bytes)?,
            None => Vec::new(),
        };
        if !ids.contains(id) {
            ids.push(id.clone());
        }
        tree.insert(key.as_bytes(), encode_ids(&ids))?;
        Ok(())
    }

    fn remove_id(&self, tree: &sled::Tree, key: &Hash, id: &Hash) -> Result<(), ExplorerError> {
        let Some(bytes) = tree.get(key.as_bytes())? else {
            return Ok(());
        };
        let mut ids = decode_ids(&bytes)?;
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            tree.remove(key.as_bytes())?;
        } else {
            tree.insert(key.as_bytes(), encode_ids(&ids))?;
        }
        Ok(())
    }

    // walk one transaction's hashes into (or out of) every index
    fn index_transaction(
        &self,
        txn: &sia_common::transaction::Transaction,
        block_id: &Hash,
        apply: bool,
    ) -> Result<(), ExplorerError> {
        let txid = txn.id();
        if apply {
            self.transactions.insert(txid.as_bytes(), block_id.as_bytes())?;
        } else {
            self.transactions.remove(txid.as_bytes())?;
        }

        let mut touch = |tree: &sled::Tree, key: &Hash| -> Result<(), ExplorerError> {
            if apply {
                self.append_id(tree, key, &txid)
            } else {
                self.remove_id(tree, key, &txid)
            }
        };

        for input in &txn.siacoin_inputs {
            touch(&self.coin_outputs, &input.parent_id)?;
            touch(
                &self.unlock_hashes,
                input.unlock_conditions.unlock_hash().as_hash(),
            )?;
        }
        for (index, output) in txn.siacoin_outputs.iter().enumerate() {
            touch(&self.coin_outputs, &txn.siacoin_output_id(index as u64))?;
            touch(&self.unlock_hashes, output.unlock_hash.as_hash())?;
        }
        for input in &txn.siafund_inputs {
            touch(&self.fund_outputs, &input.parent_id)?;
            touch(
                &self.unlock_hashes,
                input.unlock_conditions.unlock_hash().as_hash(),
            )?;
        }
        for (index, output) in txn.siafund_outputs.iter().enumerate() {
            touch(&self.fund_outputs, &txn.siafund_output_id(index as u64))?;
            touch(&self.unlock_hashes, output.unlock_hash.as_hash())?;
        }
        for (index, _) in txn.file_contracts.iter().enumerate() {
            touch(&self.contracts, &txn.file_contract_id(index as u64))?;
        }
        for revision in &txn.file_contract_revisions {
            touch(&self.contracts, &revision.parent_id)?;
        }
        for proof in &txn.storage_proofs {
            touch(&self.contracts, &proof.parent_id)?;
        }
        Ok(())
    }

    fn apply_block(&self, block: &Block, totals: &mut BlockFacts) -> Result<(), ExplorerError> {
        let block_id = block.id();
        let height = totals.height + if totals.block_id.is_zero() { 0 } else { 1 };

        let mut writer = Writer::new();
        block.write(&mut writer);
        writer.write_u64(height);
        self.blocks.insert(block_id.as_bytes(), writer.bytes())?;
        self.heights.insert(height.to_be_bytes(), block_id.as_bytes())?;

        for txn in &block.transactions {
            self.index_transaction(txn, &block_id, true)?;
        }
        for (index, payout) in block.miner_payouts.iter().enumerate() {
            self.append_id(
                &self.coin_outputs,
                &block.miner_payout_id(index as u64),
                &block_id,
            )?;
            self.append_id(&self.unlock_hashes, payout.unlock_hash.as_hash(), &block_id)?;
        }

        totals.height = height;
        totals.block_id = block_id;
        totals.timestamp = block.timestamp;
        totals.miner_payout_count += block.miner_payouts.len() as u64;
        totals.transaction_count += block.transactions.len() as u64;
        for txn in &block.transactions {
            totals.siacoin_input_count += txn.siacoin_inputs.len() as u64;
            totals.siacoin_output_count += txn.siacoin_outputs.len() as u64;
            totals.file_contract_count += txn.file_contracts.len() as u64;
            totals.file_contract_revision_count += txn.file_contract_revisions.len() as u64;
            totals.storage_proof_count += txn.storage_proofs.len() as u64;
            totals.siafund_output_count += txn.siafund_outputs.len() as u64;
            totals.arbitrary_data_count += txn.arbitrary_data.len() as u64;
        }
        totals.total_coins = block
            .miner_payouts
            .iter()
            .map(|payout| payout.value)
            .fold(totals.total_coins, |acc, value| {
                acc.checked_add(value).unwrap_or(acc)
            });

        self.facts.insert(height.to_be_bytes(), totals.to_bytes())?;
        Ok(())
    }

    fn revert_block(&self, block: &Block) -> Result<(), ExplorerError> {
        let block_id = block.id();
        let (_, height) = self.block(&block_id)?;

        for txn in &block.transactions {
            self.index_transaction(txn, &block_id, false)?;
        }
        for (index, payout) in block.miner_payouts.iter().enumerate() {
            self.remove_id(
                &self.coin_outputs,
                &block.miner_payout_id(index as u64),
                &block_id,
            )?;
            self.remove_id(&self.unlock_hashes, payout.unlock_hash.as_hash(), &block_id)?;
        }

        self.blocks.remove(block_id.as_bytes())?;
        self.heights.remove(height.to_be_bytes())?;
        self.facts.remove(height.to_be_bytes())?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), ExplorerError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl ConsensusSubscriber for Explorer {
    fn name(&self) -> &'static str {
        "explorer"
    }

    async fn process_consensus_change(&self, change: Arc<ConsensusChange>) {
        let mut state = self.state.write().await;

        for block in &change.reverted_blocks {
            if let Err(e) = self.revert_block(block) {
                error!("Explorer failed to revert block {}: {}", block.id(), e);
            }
            state.blocks_seen = state.blocks_seen.saturating_sub(1);
        }
        if !change.reverted_blocks.is_empty() {
            // rewind the running totals to the surviving tip
            let height = state.blocks_seen.saturating_sub(1);
            state.totals = self.facts_at(height).unwrap_or_else(|_| empty_facts());
        }

        for block in &change.applied_blocks {
            state.blocks_seen += 1;
            let parent_target = self
                .consensus
                .child_target(&block.parent_id)
                .await
                .unwrap_or(ROOT_TARGET);
            let mut totals = state.totals.clone();
            totals.target = parent_target.clone();
            totals.difficulty = totals.difficulty.saturating_add(saturating_difficulty(
                &parent_target,
            ));
            if let Err(e) = self.apply_block(block, &mut totals) {
                error!("Explorer failed to index block {}: {}", block.id(), e);
            }
            state.totals = totals;
        }
    }
}

fn saturating_difficulty(target: &Target) -> u128 {
    let difficulty = target.difficulty();
    if difficulty > primitive_types::U256::from(u128::MAX) {
        u128::MAX
    } else {
        difficulty.as_u128()
    }
}
