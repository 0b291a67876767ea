use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use sia_common::config::MAX_TRANSACTION_SIZE;
use sia_common::crypto::{hash, Hash};
use sia_common::serializer::{Serializer, Writer};
use sia_common::transaction::Transaction;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::consensus::{
    BlockDiffs, ConsensusChange, ConsensusError, ConsensusSet, ConsensusSubscriber,
};
use crate::gateway::Gateway;

#[derive(Error, Debug)]
pub enum TPoolError {
    #[error("transaction set is empty")]
    EmptySet,
    #[error("transaction exceeds the maximum transaction size")]
    OversizedTransaction,
    #[error("transaction set already in pool")]
    DuplicateSet,
    #[error("transaction already in pool")]
    DuplicateTransaction,
    #[error("transaction not found in pool")]
    TransactionNotFound,
    #[error("invalid transaction set: {0}")]
    Invalid(#[from] ConsensusError),
}

// A parent-closed cluster accepted into the pool, the unit the pool's diff
// stream speaks in
#[derive(Clone, Debug)]
pub struct AppliedSet {
    pub id: Hash,
    pub transactions: Vec<Transaction>,
}

// Reverts always listed before applies; subscribers rely on that order
#[derive(Clone, Debug, Default)]
pub struct TransactionPoolDiff {
    pub reverted_sets: Vec<Hash>,
    pub applied_sets: Vec<AppliedSet>,
}

#[async_trait]
pub trait TransactionPoolSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_pool_diff(&self, diff: Arc<TransactionPoolDiff>);
}

struct PoolState {
    // set ID -> member transactions, in acceptance order
    sets: IndexMap<Hash, Vec<Transaction>>,
    // transaction ID -> owning set
    by_txn: HashMap<Hash, Hash>,
}

impl PoolState {
    fn contains_txn(&self, id: &Hash) -> bool {
        self.by_txn.contains_key(id)
    }
}

fn set_id(transactions: &[Transaction]) -> Hash {
    let mut writer = Writer::new();
    for txn in transactions {
        writer.write_hash(&txn.id());
    }
    hash(writer.as_bytes())
}

// The unconfirmed transaction set, kept consistent with the consensus tip.
// Every pooled transaction is valid against the tip plus the pool contents
// that precede it.
pub struct TransactionPool {
    consensus: Arc<ConsensusSet>,
    gateway: Arc<Gateway>,
    state: RwLock<PoolState>,
    subscribers: Mutex<Vec<Arc<dyn TransactionPoolSubscriber>>>,
}

impl TransactionPool {
    pub fn new(consensus: Arc<ConsensusSet>, gateway: Arc<Gateway>) -> Arc<Self> {
        Arc::new(TransactionPool {
            consensus,
            gateway,
            state: RwLock::new(PoolState {
                sets: IndexMap::new(),
                by_txn: HashMap::new(),
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn TransactionPoolSubscriber>) {
        info!("Pool subscriber {} registered", subscriber.name());
        self.subscribers.lock().await.push(subscriber);
    }

    async fn publish(&self, diff: TransactionPoolDiff) {
        if diff.reverted_sets.is_empty() && diff.applied_sets.is_empty() {
            return;
        }
        let diff = Arc::new(diff);
        let subscribers = self.subscribers.lock().await.clone();
        for subscriber in subscribers {
            subscriber.process_pool_diff(Arc::clone(&diff)).await;
        }
    }

    // Validate and admit a parent-closed transaction set, then relay it.
    pub async fn accept_transaction_set(&self, set: Vec<Transaction>) -> Result<(), TPoolError> {
        if set.is_empty() {
            return Err(TPoolError::EmptySet);
        }
        for txn in &set {
            if txn.size() > MAX_TRANSACTION_SIZE {
                return Err(TPoolError::OversizedTransaction);
            }
        }

        let id = set_id(&set);
        let applied = {
            let mut state = self.state.write().await;
            if state.sets.contains_key(&id) {
                return Err(TPoolError::DuplicateSet);
            }
            for txn in &set {
                if state.contains_txn(&txn.id()) {
                    return Err(TPoolError::DuplicateTransaction);
                }
            }

            // dry-run against the tip with every already-pooled set applied
            // first, so chained spends and pool double-spends both resolve
            let (mut scratch, height) = self.consensus.state_snapshot().await;
            let mut diffs = BlockDiffs::default();
            for existing in state.sets.values() {
                for txn in existing {
                    // pooled sets were valid when admitted and are
                    // revalidated on every consensus change
                    let _ = scratch.apply_transaction(txn, height + 1, &mut diffs);
                }
            }
            for txn in &set {
                scratch.apply_transaction(txn, height + 1, &mut diffs)?;
            }

            for txn in &set {
                state.by_txn.insert(txn.id(), id.clone());
            }
            state.sets.insert(id.clone(), set.clone());
            AppliedSet {
                id: id.clone(),
                transactions: set.clone(),
            }
        };

        debug!("Accepted transaction set {} ({} txns)", id, applied.transactions.len());
        self.publish(TransactionPoolDiff {
            reverted_sets: Vec::new(),
            applied_sets: vec![applied],
        })
        .await;
        self.gateway.broadcast_transaction_set(set).await;
        Ok(())
    }

    // A transaction plus the pooled parents it depends on (the members of
    // its set that precede it)
    pub async fn transaction(&self, id: &Hash) -> Option<(Transaction, Vec<Transaction>)> {
        let state = self.state.read().await;
        let set_id = state.by_txn.get(id)?;
        let set = state.sets.get(set_id)?;
        let position = set.iter().position(|txn| &txn.id() == id)?;
        Some((set[position].clone(), set[..position].to_vec()))
    }

    pub async fn transaction_list(&self) -> Vec<Transaction> {
        let state = self.state.read().await;
        state.sets.values().flatten().cloned().collect()
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.by_txn.len()
    }

    // Re-relay a pooled transaction and its parents to the network
    pub async fn broadcast(&self, id: &Hash) -> Result<(), TPoolError> {
        let (txn, mut parents) = self
            .transaction(id)
            .await
            .ok_or(TPoolError::TransactionNotFound)?;
        parents.push(txn);
        self.gateway.broadcast_transaction_set(parents).await;
        Ok(())
    }

    // React to a consensus change: drop confirmed transactions, re-offer the
    // ones from reverted blocks, revalidate everything against the new tip,
    // and tell subscribers what moved.
    async fn update(&self, change: &ConsensusChange) {
        let mut state = self.state.write().await;

        let confirmed: HashSet<Hash> = change
            .applied_blocks
            .iter()
            .flat_map(|block| block.transactions.iter().map(|txn| txn.id()))
            .collect();

        let (mut scratch, height) = self.consensus.state_snapshot().await;

        let old_sets = std::mem::take(&mut state.sets);
        state.by_txn.clear();

        let mut diff = TransactionPoolDiff::default();
        let mut work_diffs = BlockDiffs::default();

        // keep a set untouched when every member survives on the new tip;
        // otherwise revert it and re-admit the surviving members as a new set
        for (id, transactions) in old_sets {
            let survivors: Vec<Transaction> = transactions
                .iter()
                .filter(|txn| !confirmed.contains(&txn.id()))
                .filter(|txn| {
                    scratch
                        .apply_transaction(txn, height + 1, &mut work_diffs)
                        .is_ok()
                })
                .cloned()
                .collect();

            if survivors.len() == transactions.len() {
                for txn in &survivors {
                    state.by_txn.insert(txn.id(), id.clone());
                }
                state.sets.insert(id, survivors);
            } else {
                diff.reverted_sets.push(id);
                if !survivors.is_empty() {
                    let new_id = set_id(&survivors);
                    for txn in &survivors {
                        state.by_txn.insert(txn.id(), new_id.clone());
                    }
                    state.sets.insert(new_id.clone(), survivors.clone());
                    diff.applied_sets.push(AppliedSet {
                        id: new_id,
                        transactions: survivors,
                    });
                }
            }
        }

        // transactions undone by a reorg become unconfirmed again
        for block in &change.reverted_blocks {
            let returned: Vec<Transaction> = block
                .transactions
                .iter()
                .filter(|txn| !confirmed.contains(&txn.id()))
                .filter(|txn| !state.contains_txn(&txn.id()))
                .filter(|txn| {
                    scratch
                        .apply_transaction(txn, height + 1, &mut work_diffs)
                        .is_ok()
                })
                .cloned()
                .collect();

            if !returned.is_empty() {
                let new_id = set_id(&returned);
                debug!(
                    "Re-offering {} transactions from reverted block {}",
                    returned.len(),
                    block.id()
                );
                for txn in &returned {
                    state.by_txn.insert(txn.id(), new_id.clone());
                }
                state.sets.insert(new_id.clone(), returned.clone());
                diff.applied_sets.push(AppliedSet {
                    id: new_id,
                    transactions: returned,
                });
            }
        }

        drop(state);
        self.publish(diff).await;
    }
}

#[async_trait]
impl ConsensusSubscriber for TransactionPool {
    fn name(&self) -> &'static str {
        "transactionpool"
    }

    async fn process_consensus_change(&self, change: Arc<ConsensusChange>) {
        self.update(&change).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_id_is_order_sensitive() {
        let a = Transaction {
            miner_fees: vec![sia_common::currency::Currency::new(1)],
            ..Default::default()
        };
        let b = Transaction {
            miner_fees: vec![sia_common::currency::Currency::new(2)],
            ..Default::default()
        };
        assert_ne!(
            set_id(&[a.clone(), b.clone()]),
            set_id(&[b, a])
        );
    }
}
