use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sia_common::block::Block;
use sia_common::crypto::Hash;
use sia_common::currency::Currency;
use sia_common::transaction::Transaction;

use super::{spendable_key, ProcessedFlow, ProcessedTransaction, Wallet, WalletState};
use crate::consensus::{ConsensusChange, ConsensusSubscriber, DiffDirection};
use crate::tpool::{TransactionPoolDiff, TransactionPoolSubscriber};

// Value lookup for inputs: every spend in a change shows up as a revert
// diff carrying the full output, so the wallet never guesses amounts.
fn coin_values(change: &ConsensusChange) -> HashMap<Hash, Currency> {
    change
        .siacoin_diffs
        .iter()
        .map(|diff| (diff.id.clone(), diff.output.value))
        .collect()
}

fn fund_values(change: &ConsensusChange) -> HashMap<Hash, Currency> {
    change
        .siafund_diffs
        .iter()
        .map(|diff| (diff.id.clone(), diff.output.value))
        .collect()
}

// Build the wallet-facing view of one transaction; `relevant` is true when
// any flow touches a wallet address.
fn process_transaction(
    state: &WalletState,
    txn: &Transaction,
    confirmation_height: u64,
    coin_values: &HashMap<Hash, Currency>,
    fund_values: &HashMap<Hash, Currency>,
) -> Option<ProcessedTransaction> {
    let mut relevant = false;
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for input in &txn.siacoin_inputs {
        let address = input.unlock_conditions.unlock_hash();
        let wallet_owned = state.owns(&address);
        relevant |= wallet_owned;
        inputs.push(ProcessedFlow {
            value: coin_values
                .get(&input.parent_id)
                .copied()
                .unwrap_or(Currency::ZERO),
            address,
            wallet_owned,
        });
    }
    for input in &txn.siafund_inputs {
        let address = input.unlock_conditions.unlock_hash();
        let wallet_owned = state.owns(&address);
        relevant |= wallet_owned;
        inputs.push(ProcessedFlow {
            value: fund_values
                .get(&input.parent_id)
                .copied()
                .unwrap_or(Currency::ZERO),
            address,
            wallet_owned,
        });
    }
    for output in &txn.siacoin_outputs {
        let wallet_owned = state.owns(&output.unlock_hash);
        relevant |= wallet_owned;
        outputs.push(ProcessedFlow {
            address: output.unlock_hash.clone(),
            value: output.value,
            wallet_owned,
        });
    }
    for output in &txn.siafund_outputs {
        let wallet_owned = state.owns(&output.unlock_hash);
        relevant |= wallet_owned;
        outputs.push(ProcessedFlow {
            address: output.unlock_hash.clone(),
            value: output.value,
            wallet_owned,
        });
    }

    relevant.then(|| ProcessedTransaction {
        transaction_id: txn.id(),
        transaction: txn.clone(),
        confirmation_height,
        inputs,
        outputs,
    })
}

// Miner payouts have no carrying transaction; the block itself is recorded
// as a pseudo-entry when a payout lands on a wallet address.
fn process_miner_payouts(
    state: &WalletState,
    block: &Block,
    confirmation_height: u64,
) -> Option<ProcessedTransaction> {
    let outputs: Vec<ProcessedFlow> = block
        .miner_payouts
        .iter()
        .map(|payout| ProcessedFlow {
            address: payout.unlock_hash.clone(),
            value: payout.value,
            wallet_owned: state.owns(&payout.unlock_hash),
        })
        .collect();

    outputs.iter().any(|flow| flow.wallet_owned).then(|| ProcessedTransaction {
        transaction_id: block.id(),
        transaction: Transaction::default(),
        confirmation_height,
        inputs: Vec::new(),
        outputs,
    })
}

impl Wallet {
    // A lookahead address got used on-chain: advance derivation progress
    // past it and keep the window ahead.
    fn advance_progress(state: &mut WalletState, address: &Hash) {
        let address = sia_common::unlock::UnlockHash(address.clone());
        let origin = match state.keys.get(&address) {
            Some(key) => key.seed_origin,
            None => return,
        };
        let Some((0, index)) = origin else { return };
        if index < state.progress {
            return;
        }

        let seed = match state.seeds.first() {
            Some(seed) => *seed,
            None => return,
        };
        for i in state.progress..=index {
            let key = spendable_key(&seed, 0, i);
            state.addresses.push(key.conditions.unlock_hash());
        }
        state.progress = index + 1;
        let target = state.progress + super::LOOKAHEAD;
        for i in 0..target {
            let key = spendable_key(&seed, 0, i);
            state.keys.entry(key.conditions.unlock_hash()).or_insert(key);
        }
    }
}

#[async_trait]
impl ConsensusSubscriber for Wallet {
    fn name(&self) -> &'static str {
        "wallet"
    }

    async fn process_consensus_change(&self, change: Arc<ConsensusChange>) {
        let mut state = self.state.write().await;
        let coin_values = coin_values(&change);
        let fund_values = fund_values(&change);

        for block in &change.reverted_blocks {
            let block_id = block.id();
            state.processed.retain(|(bid, _)| bid != &block_id);
            state.blocks_seen = state.blocks_seen.saturating_sub(1);
        }

        // the diff stream is authoritative for balances
        for diff in &change.siacoin_diffs {
            match diff.direction {
                DiffDirection::Apply => {
                    if state.owns(&diff.output.unlock_hash) {
                        Wallet::advance_progress(&mut state, diff.output.unlock_hash.as_hash());
                        state
                            .confirmed_outputs
                            .insert(diff.id.clone(), diff.output.clone());
                    }
                }
                DiffDirection::Revert => {
                    state.confirmed_outputs.remove(&diff.id);
                    state.unconfirmed_spent.remove(&diff.id);
                }
            }
        }
        for diff in &change.siafund_diffs {
            match diff.direction {
                DiffDirection::Apply => {
                    if state.owns(&diff.output.unlock_hash) {
                        state
                            .confirmed_fund_outputs
                            .insert(diff.id.clone(), diff.output.clone());
                    }
                }
                DiffDirection::Revert => {
                    state.confirmed_fund_outputs.remove(&diff.id);
                    state.unconfirmed_spent.remove(&diff.id);
                }
            }
        }

        for block in &change.applied_blocks {
            state.blocks_seen += 1;
            let height = state.blocks_seen.saturating_sub(1);
            let block_id = block.id();

            for txn in &block.transactions {
                if let Some(processed) =
                    process_transaction(&state, txn, height, &coin_values, &fund_values)
                {
                    state.processed.push((block_id.clone(), processed));
                }
            }
            if let Some(processed) = process_miner_payouts(&state, block, height) {
                state.processed.push((block_id.clone(), processed));
            }
        }

        state.height = state.blocks_seen.saturating_sub(1);
    }
}

#[async_trait]
impl TransactionPoolSubscriber for Wallet {
    fn name(&self) -> &'static str {
        "wallet"
    }

    async fn process_pool_diff(&self, diff: Arc<TransactionPoolDiff>) {
        let mut state = self.state.write().await;

        for set_id in &diff.reverted_sets {
            let released: Vec<Hash> = state
                .unconfirmed
                .iter()
                .filter(|(sid, _)| sid == set_id)
                .flat_map(|(_, txn)| {
                    txn.transaction
                        .siacoin_inputs
                        .iter()
                        .map(|input| input.parent_id.clone())
                        .collect::<Vec<_>>()
                })
                .collect();
            for id in released {
                state.unconfirmed_spent.remove(&id);
            }
            state.unconfirmed.retain(|(sid, _)| sid != set_id);
        }

        let empty = HashMap::new();
        for set in &diff.applied_sets {
            for txn in &set.transactions {
                // input values resolve against our own confirmed view
                let values: HashMap<Hash, Currency> = txn
                    .siacoin_inputs
                    .iter()
                    .filter_map(|input| {
                        state
                            .confirmed_outputs
                            .get(&input.parent_id)
                            .map(|output| (input.parent_id.clone(), output.value))
                    })
                    .collect();

                if let Some(processed) =
                    process_transaction(&state, txn, u64::MAX, &values, &empty)
                {
                    for input in &txn.siacoin_inputs {
                        if state.owns(&input.unlock_conditions.unlock_hash()) {
                            state.unconfirmed_spent.insert(input.parent_id.clone());
                        }
                    }
                    state.unconfirmed.push((set.id.clone(), processed));
                }
            }
        }
    }
}
