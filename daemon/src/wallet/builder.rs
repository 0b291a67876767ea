use sia_common::currency::Currency;
use sia_common::transaction::{
    CoveredFields, SiacoinInput, SiacoinOutput, SiafundInput, SiafundOutput, Transaction,
    TransactionSignature,
};
use sia_common::unlock::{UnlockConditions, UnlockHash};

use super::{spendable_key, Wallet, WalletError, WalletState};

// Flat fee attached to every wallet-built transaction; generous enough to
// stay attractive to miners without fee estimation
fn standard_fee() -> Currency {
    Currency::from_coins(10)
}

impl Wallet {
    fn next_address_locked(
        &self,
        state: &mut WalletState,
    ) -> Result<UnlockConditions, WalletError> {
        let seed = *state.seeds.first().ok_or(WalletError::NotEncrypted)?;
        let key = spendable_key(&seed, 0, state.progress);
        let conditions = key.conditions.clone();
        state.addresses.push(conditions.unlock_hash());
        state.keys.insert(conditions.unlock_hash(), key);
        state.progress += 1;

        let cipher = state.master.as_ref().ok_or(WalletError::Locked)?;
        self.store.save_progress(cipher, state.progress)?;
        Ok(conditions)
    }

    // Add one whole-transaction signature per wallet-owned input. Signature
    // entries are appended first so every sig hash already covers the final
    // binding fields, then the real signatures replace the placeholders.
    fn sign_locked(&self, state: &WalletState, txn: &mut Transaction) -> Result<(), WalletError> {
        let mut pending: Vec<(usize, UnlockHash)> = Vec::new();

        let coin_parents: Vec<(sia_common::crypto::Hash, UnlockHash)> = txn
            .siacoin_inputs
            .iter()
            .map(|input| (input.parent_id.clone(), input.unlock_conditions.unlock_hash()))
            .collect();
        let fund_parents: Vec<(sia_common::crypto::Hash, UnlockHash)> = txn
            .siafund_inputs
            .iter()
            .map(|input| (input.parent_id.clone(), input.unlock_conditions.unlock_hash()))
            .collect();

        for (parent_id, address) in coin_parents.into_iter().chain(fund_parents) {
            if !state.owns(&address) {
                continue;
            }
            let placeholder = state
                .keys
                .get(&address)
                .ok_or(WalletError::Locked)?
                .secret
                .sign(b"placeholder");
            txn.signatures.push(TransactionSignature {
                parent_id,
                public_key_index: 0,
                timelock: 0,
                covered_fields: CoveredFields::whole_transaction(),
                signature: placeholder,
            });
            pending.push((txn.signatures.len() - 1, address));
        }

        for (index, address) in pending {
            let sig_hash = txn.sig_hash(index)?;
            let key = state.keys.get(&address).ok_or(WalletError::Locked)?;
            txn.signatures[index].signature = key.secret.sign(sig_hash.as_bytes());
        }
        Ok(())
    }

    // Cover the transaction's coin spending (outputs + fees + contract
    // payouts) with wallet outputs, route change back to a fresh address,
    // and sign. The consumed outputs are reserved so a second build cannot
    // double-spend them before confirmation.
    fn fund_and_sign_locked(
        &self,
        state: &mut WalletState,
        mut txn: Transaction,
    ) -> Result<Transaction, WalletError> {
        if !state.unlocked {
            return Err(WalletError::Locked);
        }

        let mut needed = txn.siacoin_output_sum();
        needed = needed
            .checked_add(txn.total_fees())
            .ok_or(WalletError::InsufficientFunds)?;
        for contract in &txn.file_contracts {
            needed = needed
                .checked_add(contract.payout)
                .ok_or(WalletError::InsufficientFunds)?;
        }

        let mut selected: Vec<(sia_common::crypto::Hash, SiacoinOutput)> = Vec::new();
        let mut total = Currency::ZERO;
        for (id, output) in &state.confirmed_outputs {
            if total >= needed {
                break;
            }
            if state.unconfirmed_spent.contains(id) {
                continue;
            }
            selected.push((id.clone(), output.clone()));
            total = total
                .checked_add(output.value)
                .ok_or(WalletError::InsufficientFunds)?;
        }
        if total < needed {
            return Err(WalletError::InsufficientFunds);
        }

        for (id, output) in &selected {
            let key = state
                .keys
                .get(&output.unlock_hash)
                .ok_or(WalletError::Locked)?;
            txn.siacoin_inputs.push(SiacoinInput {
                parent_id: id.clone(),
                unlock_conditions: key.conditions.clone(),
            });
        }

        let change = total.saturating_sub(needed);
        if !change.is_zero() {
            let conditions = self.next_address_locked(state)?;
            txn.siacoin_outputs.push(SiacoinOutput {
                value: change,
                unlock_hash: conditions.unlock_hash(),
            });
        }

        self.sign_locked(state, &mut txn)?;

        for (id, _) in selected {
            state.unconfirmed_spent.insert(id);
        }
        Ok(txn)
    }

    // Fund and sign an externally assembled transaction (host announcements,
    // contract formation). The caller submits the result to the pool.
    pub async fn fund_and_sign(&self, txn: Transaction) -> Result<Transaction, WalletError> {
        let mut state = self.state.write().await;
        self.fund_and_sign_locked(&mut state, txn)
    }

    pub async fn send_siacoins(
        &self,
        amount: Currency,
        destination: UnlockHash,
    ) -> Result<Vec<Transaction>, WalletError> {
        let txn = {
            let mut state = self.state.write().await;
            let txn = Transaction {
                siacoin_outputs: vec![SiacoinOutput {
                    value: amount,
                    unlock_hash: destination,
                }],
                miner_fees: vec![standard_fee()],
                ..Default::default()
            };
            self.fund_and_sign_locked(&mut state, txn)?
        };

        debug!("Built siacoin send {}", txn.id());
        self.tpool.accept_transaction_set(vec![txn.clone()]).await?;
        Ok(vec![txn])
    }

    pub async fn send_siafunds(
        &self,
        amount: Currency,
        destination: UnlockHash,
    ) -> Result<Vec<Transaction>, WalletError> {
        let txn = {
            let mut state = self.state.write().await;
            if !state.unlocked {
                return Err(WalletError::Locked);
            }

            // select fund outputs first, then let the coin path cover fees
            let mut selected: Vec<(sia_common::crypto::Hash, SiafundOutput)> = Vec::new();
            let mut total = Currency::ZERO;
            for (id, output) in &state.confirmed_fund_outputs {
                if total >= amount {
                    break;
                }
                if state.unconfirmed_spent.contains(id) {
                    continue;
                }
                selected.push((id.clone(), output.clone()));
                total = total
                    .checked_add(output.value)
                    .ok_or(WalletError::InsufficientFunds)?;
            }
            if total < amount {
                return Err(WalletError::InsufficientFunds);
            }

            let mut txn = Transaction {
                siafund_outputs: vec![SiafundOutput {
                    value: amount,
                    unlock_hash: destination,
                    claim_start: Currency::ZERO,
                }],
                miner_fees: vec![standard_fee()],
                ..Default::default()
            };

            let claim_conditions = self.next_address_locked(&mut state)?;
            for (id, output) in &selected {
                let key = state
                    .keys
                    .get(&output.unlock_hash)
                    .ok_or(WalletError::Locked)?;
                txn.siafund_inputs.push(SiafundInput {
                    parent_id: id.clone(),
                    unlock_conditions: key.conditions.clone(),
                    claim_unlock_hash: claim_conditions.unlock_hash(),
                });
            }

            let change = total.saturating_sub(amount);
            if !change.is_zero() {
                let conditions = self.next_address_locked(&mut state)?;
                txn.siafund_outputs.push(SiafundOutput {
                    value: change,
                    unlock_hash: conditions.unlock_hash(),
                    claim_start: Currency::ZERO,
                });
            }

            let txn = self.fund_and_sign_locked(&mut state, txn)?;
            for (id, _) in selected {
                state.unconfirmed_spent.insert(id);
            }
            txn
        };

        debug!("Built siafund send {}", txn.id());
        self.tpool.accept_transaction_set(vec![txn.clone()]).await?;
        Ok(vec![txn])
    }
}
