use sia_common::block::Block;
use sia_common::config::{INITIAL_COINBASE, MINIMUM_COINBASE};
use sia_common::crypto::Hash;
use sia_common::currency::Currency;
use sia_common::transaction::{FileContract, SiacoinOutput, SiafundOutput, Transaction};
use sia_common::unlock::UnlockConditions;

use super::changes::{
    BlockDiffs, ConsensusChange, DiffDirection, FileContractDiff, SiacoinOutputDiff,
    SiafundOutputDiff,
};
use super::{ChainState, ConsensusError};

// Block subsidy: decays linearly from the initial coinbase down to the floor
pub fn block_subsidy(height: u64) -> Currency {
    Currency::from_coins(INITIAL_COINBASE.saturating_sub(height).max(MINIMUM_COINBASE))
}

impl ChainState {
    // Connect `block` as the new tip: validate every transaction against the
    // live state, check the miner payout equation, expire contracts whose
    // window has closed, and push the path. Returns the diffs needed to undo
    // all of it; on error the state is left untouched.
    pub(crate) fn apply_block(&mut self, block: &Block) -> Result<BlockDiffs, ConsensusError> {
        let height = self.height() + 1;
        let mut diffs = BlockDiffs::default();

        let mut fees = Currency::ZERO;
        for txn in &block.transactions {
            match self.apply_transaction(txn, height, &mut diffs) {
                Ok(txn_fees) => {
                    fees = fees
                        .checked_add(txn_fees)
                        .ok_or(ConsensusError::CoinMismatch)?;
                }
                Err(e) => {
                    self.undo_diffs(&diffs);
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.apply_miner_payouts(block, height, fees, &mut diffs) {
            self.undo_diffs(&diffs);
            return Err(e);
        }
        self.expire_contracts(height, &mut diffs);

        self.path.push(block.id());
        Ok(diffs)
    }

    // Undo one applied block using its recorded diffs
    pub(crate) fn revert_block(&mut self, node: &super::BlockNode) -> Result<(), ConsensusError> {
        let diffs = node
            .diffs
            .as_ref()
            .ok_or(ConsensusError::CorruptDatabase)?;
        crate::assert_invariant!(
            self.path.last() == Some(&node.block.id()),
            "reverting a block that is not the tip"
        );
        self.undo_diffs(diffs);
        self.path.pop();
        Ok(())
    }

    // Re-apply a previously applied block from its stored diffs, used when a
    // failed reorg restores the original chain
    pub(crate) fn reapply_block(&mut self, node: &super::BlockNode, diffs: &BlockDiffs) {
        self.apply_siacoin_diffs(&diffs.siacoin_diffs);
        self.apply_siafund_diffs(&diffs.siafund_diffs);
        self.apply_contract_diffs(&diffs.contract_diffs);
        self.path.push(node.block.id());
    }

    // Forward-apply the aggregate diffs of a logged change; used to rebuild
    // the in-memory view on startup
    pub(crate) fn apply_change_diffs(&mut self, change: &ConsensusChange) {
        self.apply_siacoin_diffs(&change.siacoin_diffs);
        self.apply_siafund_diffs(&change.siafund_diffs);
        self.apply_contract_diffs(&change.contract_diffs);
    }

    fn apply_siacoin_diffs(&mut self, diffs: &[SiacoinOutputDiff]) {
        for diff in diffs {
            match diff.direction {
                DiffDirection::Apply => {
                    self.siacoin_outputs
                        .insert(diff.id.clone(), diff.output.clone());
                }
                DiffDirection::Revert => {
                    self.siacoin_outputs.remove(&diff.id);
                }
            }
        }
    }

    fn apply_siafund_diffs(&mut self, diffs: &[SiafundOutputDiff]) {
        for diff in diffs {
            match diff.direction {
                DiffDirection::Apply => {
                    self.siafund_outputs
                        .insert(diff.id.clone(), diff.output.clone());
                }
                DiffDirection::Revert => {
                    self.siafund_outputs.remove(&diff.id);
                }
            }
        }
    }

    fn apply_contract_diffs(&mut self, diffs: &[FileContractDiff]) {
        for diff in diffs {
            match diff.direction {
                DiffDirection::Apply => {
                    self.file_contracts
                        .insert(diff.id.clone(), diff.contract.clone());
                }
                DiffDirection::Revert => {
                    self.file_contracts.remove(&diff.id);
                }
            }
        }
    }

    fn undo_diffs(&mut self, diffs: &BlockDiffs) {
        for diff in diffs.siacoin_diffs.iter().rev() {
            match diff.direction.inverse() {
                DiffDirection::Apply => {
                    self.siacoin_outputs
                        .insert(diff.id.clone(), diff.output.clone());
                }
                DiffDirection::Revert => {
                    self.siacoin_outputs.remove(&diff.id);
                }
            }
        }
        for diff in diffs.siafund_diffs.iter().rev() {
            match diff.direction.inverse() {
                DiffDirection::Apply => {
                    self.siafund_outputs
                        .insert(diff.id.clone(), diff.output.clone());
                }
                DiffDirection::Revert => {
                    self.siafund_outputs.remove(&diff.id);
                }
            }
        }
        for diff in diffs.contract_diffs.iter().rev() {
            match diff.direction.inverse() {
                DiffDirection::Apply => {
                    self.file_contracts
                        .insert(diff.id.clone(), diff.contract.clone());
                }
                DiffDirection::Revert => {
                    self.file_contracts.remove(&diff.id);
                }
            }
        }
    }

    // Validate and apply one transaction, appending its diffs. Returns the
    // transaction's miner fees. Spends are removed from the live maps as
    // they are consumed, so intra-block chaining and double-spends are both
    // handled by the same lookup. Also used by the transaction pool against
    // scratch copies of the state.
    pub(crate) fn apply_transaction(
        &mut self,
        txn: &Transaction,
        height: u64,
        diffs: &mut BlockDiffs,
    ) -> Result<Currency, ConsensusError> {
        let mut coin_input_sum = Currency::ZERO;
        for input in &txn.siacoin_inputs {
            let output = self
                .siacoin_outputs
                .get(&input.parent_id)
                .cloned()
                .ok_or(ConsensusError::MissingOutput)?;
            check_spend_authority(txn, &input.parent_id, &input.unlock_conditions, &output.unlock_hash, height)?;
            coin_input_sum = coin_input_sum
                .checked_add(output.value)
                .ok_or(ConsensusError::CoinMismatch)?;
            self.siacoin_outputs.remove(&input.parent_id);
            diffs.siacoin_diffs.push(SiacoinOutputDiff {
                direction: DiffDirection::Revert,
                id: input.parent_id.clone(),
                output,
            });
        }

        let mut fund_input_sum = Currency::ZERO;
        for input in &txn.siafund_inputs {
            let output = self
                .siafund_outputs
                .get(&input.parent_id)
                .cloned()
                .ok_or(ConsensusError::MissingOutput)?;
            check_spend_authority(txn, &input.parent_id, &input.unlock_conditions, &output.unlock_hash, height)?;
            fund_input_sum = fund_input_sum
                .checked_add(output.value)
                .ok_or(ConsensusError::CoinMismatch)?;
            self.siafund_outputs.remove(&input.parent_id);
            diffs.siafund_diffs.push(SiafundOutputDiff {
                direction: DiffDirection::Revert,
                id: input.parent_id.clone(),
                output,
            });
        }

        let mut contract_cost = Currency::ZERO;
        for (index, contract) in txn.file_contracts.iter().enumerate() {
            validate_new_contract(contract, height)?;
            contract_cost = contract_cost
                .checked_add(contract.payout)
                .ok_or(ConsensusError::CoinMismatch)?;
            let id = txn.file_contract_id(index as u64);
            self.file_contracts.insert(id.clone(), contract.clone());
            diffs.contract_diffs.push(FileContractDiff {
                direction: DiffDirection::Apply,
                id,
                contract: contract.clone(),
            });
        }

        for revision in &txn.file_contract_revisions {
            let existing = self
                .file_contracts
                .get(&revision.parent_id)
                .cloned()
                .ok_or(ConsensusError::UnknownContract)?;
            validate_revision(txn, revision, &existing, height)?;

            let revised = FileContract {
                file_size: revision.new_file_size,
                file_merkle_root: revision.new_file_merkle_root.clone(),
                window_start: revision.new_window_start,
                window_end: revision.new_window_end,
                payout: existing.payout,
                valid_proof_outputs: revision.new_valid_proof_outputs.clone(),
                missed_proof_outputs: revision.new_missed_proof_outputs.clone(),
                unlock_hash: revision.new_unlock_hash.clone(),
                revision_number: revision.new_revision_number,
            };
            self.file_contracts
                .insert(revision.parent_id.clone(), revised.clone());
            diffs.contract_diffs.push(FileContractDiff {
                direction: DiffDirection::Revert,
                id: revision.parent_id.clone(),
                contract: existing,
            });
            diffs.contract_diffs.push(FileContractDiff {
                direction: DiffDirection::Apply,
                id: revision.parent_id.clone(),
                contract: revised,
            });
        }

        for proof in &txn.storage_proofs {
            let contract = self
                .file_contracts
                .get(&proof.parent_id)
                .cloned()
                .ok_or(ConsensusError::UnknownContract)?;
            if height < contract.window_start || height > contract.window_end {
                return Err(ConsensusError::ProofOutsideWindow);
            }

            // proof accepted: the valid payout branch materializes and the
            // contract leaves the active set
            for (index, output) in contract.valid_proof_outputs.iter().enumerate() {
                if output.value.is_zero() {
                    continue;
                }
                let id = FileContract::payout_id(&proof.parent_id, true, index as u64);
                self.create_siacoin_output(id, output.clone(), diffs)?;
            }
            self.file_contracts.remove(&proof.parent_id);
            diffs.contract_diffs.push(FileContractDiff {
                direction: DiffDirection::Revert,
                id: proof.parent_id.clone(),
                contract,
            });
        }

        let mut coin_output_sum = Currency::ZERO;
        for (index, output) in txn.siacoin_outputs.iter().enumerate() {
            if output.value.is_zero() {
                return Err(ConsensusError::CoinMismatch);
            }
            coin_output_sum = coin_output_sum
                .checked_add(output.value)
                .ok_or(ConsensusError::CoinMismatch)?;
            let id = txn.siacoin_output_id(index as u64);
            self.create_siacoin_output(id, output.clone(), diffs)?;
        }

        let mut fund_output_sum = Currency::ZERO;
        for (index, output) in txn.siafund_outputs.iter().enumerate() {
            if output.value.is_zero() {
                return Err(ConsensusError::CoinMismatch);
            }
            fund_output_sum = fund_output_sum
                .checked_add(output.value)
                .ok_or(ConsensusError::CoinMismatch)?;
            let id = txn.siafund_output_id(index as u64);
            self.siafund_outputs.insert(id.clone(), output.clone());
            diffs.siafund_diffs.push(SiafundOutputDiff {
                direction: DiffDirection::Apply,
                id,
                output: output.clone(),
            });
        }

        // conservation: coins in == coins out + fees + contract funding
        let fees = txn.total_fees();
        let spent = coin_output_sum
            .checked_add(fees)
            .and_then(|sum| sum.checked_add(contract_cost))
            .ok_or(ConsensusError::CoinMismatch)?;
        if coin_input_sum != spent {
            return Err(ConsensusError::CoinMismatch);
        }
        if fund_input_sum != fund_output_sum {
            return Err(ConsensusError::CoinMismatch);
        }

        Ok(fees)
    }

    fn apply_miner_payouts(
        &mut self,
        block: &Block,
        height: u64,
        fees: Currency,
        diffs: &mut BlockDiffs,
    ) -> Result<(), ConsensusError> {
        let expected = block_subsidy(height)
            .checked_add(fees)
            .ok_or(ConsensusError::BadMinerPayout)?;

        let mut total = Currency::ZERO;
        for payout in &block.miner_payouts {
            if payout.value.is_zero() {
                return Err(ConsensusError::BadMinerPayout);
            }
            total = total
                .checked_add(payout.value)
                .ok_or(ConsensusError::BadMinerPayout)?;
        }
        if total != expected {
            return Err(ConsensusError::BadMinerPayout);
        }

        for (index, payout) in block.miner_payouts.iter().enumerate() {
            let id = block.miner_payout_id(index as u64);
            self.create_siacoin_output(id, payout.clone(), diffs)?;
        }
        Ok(())
    }

    // Contracts whose window closed without a proof pay the missed branch
    fn expire_contracts(&mut self, height: u64, diffs: &mut BlockDiffs) {
        let expired: Vec<(Hash, FileContract)> = self
            .file_contracts
            .iter()
            .filter(|(_, contract)| contract.window_end < height)
            .map(|(id, contract)| (id.clone(), contract.clone()))
            .collect();

        for (id, contract) in expired {
            debug!("File contract {} expired at height {}", id, height);
            for (index, output) in contract.missed_proof_outputs.iter().enumerate() {
                if output.value.is_zero() {
                    continue;
                }
                let output_id = FileContract::payout_id(&id, false, index as u64);
                self.siacoin_outputs
                    .insert(output_id.clone(), output.clone());
                diffs.siacoin_diffs.push(SiacoinOutputDiff {
                    direction: DiffDirection::Apply,
                    id: output_id,
                    output: output.clone(),
                });
            }
            self.file_contracts.remove(&id);
            diffs.contract_diffs.push(FileContractDiff {
                direction: DiffDirection::Revert,
                id,
                contract,
            });
        }
    }

    fn create_siacoin_output(
        &mut self,
        id: Hash,
        output: SiacoinOutput,
        diffs: &mut BlockDiffs,
    ) -> Result<(), ConsensusError> {
        crate::assert_invariant!(
            !self.siacoin_outputs.contains_key(&id),
            "derived output ID collision"
        );
        self.siacoin_outputs.insert(id.clone(), output.clone());
        diffs.siacoin_diffs.push(SiacoinOutputDiff {
            direction: DiffDirection::Apply,
            id,
            output,
        });
        Ok(())
    }
}

// An input's unlock conditions must hash to the output's address, its
// timelock must have expired, and enough of its declared keys must have
// signed the transaction.
fn check_spend_authority(
    txn: &Transaction,
    parent_id: &Hash,
    conditions: &UnlockConditions,
    unlock_hash: &sia_common::unlock::UnlockHash,
    height: u64,
) -> Result<(), ConsensusError> {
    if &conditions.unlock_hash() != unlock_hash {
        return Err(ConsensusError::WrongUnlockConditions);
    }
    if conditions.timelock > height {
        return Err(ConsensusError::PrematureInput);
    }

    let mut valid = 0u64;
    for (index, sig) in txn.signatures.iter().enumerate() {
        if &sig.parent_id != parent_id {
            continue;
        }
        if sig.timelock > height {
            return Err(ConsensusError::PrematureInput);
        }
        let public_key = conditions
            .public_keys
            .get(sig.public_key_index as usize)
            .ok_or(ConsensusError::InvalidSignature)?;
        let sig_hash = txn
            .sig_hash(index)
            .map_err(|_| ConsensusError::InvalidSignature)?;
        if !public_key.verify(sig_hash.as_bytes(), &sig.signature) {
            return Err(ConsensusError::InvalidSignature);
        }
        valid += 1;
    }

    if valid < conditions.signatures_required {
        return Err(ConsensusError::MissingSignatures);
    }
    Ok(())
}

fn validate_new_contract(contract: &FileContract, height: u64) -> Result<(), ConsensusError> {
    if contract.window_start <= height || contract.window_end <= contract.window_start {
        return Err(ConsensusError::InvalidContract);
    }
    if contract.payout.is_zero() {
        return Err(ConsensusError::InvalidContract);
    }
    let valid_sum: Currency = contract.valid_proof_outputs.iter().map(|o| o.value).sum();
    let missed_sum: Currency = contract.missed_proof_outputs.iter().map(|o| o.value).sum();
    if valid_sum != contract.payout || missed_sum != contract.payout {
        return Err(ConsensusError::InvalidContract);
    }
    Ok(())
}

fn validate_revision(
    txn: &Transaction,
    revision: &sia_common::transaction::FileContractRevision,
    existing: &FileContract,
    height: u64,
) -> Result<(), ConsensusError> {
    // the revision window has closed once proofs can be submitted
    if height >= existing.window_start {
        return Err(ConsensusError::ProofOutsideWindow);
    }
    if revision.new_revision_number <= existing.revision_number {
        return Err(ConsensusError::LateRevision);
    }
    if revision.unlock_conditions.unlock_hash().as_hash() != existing.unlock_hash.as_hash() {
        return Err(ConsensusError::WrongUnlockConditions);
    }
    if revision.new_window_start <= height || revision.new_window_end <= revision.new_window_start {
        return Err(ConsensusError::InvalidRevision);
    }

    let valid_sum: Currency = revision
        .new_valid_proof_outputs
        .iter()
        .map(|o| o.value)
        .sum();
    let missed_sum: Currency = revision
        .new_missed_proof_outputs
        .iter()
        .map(|o| o.value)
        .sum();
    if valid_sum != existing.payout || missed_sum != existing.payout {
        return Err(ConsensusError::InvalidRevision);
    }

    // revisions are authorized by the contract's own unlock conditions
    let mut valid = 0u64;
    for (index, sig) in txn.signatures.iter().enumerate() {
        if sig.parent_id != revision.parent_id {
            continue;
        }
        let public_key = revision
            .unlock_conditions
            .public_keys
            .get(sig.public_key_index as usize)
            .ok_or(ConsensusError::InvalidSignature)?;
        let sig_hash = txn
            .sig_hash(index)
            .map_err(|_| ConsensusError::InvalidSignature)?;
        if !public_key.verify(sig_hash.as_bytes(), &sig.signature) {
            return Err(ConsensusError::InvalidSignature);
        }
        valid += 1;
    }
    if valid < revision.unlock_conditions.signatures_required {
        return Err(ConsensusError::MissingSignatures);
    }
    Ok(())
}
