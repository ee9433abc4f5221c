//! Mempool transaction validation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use emberd_consensus::constants::{COINBASE_MATURITY, MAX_TX_SIZE};
use emberd_consensus::forks::FORK_BIP113;
use emberd_consensus::money::Amount;
use emberd_primitives::transaction::Transaction;
use rayon::prelude::*;

use crate::chain_state::ChainState;
use crate::error::ChainError;
use crate::priority::{CompletionLatch, PriorityPool};
use crate::validate::{ScriptVerifier, UtxoView};

pub struct TransactionValidator;

impl TransactionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Context-free checks with the configured money cap.
    pub fn check(&self, tx: &Transaction, max_money: Amount) -> Result<(), ChainError> {
        if tx.vin.is_empty() {
            return Err(ChainError::InvalidTransaction("transaction has no inputs"));
        }
        if tx.vout.is_empty() {
            return Err(ChainError::InvalidTransaction("transaction has no outputs"));
        }
        if tx.is_coinbase() {
            return Err(ChainError::InvalidTransaction("coinbase in mempool"));
        }
        if tx.serialized_size() > MAX_TX_SIZE as usize {
            return Err(ChainError::InvalidTransaction(
                "transaction exceeds maximum size",
            ));
        }
        let mut total: Amount = 0;
        for output in &tx.vout {
            if output.value < 0 || output.value > max_money {
                return Err(ChainError::InvalidTransaction("output value out of range"));
            }
            total = total
                .checked_add(output.value)
                .ok_or(ChainError::InvalidTransaction("output value overflow"))?;
            if total > max_money {
                return Err(ChainError::InvalidTransaction("output total out of range"));
            }
        }
        let mut outpoints = HashSet::new();
        for input in &tx.vin {
            if input.prevout.is_null() {
                return Err(ChainError::InvalidTransaction("null previous output"));
            }
            if !outpoints.insert(input.prevout) {
                return Err(ChainError::InvalidTransaction("duplicate input"));
            }
        }
        Ok(())
    }

    /// Contextual checks against the next-confirmed state. Returns fees.
    pub fn accept(
        &self,
        tx: &Transaction,
        state: &ChainState,
        view: &UtxoView,
    ) -> Result<i64, ChainError> {
        let height = state.height() + 1;
        let forks = state.forks_next();
        let time_cutoff = if forks.active(FORK_BIP113) {
            state.median_time_past()
        } else {
            state.time()
        };
        if !tx.is_final(height as i32, time_cutoff) {
            return Err(ChainError::InvalidTransaction("non-final transaction"));
        }

        let mut value_in = 0i64;
        for input in &tx.vin {
            let Some(prevout) = view.get(&input.prevout) else {
                return Err(ChainError::InvalidTransaction("missing input"));
            };
            if prevout.spent {
                return Err(ChainError::InvalidTransaction("double spend"));
            }
            if prevout.coinbase {
                let created = prevout.height.unwrap_or(height);
                if height.saturating_sub(created) < COINBASE_MATURITY as u32 {
                    return Err(ChainError::InvalidTransaction("premature coinbase spend"));
                }
            }
            value_in = value_in
                .checked_add(prevout.value)
                .ok_or(ChainError::InvalidTransaction("input value overflow"))?;
        }
        let value_out = tx
            .total_output_value()
            .ok_or(ChainError::InvalidTransaction("output value overflow"))?;
        if value_out > value_in {
            return Err(ChainError::InvalidTransaction("spends exceed inputs"));
        }
        Ok(value_in - value_out)
    }

    /// Script fan-out over the priority pool; the caller parks on the
    /// latch on its original thread.
    pub fn connect(
        &self,
        tx: Arc<Transaction>,
        view: Arc<UtxoView>,
        state: &ChainState,
        verifier: Arc<dyn ScriptVerifier>,
        pool: &PriorityPool,
        stopped: Arc<AtomicBool>,
    ) -> Result<(), ChainError> {
        let forks = state.forks_next();
        let inputs: Vec<usize> = (0..tx.vin.len()).collect();
        let latch = CompletionLatch::new();
        let completer = latch.completer();
        pool.dispatch(move || {
            let result = inputs.into_par_iter().try_for_each(|input_index| {
                if stopped.load(Ordering::Acquire) {
                    return Err(ChainError::ServiceStopped);
                }
                let prevout = view
                    .get(&tx.vin[input_index].prevout)
                    .ok_or(ChainError::InvalidTransaction("missing input"))?;
                verifier
                    .verify(&tx, input_index, prevout, forks)
                    .map_err(ChainError::InvalidTransaction)
            });
            completer.complete(result);
        });
        latch.wait()
    }
}

impl Default for TransactionValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberd_consensus::money::MAX_MONEY;
    use emberd_primitives::outpoint::OutPoint;
    use emberd_primitives::transaction::{TxIn, TxOut};

    fn spend(value: i64) -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint {
                    hash: [3u8; 32],
                    index: 0,
                },
                script_sig: vec![0x01],
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn check_rejects_coinbase() {
        let validator = TransactionValidator::new();
        let mut tx = spend(1_000);
        tx.vin[0].prevout = OutPoint::null();
        assert_eq!(
            validator.check(&tx, MAX_MONEY),
            Err(ChainError::InvalidTransaction("coinbase in mempool"))
        );
    }

    #[test]
    fn check_rejects_duplicate_inputs() {
        let validator = TransactionValidator::new();
        let mut tx = spend(1_000);
        tx.vin.push(tx.vin[0].clone());
        assert_eq!(
            validator.check(&tx, MAX_MONEY),
            Err(ChainError::InvalidTransaction("duplicate input"))
        );
    }

    #[test]
    fn check_rejects_overcap_output() {
        let validator = TransactionValidator::new();
        let tx = spend(1_000);
        assert_eq!(
            validator.check(&tx, 999),
            Err(ChainError::InvalidTransaction("output value out of range"))
        );
    }
}
