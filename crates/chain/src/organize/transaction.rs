//! Mempool admission under the low-priority lock.

use std::sync::Arc;

use emberd_consensus::money::MAX_MONEY;
use emberd_log::log_debug;
use emberd_primitives::transaction::Transaction;
use emberd_storage::KeyValueStore;

use crate::chain::ChainCore;
use crate::error::ChainError;
use crate::store::PopulatedOutput;
use crate::subscribe::TransactionEvent;
use crate::validate::{TransactionValidator, UtxoView};

pub struct TransactionOrganizer<S> {
    core: Arc<ChainCore<S>>,
    validator: TransactionValidator,
}

impl<S: KeyValueStore> TransactionOrganizer<S> {
    pub(crate) fn new(core: Arc<ChainCore<S>>) -> Self {
        Self {
            core,
            validator: TransactionValidator::new(),
        }
    }

    /// Admit an unconfirmed transaction to the pool after policy checks.
    /// Runs under the low-priority lock, yielding to consensus writers.
    pub fn organize(&self, tx: Arc<Transaction>) -> Result<(), ChainError> {
        self.validator.check(&tx, MAX_MONEY)?;

        let guard = self.core.mutex.lock_low_priority();
        let outcome = self.organize_locked(&tx);
        drop(guard);

        outcome?;
        self.core.transaction_subscribers.notify(&TransactionEvent {
            code: 0,
            transaction: Some(tx),
        });
        Ok(())
    }

    fn organize_locked(&self, tx: &Arc<Transaction>) -> Result<(), ChainError> {
        if self.core.is_stopped() {
            return Err(ChainError::ServiceStopped);
        }

        let txid = tx.txid();
        {
            let pool = self.core.tx_pool.lock().expect("tx pool lock");
            if pool.exists(&txid) {
                return Err(ChainError::DuplicateTransaction);
            }
        }
        if let Some(placement) = self.core.store.transaction_placement(&txid)? {
            if placement.is_confirmed() {
                return Err(ChainError::DuplicateTransaction);
            }
        }

        let state = self.core.next_confirmed_state();
        let view = Arc::new(self.populate_view(tx, state.height())?);
        let fees = self.validator.accept(tx, &state, &view)?;

        if self.core.is_stopped() {
            return Err(ChainError::ServiceStopped);
        }

        // Policy gates; rejection here is not sticky.
        if !self.sufficient_fee(tx, fees) {
            return Err(ChainError::InsufficientFee);
        }
        if tx.is_dusty(self.core.settings.minimum_output_satoshis) {
            return Err(ChainError::DustyTransaction);
        }

        self.validator.connect(
            Arc::clone(tx),
            view,
            &state,
            Arc::clone(&self.core.verifier),
            &self.core.priority_pool,
            Arc::clone(&self.core.stopped),
        )?;

        if self.core.is_stopped() {
            return Err(ChainError::ServiceStopped);
        }

        self.core.store.store_transaction(tx)?;
        self.core
            .tx_pool
            .lock()
            .expect("tx pool lock")
            .add(Arc::clone(tx));
        Ok(())
    }

    /// Assemble prevouts from the confirmed view and, with relay enabled,
    /// the unconfirmed pool for chained spends.
    fn populate_view(&self, tx: &Transaction, fork_height: u32) -> Result<UtxoView, ChainError> {
        let mut view = UtxoView::new();
        let pool = self.core.tx_pool.lock().expect("tx pool lock");
        for input in &tx.vin {
            if view.get(&input.prevout).is_some() {
                continue;
            }
            if pool.spender(&input.prevout).is_some() {
                return Err(ChainError::InvalidTransaction("mempool double spend"));
            }
            if self.core.settings.relay_transactions {
                if let Some((value, script_pubkey)) = pool.output(&input.prevout) {
                    view.insert(
                        input.prevout,
                        PopulatedOutput {
                            value,
                            script_pubkey,
                            height: None,
                            coinbase: false,
                            confirmed: false,
                            spent: false,
                        },
                    );
                    continue;
                }
            }
            if let Some(populated) =
                self.core
                    .store
                    .populate_output(&input.prevout, fork_height, false)?
            {
                view.insert(input.prevout, populated);
            }
        }
        Ok(view)
    }

    /// Mempool fee floor: zero-configured rates admit everything; any
    /// configured rate demands at least one satoshi.
    fn sufficient_fee(&self, tx: &Transaction, paid: i64) -> bool {
        let byte_fee = self.core.settings.byte_fee_satoshis;
        let sigop_fee = self.core.settings.sigop_fee_satoshis;
        if byte_fee == 0.0 && sigop_fee == 0.0 {
            return true;
        }

        let byte = if byte_fee > 0.0 {
            f64::from(byte_fee) * tx.serialized_size() as f64
        } else {
            0.0
        };
        let sigop = if sigop_fee > 0.0 {
            f64::from(sigop_fee) * f64::from(tx.sigops())
        } else {
            0.0
        };
        let price = ((byte + sigop) as u64).max(1);
        if paid >= 0 && paid as u64 >= price {
            return true;
        }

        log_debug!(
            "insufficient fee: bytes {} sigops {} price {} paid {}",
            tx.serialized_size(),
            tx.sigops(),
            price,
            paid
        );
        false
    }
}
