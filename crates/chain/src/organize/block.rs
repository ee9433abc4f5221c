//! Block admission: storage, validation fan-out, candidacy, and confirmed
//! chain reorganization.

use std::sync::Arc;

use emberd_log::{log_debug, log_info};
use emberd_primitives::block::Block;
use emberd_storage::KeyValueStore;

use crate::chain::ChainCore;
use crate::error::ChainError;
use crate::store::PopulatedOutput;
use crate::subscribe::BlockEvent;
use crate::validate::{BlockValidator, UtxoView};

pub struct BlockOrganizer<S> {
    core: Arc<ChainCore<S>>,
    validator: BlockValidator,
}

impl<S: KeyValueStore> BlockOrganizer<S> {
    pub(crate) fn new(core: Arc<ChainCore<S>>) -> Self {
        let validator = BlockValidator::new(Arc::clone(&core.params));
        Self { core, validator }
    }

    /// Validate a block body against its candidate header, promote it
    /// toward confirmation, and reorganize the confirmed chain when the
    /// candidate work wins.
    pub fn organize(&self, block: Arc<Block>, height: u32) -> Result<(), ChainError> {
        if self.core.is_stopped() {
            return Err(ChainError::ServiceStopped);
        }
        self.validator.check(&block)?;

        let guard = self.core.mutex.lock_high_priority();
        let outcome = self.organize_locked(block, height);
        drop(guard);

        if let Some(event) = outcome? {
            self.core.block_subscribers.notify(&event);
        }
        Ok(())
    }

    fn organize_locked(
        &self,
        block: Arc<Block>,
        height: u32,
    ) -> Result<Option<BlockEvent>, ChainError> {
        let store = &self.core.store;
        let hash = block.hash();

        // Genesis is seeded at initialization, never organized.
        if height == 0 {
            return Err(ChainError::OperationFailed);
        }
        let entry = store
            .header_entry(&hash)?
            .ok_or(ChainError::OperationFailed)?;
        if entry.is_invalid() {
            // Sticky: no script work is repeated for a poisoned chain.
            return Err(ChainError::InvalidBlock("previously invalidated block"));
        }
        if store.height_hash(height, true)? != Some(hash) {
            return Err(ChainError::OperationFailed);
        }
        if entry.is_valid() {
            return Err(ChainError::DuplicateBlock);
        }
        // Invalidity propagates down from a poisoned ancestor.
        if let Some(parent) = store.header_entry(&entry.header.prev_block)? {
            if parent.is_invalid() {
                let error = ChainError::InvalidBlock("ancestor invalidated");
                store.invalidate_header(&hash, &error)?;
                return Err(error);
            }
        }

        if !entry.is_stored() {
            store.update(&block, height, self.core.settings.relay_transactions)?;
        }

        if self.core.is_stopped() {
            return Err(ChainError::ServiceStopped);
        }

        let parent_state = store.chain_state_at(height - 1, true, &self.core.params)?;
        let view = Arc::new(self.populate_view(&block, height)?);

        if let Err(error) = self
            .validator
            .accept(&block, height, &parent_state, &view)
        {
            return self.poison(&block, &error);
        }

        if self.core.is_stopped() {
            return Err(ChainError::ServiceStopped);
        }

        let connected = self.validator.connect(
            Arc::clone(&block),
            Arc::clone(&view),
            &parent_state,
            Arc::clone(&self.core.verifier),
            &self.core.priority_pool,
            Arc::clone(&self.core.stopped),
        );
        match connected {
            Ok(()) => {}
            Err(error) if error.is_sticky() => return self.poison(&block, &error),
            Err(error) => return Err(error),
        }

        store.candidate(&block, height)?;
        let valid_state = parent_state.promote(&block.header, &self.core.params);
        self.core.set_top_valid_candidate_state(valid_state);
        log_debug!("block validated at height {height}");

        if !self.core.is_reorganizable() {
            return Ok(None);
        }

        let fork = self.core.fork_point();
        let Some((incoming, outgoing, new_tip)) = store.reorganize_confirmed(&fork)? else {
            return Ok(None);
        };
        log_info!(
            "confirmed reorganization at fork height {}: {} in, {} out",
            fork.height,
            incoming.len(),
            outgoing.len()
        );
        self.core.refresh_after_confirmed_reorganize(&new_tip)?;

        {
            let mut pool = self.core.tx_pool.lock().expect("tx pool lock");
            for confirmed in &incoming {
                pool.purge_confirmed(&confirmed.txids());
            }
            // Displaced transactions return to the unconfirmed pool.
            for displaced in &outgoing {
                for tx in &displaced.transactions {
                    if !tx.is_coinbase() {
                        pool.add(Arc::new(tx.clone()));
                    }
                }
            }
        }

        Ok(Some(BlockEvent {
            code: 0,
            fork_height: fork.height,
            incoming: Arc::new(incoming),
            outgoing: Arc::new(outgoing),
        }))
    }

    /// Record sticky invalidity for the block and its unvalidated
    /// candidate ancestry, then surface the original error.
    fn poison(
        &self,
        block: &Block,
        error: &ChainError,
    ) -> Result<Option<BlockEvent>, ChainError> {
        self.core.store.invalidate(&block.hash(), error)?;
        Err(error.clone())
    }

    /// Assemble the prevout view: in-block outputs first, then the store's
    /// candidate index at the parent height.
    fn populate_view(&self, block: &Block, height: u32) -> Result<UtxoView, ChainError> {
        let mut view = UtxoView::new();
        for (position, tx) in block.transactions.iter().enumerate() {
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.vin {
                if view.get(&input.prevout).is_some() {
                    continue;
                }
                // Outputs created earlier in this block.
                if let Some(created) = block
                    .transactions[..position]
                    .iter()
                    .find(|candidate| candidate.txid() == input.prevout.hash)
                {
                    if let Some(output) = created.vout.get(input.prevout.index as usize) {
                        view.insert(
                            input.prevout,
                            PopulatedOutput {
                                value: output.value,
                                script_pubkey: output.script_pubkey.clone(),
                                height: Some(height),
                                coinbase: created.is_coinbase(),
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
                        .populate_output(&input.prevout, height - 1, true)?
                {
                    view.insert(input.prevout, populated);
                }
            }
        }
        Ok(view)
    }
}
