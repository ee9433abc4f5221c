//! Header admission: pool, accept, and candidate-index reorganization.

use std::sync::Arc;

use emberd_consensus::Checkpoint;
use emberd_log::log_debug;
use emberd_primitives::block::BlockHeader;
use emberd_storage::KeyValueStore;

use crate::chain::ChainCore;
use crate::error::ChainError;
use crate::subscribe::HeaderEvent;
use crate::validate::HeaderValidator;

pub struct HeaderOrganizer<S> {
    core: Arc<ChainCore<S>>,
    validator: HeaderValidator,
}

impl<S: KeyValueStore> HeaderOrganizer<S> {
    pub(crate) fn new(core: Arc<ChainCore<S>>) -> Self {
        let validator = HeaderValidator::new(
            Arc::clone(&core.params),
            core.settings.scrypt_proof_of_work,
        );
        Self { core, validator }
    }

    /// Validate a header and extend or reorganize the candidate index.
    pub fn organize(&self, header: Arc<BlockHeader>) -> Result<(), ChainError> {
        if self.core.is_stopped() {
            return Err(ChainError::ServiceStopped);
        }
        self.validator.check(&header)?;

        let guard = self.core.mutex.lock_high_priority();
        let outcome = self.organize_locked(header);
        drop(guard);

        // Notify outside the critical section.
        let event = outcome?;
        self.core.header_subscribers.notify(&event);
        Ok(())
    }

    fn organize_locked(&self, header: Arc<BlockHeader>) -> Result<HeaderEvent, ChainError> {
        let store = &self.core.store;
        let hash = header.hash();

        // Sticky invalidity disqualifies the header and anything atop it.
        if let Some(entry) = store.header_entry(&hash)? {
            if entry.is_invalid() {
                return Err(ChainError::InvalidHeader("previously invalidated header"));
            }
            if entry.is_indexed() {
                return Err(ChainError::DuplicateBlock);
            }
        }

        let branch = {
            let pool = self.core.header_pool.lock().expect("header pool lock");
            pool.get_branch(store, Arc::clone(&header))?
        };
        if branch.is_empty() {
            return Err(ChainError::DuplicateBlock);
        }

        // No path through an invalidated header may become candidate.
        if let Some(anchor) = store.header_entry(&branch.fork_hash)? {
            if anchor.is_invalid() {
                return Err(ChainError::InvalidHeader("previously invalidated header"));
            }
        }

        if self.core.is_stopped() {
            return Err(ChainError::ServiceStopped);
        }

        let fork_state = store.chain_state_at(branch.fork_height, true, &self.core.params)?;
        let top_state = self.validator.accept(&branch, &fork_state)?;

        // Consensus: the branch must strictly beat the candidate work above
        // its fork point. The walk caps at the branch work so a weak branch
        // costs O(branch length).
        let branch_work = branch.work();
        let required_work = store.get_work(branch.fork_height, true, Some(&branch_work))?;
        if branch_work <= required_work {
            let top = Arc::clone(branch.top().expect("nonempty branch"));
            let top_height = branch.top_height();
            self.core
                .header_pool
                .lock()
                .expect("header pool lock")
                .add(top, top_height);
            return Err(ChainError::InsufficientWork);
        }

        let fork = Checkpoint {
            hash: branch.fork_hash,
            height: branch.fork_height,
        };
        let outgoing = store.reorganize_headers(&fork, &branch.headers)?;
        log_debug!(
            "header reorganization at fork height {}: {} in, {} out",
            fork.height,
            branch.headers.len(),
            outgoing.len()
        );

        self.core.refresh_after_header_reorganize(top_state)?;

        {
            let mut pool = self.core.header_pool.lock().expect("header pool lock");
            // Displaced headers return to the pool so their fork can later
            // compete again from its true anchor. Poisoned ones stay out.
            for (offset, displaced) in outgoing.iter().enumerate() {
                let invalid = store
                    .header_entry(&displaced.hash())?
                    .is_some_and(|entry| entry.is_invalid());
                if !invalid {
                    pool.add(Arc::clone(displaced), fork.height + 1 + offset as u32);
                }
            }
            let fork_point = self.core.fork_point();
            pool.prune(
                store,
                fork_point.height,
                self.core.settings.reorg_pool_distance,
            )?;
        }

        Ok(HeaderEvent {
            code: 0,
            fork_height: fork.height,
            incoming: Arc::new(branch.headers),
            outgoing: Arc::new(outgoing),
        })
    }
}
