//! The chain facade: owns the store handle, the two tips, the cached
//! chain-state snapshots, the pools, and the three organizers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::{unbounded, Receiver, Sender};
use emberd_consensus::{Checkpoint, ConsensusParams, Hash256};
use emberd_log::log_info;
use emberd_primitives::block::{Block, BlockHeader};
use emberd_primitives::transaction::Transaction;
use emberd_storage::KeyValueStore;
use primitive_types::U256;

use crate::chain_state::ChainState;
use crate::error::ChainError;
use crate::organize::{BlockOrganizer, HeaderOrganizer, TransactionOrganizer};
use crate::pools::{HeaderPool, TransactionPool};
use crate::priority::{PrioritizedMutex, PriorityPool};
use crate::settings::Settings;
use crate::store::ChainStore;
use crate::subscribe::{BlockEvent, HeaderEvent, Resubscriber, TransactionEvent};
use crate::validate::{ScriptVerifier, StructuralVerifier};

/// Shared state behind the facade. Organizers hold a reference to this
/// rather than back-pointers into the facade itself.
pub(crate) struct ChainCore<S> {
    pub store: ChainStore<S>,
    pub params: Arc<ConsensusParams>,
    pub settings: Settings,
    pub verifier: Arc<dyn ScriptVerifier>,
    pub mutex: PrioritizedMutex,
    pub priority_pool: PriorityPool,
    pub stopped: Arc<AtomicBool>,
    pub header_pool: Mutex<HeaderPool>,
    pub tx_pool: Mutex<TransactionPool>,
    // Independent atomic slots; no cross-slot atomicity is guaranteed.
    fork_point: RwLock<Checkpoint>,
    candidate_work: RwLock<U256>,
    confirmed_work: RwLock<U256>,
    top_candidate_state: RwLock<Arc<ChainState>>,
    top_valid_candidate_state: RwLock<Arc<ChainState>>,
    next_confirmed_state: RwLock<Arc<ChainState>>,
    pub header_subscribers: Resubscriber<HeaderEvent>,
    pub block_subscribers: Resubscriber<BlockEvent>,
    pub transaction_subscribers: Resubscriber<TransactionEvent>,
    validation_sender: Sender<(Hash256, u32)>,
    validation_receiver: Receiver<(Hash256, u32)>,
}

impl<S: KeyValueStore> ChainCore<S> {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn fork_point(&self) -> Checkpoint {
        *self.fork_point.read().expect("fork point slot")
    }

    pub fn candidate_work(&self) -> U256 {
        *self.candidate_work.read().expect("candidate work slot")
    }

    pub fn confirmed_work(&self) -> U256 {
        *self.confirmed_work.read().expect("confirmed work slot")
    }

    /// Valid only while the caller holds the write mutex.
    pub fn is_reorganizable(&self) -> bool {
        self.candidate_work() > self.confirmed_work()
    }

    pub fn top_candidate_state(&self) -> Arc<ChainState> {
        Arc::clone(&self.top_candidate_state.read().expect("state slot"))
    }

    pub fn top_valid_candidate_state(&self) -> Arc<ChainState> {
        Arc::clone(&self.top_valid_candidate_state.read().expect("state slot"))
    }

    pub fn next_confirmed_state(&self) -> Arc<ChainState> {
        Arc::clone(&self.next_confirmed_state.read().expect("state slot"))
    }

    pub fn set_top_valid_candidate_state(&self, state: ChainState) {
        *self.top_valid_candidate_state.write().expect("state slot") = Arc::new(state);
    }

    /// Recompute the tip caches after the candidate index moved.
    pub fn refresh_after_header_reorganize(
        &self,
        top_candidate: ChainState,
    ) -> Result<(), ChainError> {
        let fork = self.store.fork_point()?;
        *self.fork_point.write().expect("fork point slot") = fork;
        self.refresh_works(&fork)?;
        *self.top_candidate_state.write().expect("state slot") = Arc::new(top_candidate);
        // The previous valid tip may sit on the displaced branch.
        let valid = self.store.top_valid()?;
        let valid_state = self
            .store
            .chain_state_at(valid.height, true, &self.params)?;
        *self.top_valid_candidate_state.write().expect("state slot") = Arc::new(valid_state);
        Ok(())
    }

    /// Recompute the tip caches after the confirmed index moved.
    pub fn refresh_after_confirmed_reorganize(
        &self,
        new_tip: &Checkpoint,
    ) -> Result<(), ChainError> {
        *self.fork_point.write().expect("fork point slot") = *new_tip;
        self.refresh_works(new_tip)?;
        let confirmed_state = self
            .store
            .chain_state_at(new_tip.height, false, &self.params)?;
        *self.next_confirmed_state.write().expect("state slot") = Arc::new(confirmed_state);
        Ok(())
    }

    fn refresh_works(&self, fork: &Checkpoint) -> Result<(), ChainError> {
        let candidate = self.store.get_work(fork.height, true, None)?;
        let confirmed = self.store.get_work(fork.height, false, None)?;
        *self.candidate_work.write().expect("candidate work slot") = candidate;
        *self.confirmed_work.write().expect("confirmed work slot") = confirmed;
        Ok(())
    }
}

/// A Bitcoin-like blockchain engine over a keyed store: a candidate header
/// chain and a confirmed block chain with most-accumulated-work
/// reorganization, plus mempool admission.
pub struct Chain<S> {
    core: Arc<ChainCore<S>>,
    header_organizer: HeaderOrganizer<S>,
    block_organizer: BlockOrganizer<S>,
    transaction_organizer: TransactionOrganizer<S>,
}

impl<S: KeyValueStore> Chain<S> {
    pub fn new(
        store: Arc<S>,
        params: ConsensusParams,
        settings: Settings,
        genesis: &Block,
    ) -> Result<Self, ChainError> {
        Self::with_verifier(store, params, settings, genesis, Arc::new(StructuralVerifier))
    }

    pub fn with_verifier(
        store: Arc<S>,
        params: ConsensusParams,
        settings: Settings,
        genesis: &Block,
        verifier: Arc<dyn ScriptVerifier>,
    ) -> Result<Self, ChainError> {
        let chain_store = ChainStore::new(store);
        if !chain_store.is_initialized()? {
            chain_store.initialize(genesis)?;
            log_info!("store initialized at genesis");
        }

        let params = Arc::new(params);
        let fork = chain_store.fork_point()?;
        let candidate_work = chain_store.get_work(fork.height, true, None)?;
        let confirmed_work = chain_store.get_work(fork.height, false, None)?;

        let candidate_tip = chain_store.top(true)?;
        let top_candidate = chain_store.chain_state_at(candidate_tip.height, true, &params)?;
        let valid_tip = chain_store.top_valid()?;
        let top_valid = chain_store.chain_state_at(valid_tip.height, true, &params)?;
        let confirmed_tip = chain_store.top(false)?;
        let next_confirmed = chain_store.chain_state_at(confirmed_tip.height, false, &params)?;

        let (validation_sender, validation_receiver) = unbounded();
        let core = Arc::new(ChainCore {
            store: chain_store,
            params,
            priority_pool: PriorityPool::new(settings.priority_threads),
            header_pool: Mutex::new(HeaderPool::new()),
            tx_pool: Mutex::new(TransactionPool::new(settings.tx_pool_capacity_bytes)),
            settings,
            verifier,
            mutex: PrioritizedMutex::new(),
            stopped: Arc::new(AtomicBool::new(true)),
            fork_point: RwLock::new(fork),
            candidate_work: RwLock::new(candidate_work),
            confirmed_work: RwLock::new(confirmed_work),
            top_candidate_state: RwLock::new(Arc::new(top_candidate)),
            top_valid_candidate_state: RwLock::new(Arc::new(top_valid)),
            next_confirmed_state: RwLock::new(Arc::new(next_confirmed)),
            header_subscribers: Resubscriber::new(),
            block_subscribers: Resubscriber::new(),
            transaction_subscribers: Resubscriber::new(),
            validation_sender,
            validation_receiver,
        });

        Ok(Self {
            header_organizer: HeaderOrganizer::new(Arc::clone(&core)),
            block_organizer: BlockOrganizer::new(Arc::clone(&core)),
            transaction_organizer: TransactionOrganizer::new(Arc::clone(&core)),
            core,
        })
    }

    // Startup and shutdown.
    // ------------------------------------------------------------------

    pub fn start(&self) -> bool {
        self.core.stopped.store(false, Ordering::Release);
        true
    }

    /// Idempotent. Parked validations complete with `ServiceStopped`.
    pub fn stop(&self) -> bool {
        self.core.stopped.store(true, Ordering::Release);
        true
    }

    /// Release the store handle. Callers join their worker threads first.
    pub fn close(self) -> bool {
        self.stop();
        drop(self);
        true
    }

    // Organizers.
    // ------------------------------------------------------------------

    /// Organize a header into the candidate chain.
    pub fn organize_header(&self, header: Arc<BlockHeader>) -> Result<(), ChainError> {
        self.header_organizer.organize(header)
    }

    /// Store a block's transactions and organize toward confirmation.
    pub fn organize_block(&self, block: Arc<Block>, height: u32) -> Result<(), ChainError> {
        self.block_organizer.organize(block, height)
    }

    /// Admit a transaction to the unconfirmed pool.
    pub fn organize_transaction(&self, tx: Arc<Transaction>) -> Result<(), ChainError> {
        self.transaction_organizer.organize(tx)
    }

    // Readers. Thread safe; none acquire the write mutex.
    // ------------------------------------------------------------------

    pub fn get_top(&self, candidate: bool) -> Result<Checkpoint, ChainError> {
        self.core.store.top(candidate)
    }

    pub fn get_header(&self, height: u32, candidate: bool) -> Result<Option<BlockHeader>, ChainError> {
        self.core.store.header_at(height, candidate)
    }

    pub fn get_block(&self, height: u32, candidate: bool) -> Result<Option<Block>, ChainError> {
        self.core.store.block_at(height, candidate)
    }

    pub fn get_block_hash(&self, height: u32, candidate: bool) -> Result<Option<Hash256>, ChainError> {
        self.core.store.height_hash(height, candidate)
    }

    /// State flag byte for a block by hash; zero when unknown.
    pub fn get_block_state(&self, hash: &Hash256) -> Result<u8, ChainError> {
        self.core.store.block_state(hash)
    }

    pub fn get_block_state_at(&self, height: u32, candidate: bool) -> Result<u8, ChainError> {
        self.core.store.block_state_at(height, candidate)
    }

    /// The sticky error recorded against an invalidated block.
    pub fn get_block_error(&self, hash: &Hash256) -> Result<Option<ChainError>, ChainError> {
        self.core.store.block_error(hash)
    }

    /// Accumulated work above `above_height`, stopping early at `cap`.
    pub fn get_work(
        &self,
        above_height: u32,
        candidate: bool,
        cap: Option<&U256>,
    ) -> Result<U256, ChainError> {
        self.core.store.get_work(above_height, candidate, cap)
    }

    pub fn get_downloadable(&self, height: u32) -> Result<Option<Hash256>, ChainError> {
        self.core.store.get_downloadable(height)
    }

    pub fn get_validatable(&self, height: u32) -> Result<Option<Hash256>, ChainError> {
        self.core.store.get_validatable(height)
    }

    /// Queue a validatable block identifier for the download/validation
    /// driver listening on [`Chain::validation_queue`].
    pub fn prime_validation(&self, hash: Hash256, height: u32) {
        let _ = self.core.validation_sender.send((hash, height));
    }

    pub fn validation_queue(&self) -> Receiver<(Hash256, u32)> {
        self.core.validation_receiver.clone()
    }

    // Properties.
    // ------------------------------------------------------------------

    /// Highest indexed position where candidate and confirmed chains agree.
    pub fn fork_point(&self) -> Checkpoint {
        self.core.fork_point()
    }

    pub fn candidate_work(&self) -> U256 {
        self.core.candidate_work()
    }

    pub fn confirmed_work(&self) -> U256 {
        self.core.confirmed_work()
    }

    /// Candidate work strictly exceeds confirmed work, read consistently
    /// under the write mutex.
    pub fn is_reorganizable(&self) -> bool {
        let _guard = self.core.mutex.lock_high_priority();
        self.core.is_reorganizable()
    }

    pub fn top_candidate_state(&self) -> Arc<ChainState> {
        self.core.top_candidate_state()
    }

    pub fn top_valid_candidate_state(&self) -> Arc<ChainState> {
        self.core.top_valid_candidate_state()
    }

    pub fn next_confirmed_state(&self) -> Arc<ChainState> {
        self.core.next_confirmed_state()
    }

    pub fn is_candidates_stale(&self) -> bool {
        self.core
            .top_candidate_state()
            .is_stale(self.core.settings.notify_limit_hours)
    }

    pub fn is_validated_stale(&self) -> bool {
        self.core
            .top_valid_candidate_state()
            .is_stale(self.core.settings.notify_limit_hours)
    }

    pub fn is_blocks_stale(&self) -> bool {
        self.core
            .next_confirmed_state()
            .is_stale(self.core.settings.notify_limit_hours)
    }

    pub fn settings(&self) -> &Settings {
        &self.core.settings
    }

    // Subscribers.
    // ------------------------------------------------------------------

    pub fn subscribe_headers<F>(&self, handler: F)
    where
        F: Fn(&HeaderEvent) -> bool + Send + 'static,
    {
        self.core.header_subscribers.subscribe(handler);
    }

    pub fn subscribe_blocks<F>(&self, handler: F)
    where
        F: Fn(&BlockEvent) -> bool + Send + 'static,
    {
        self.core.block_subscribers.subscribe(handler);
    }

    pub fn subscribe_transactions<F>(&self, handler: F)
    where
        F: Fn(&TransactionEvent) -> bool + Send + 'static,
    {
        self.core.transaction_subscribers.subscribe(handler);
    }

    /// Broadcast a null success terminator to all subscribers and clear
    /// the lists.
    pub fn unsubscribe(&self) {
        self.core.header_subscribers.stop(&HeaderEvent::terminator());
        self.core.block_subscribers.stop(&BlockEvent::terminator());
        self.core
            .transaction_subscribers
            .stop(&TransactionEvent::terminator());
    }
}
