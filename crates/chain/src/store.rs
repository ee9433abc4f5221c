//! Chain store adapter: header index, chain indices, transactions, spends.
//!
//! Every writer builds one [`WriteBatch`] and commits it with a single
//! `write_batch` call, which is the atomicity unit. A failed commit leaves
//! the batch unapplied on sane backends, but the store contract treats any
//! writer failure as corruption: the error is logged fatal and surfaced as
//! [`ChainError::StoreCorrupted`].

use std::sync::Arc;

use emberd_consensus::{Checkpoint, ConsensusParams, Hash256};
use emberd_log::log_error;
use emberd_pow::difficulty::block_proof;
use emberd_primitives::block::{Block, BlockHeader, HEADER_SIZE};
use emberd_primitives::encoding::{Decoder, Encoder};
use emberd_primitives::outpoint::OutPoint;
use emberd_primitives::transaction::Transaction;
use emberd_storage::{Column, KeyValueStore, WriteBatch};
use primitive_types::U256;

use crate::chain_state::ChainState;
use crate::error::ChainError;

// Block state flags, one byte per indexed header.
pub const STATE_INDEXED: u8 = 1 << 0;
pub const STATE_STORED: u8 = 1 << 1;
pub const STATE_VALID: u8 = 1 << 2;
pub const STATE_INVALID: u8 = 1 << 3;
pub const STATE_FAILED: u8 = 1 << 4;
pub const STATE_CANDIDATE: u8 = 1 << 5;
pub const STATE_CONFIRMED: u8 = 1 << 6;

const SPEND_CANDIDATE: u8 = 1 << 0;
const SPEND_CONFIRMED: u8 = 1 << 1;

// Transaction placement states.
const TX_POOLED: u8 = 0;
const TX_PLACED: u8 = 1;
const TX_CONFIRMED: u8 = 2;

const NO_HEIGHT: u32 = u32::MAX;

const META_CANDIDATE_TIP: &[u8] = b"candidate_tip";
const META_CONFIRMED_TIP: &[u8] = b"confirmed_tip";
const META_FORK_POINT: &[u8] = b"fork_point";

/// Per-header index entry: the header itself, its height, the cumulative
/// chainwork through it, the state flag byte, and the sticky error code.
#[derive(Clone, Debug)]
pub struct HeaderEntry {
    pub header: BlockHeader,
    pub height: u32,
    pub work: [u8; 32],
    pub state: u8,
    pub error_code: u8,
}

impl HeaderEntry {
    pub fn work_value(&self) -> U256 {
        U256::from_big_endian(&self.work)
    }

    pub fn is_indexed(&self) -> bool {
        self.state & STATE_INDEXED != 0
    }

    pub fn is_stored(&self) -> bool {
        self.state & STATE_STORED != 0
    }

    pub fn is_valid(&self) -> bool {
        self.state & STATE_VALID != 0
    }

    pub fn is_invalid(&self) -> bool {
        self.state & STATE_INVALID != 0
    }

    pub fn is_candidate(&self) -> bool {
        self.state & STATE_CANDIDATE != 0
    }

    pub fn is_confirmed(&self) -> bool {
        self.state & STATE_CONFIRMED != 0
    }
}

/// An output fetched for validation, carrying the placement metadata the
/// accept/connect phases need.
#[derive(Clone, Debug)]
pub struct PopulatedOutput {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    /// Height the creating transaction was placed at; `None` while pooled.
    pub height: Option<u32>,
    pub coinbase: bool,
    pub confirmed: bool,
    pub spent: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionPlacement {
    pub height: u32,
    pub position: u32,
    pub state: u8,
}

impl TransactionPlacement {
    pub fn is_confirmed(&self) -> bool {
        self.state == TX_CONFIRMED
    }
}

pub struct ChainStore<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> ChainStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // Bootstrap.
    // ------------------------------------------------------------------

    pub fn is_initialized(&self) -> Result<bool, ChainError> {
        Ok(self.store.get(Column::Meta, META_CANDIDATE_TIP)?.is_some())
    }

    /// Seed an empty store with the genesis block on both chains.
    pub fn initialize(&self, genesis: &Block) -> Result<(), ChainError> {
        let hash = genesis.hash();
        let work = block_proof(genesis.header.bits).map_err(|_| ChainError::OperationFailed)?;
        let entry = HeaderEntry {
            header: genesis.header.clone(),
            height: 0,
            work: work.to_big_endian(),
            state: STATE_INDEXED
                | STATE_STORED
                | STATE_VALID
                | STATE_CANDIDATE
                | STATE_CONFIRMED,
            error_code: 0,
        };

        let mut batch = WriteBatch::new();
        batch.put(Column::HeaderIndex, hash, encode_header_entry(&entry));
        batch.put(Column::CandidateIndex, height_key(0), hash);
        batch.put(Column::ConfirmedIndex, height_key(0), hash);
        batch.put(Column::Meta, META_CANDIDATE_TIP, hash);
        batch.put(Column::Meta, META_CONFIRMED_TIP, hash);
        batch.put(
            Column::Meta,
            META_FORK_POINT,
            encode_checkpoint(&Checkpoint { hash, height: 0 }),
        );
        self.put_block_transactions(&mut batch, genesis, 0, TX_CONFIRMED, false)?;
        self.commit(batch)
    }

    // Readers.
    // ------------------------------------------------------------------

    pub fn header_entry(&self, hash: &Hash256) -> Result<Option<HeaderEntry>, ChainError> {
        let bytes = match self.store.get(Column::HeaderIndex, hash)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        decode_header_entry(&bytes).map(Some)
    }

    /// State flag byte for a block by hash; zero when unknown.
    pub fn block_state(&self, hash: &Hash256) -> Result<u8, ChainError> {
        Ok(self.header_entry(hash)?.map(|entry| entry.state).unwrap_or(0))
    }

    pub fn block_state_at(&self, height: u32, candidate: bool) -> Result<u8, ChainError> {
        match self.height_hash(height, candidate)? {
            Some(hash) => self.block_state(&hash),
            None => Ok(0),
        }
    }

    /// The sticky error recorded against an invalidated block.
    pub fn block_error(&self, hash: &Hash256) -> Result<Option<ChainError>, ChainError> {
        Ok(self
            .header_entry(hash)?
            .filter(|entry| entry.is_invalid())
            .and_then(|entry| ChainError::from_code(entry.error_code)))
    }

    pub fn height_hash(&self, height: u32, candidate: bool) -> Result<Option<Hash256>, ChainError> {
        let column = index_column(candidate);
        let bytes = match self.store.get(column, &height_key(height))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        decode_hash(&bytes).map(Some)
    }

    pub fn top(&self, candidate: bool) -> Result<Checkpoint, ChainError> {
        let key = if candidate {
            META_CANDIDATE_TIP
        } else {
            META_CONFIRMED_TIP
        };
        let hash = match self.store.get(Column::Meta, key)? {
            Some(bytes) => decode_hash(&bytes)?,
            None => return Err(ChainError::OperationFailed),
        };
        let entry = self
            .header_entry(&hash)?
            .ok_or(ChainError::OperationFailed)?;
        Ok(Checkpoint {
            hash,
            height: entry.height,
        })
    }

    /// Highest candidate position whose block has passed connect.
    pub fn top_valid(&self) -> Result<Checkpoint, ChainError> {
        let tip = self.top(true)?;
        let mut height = tip.height;
        loop {
            let hash = self
                .height_hash(height, true)?
                .ok_or(ChainError::OperationFailed)?;
            let entry = self
                .header_entry(&hash)?
                .ok_or(ChainError::OperationFailed)?;
            if entry.is_valid() {
                return Ok(Checkpoint { hash, height });
            }
            if height == 0 {
                return Err(ChainError::OperationFailed);
            }
            height -= 1;
        }
    }

    pub fn header_at(&self, height: u32, candidate: bool) -> Result<Option<BlockHeader>, ChainError> {
        match self.height_hash(height, candidate)? {
            Some(hash) => Ok(self.header_entry(&hash)?.map(|entry| entry.header)),
            None => Ok(None),
        }
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        let entry = match self.header_entry(hash)? {
            Some(entry) if entry.is_stored() => entry,
            _ => return Ok(None),
        };
        let txids = match self.store.get(Column::BlockTx, hash)? {
            Some(bytes) => decode_txid_list(&bytes)?,
            None => return Ok(None),
        };
        let mut transactions = Vec::with_capacity(txids.len());
        for txid in &txids {
            let tx = self
                .transaction(txid)?
                .ok_or(ChainError::OperationFailed)?;
            transactions.push(tx);
        }
        Ok(Some(Block {
            header: entry.header,
            transactions,
        }))
    }

    pub fn block_at(&self, height: u32, candidate: bool) -> Result<Option<Block>, ChainError> {
        match self.height_hash(height, candidate)? {
            Some(hash) => self.block_by_hash(&hash),
            None => Ok(None),
        }
    }

    pub fn transaction(&self, txid: &Hash256) -> Result<Option<Transaction>, ChainError> {
        let bytes = match self.store.get(Column::Tx, txid)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        Transaction::consensus_decode(&bytes).map(Some).map_err(|_| ChainError::OperationFailed)
    }

    pub fn transaction_placement(
        &self,
        txid: &Hash256,
    ) -> Result<Option<TransactionPlacement>, ChainError> {
        let bytes = match self.store.get(Column::TxMeta, txid)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        decode_tx_meta(&bytes).map(Some)
    }

    /// Accumulated work strictly above `above_height` on the selected
    /// chain, stopping early once the sum meets `cap`. Early termination
    /// keeps weak-branch rejection proportional to the branch length.
    pub fn get_work(
        &self,
        above_height: u32,
        candidate: bool,
        cap: Option<&U256>,
    ) -> Result<U256, ChainError> {
        let tip = self.top(candidate)?;
        let mut sum = U256::zero();
        let mut height = tip.height;
        while height > above_height {
            if let Some(cap) = cap {
                if sum >= *cap {
                    return Ok(sum);
                }
            }
            let hash = self
                .height_hash(height, candidate)?
                .ok_or(ChainError::OperationFailed)?;
            let entry = self
                .header_entry(&hash)?
                .ok_or(ChainError::OperationFailed)?;
            let proof =
                block_proof(entry.header.bits).map_err(|_| ChainError::OperationFailed)?;
            sum = sum.saturating_add(proof);
            height -= 1;
        }
        Ok(sum)
    }

    /// Hash of the candidate block at `height` that is indexed but not yet
    /// stored; `None` if absent, stored, or failed.
    pub fn get_downloadable(&self, height: u32) -> Result<Option<Hash256>, ChainError> {
        let Some(hash) = self.height_hash(height, true)? else {
            return Ok(None);
        };
        let Some(entry) = self.header_entry(&hash)? else {
            return Ok(None);
        };
        if entry.is_indexed() && !entry.is_stored() && !entry.is_invalid() {
            Ok(Some(hash))
        } else {
            Ok(None)
        }
    }

    /// Hash of the candidate block at `height` that is stored but not yet
    /// validated; `None` if absent, unvalidatable, or already decided.
    pub fn get_validatable(&self, height: u32) -> Result<Option<Hash256>, ChainError> {
        let Some(hash) = self.height_hash(height, true)? else {
            return Ok(None);
        };
        let Some(entry) = self.header_entry(&hash)? else {
            return Ok(None);
        };
        if entry.is_stored() && !entry.is_valid() && !entry.is_invalid() {
            Ok(Some(hash))
        } else {
            Ok(None)
        }
    }

    pub fn fork_point(&self) -> Result<Checkpoint, ChainError> {
        let bytes = self
            .store
            .get(Column::Meta, META_FORK_POINT)?
            .ok_or(ChainError::OperationFailed)?;
        decode_checkpoint(&bytes)
    }

    /// Cold-path chain-state computation from indexed headers.
    pub fn chain_state_at(
        &self,
        height: u32,
        candidate: bool,
        params: &ConsensusParams,
    ) -> Result<ChainState, ChainError> {
        let tip_header = self
            .header_at(height, candidate)?
            .ok_or(ChainError::OperationFailed)?;

        let first = height.saturating_sub(10);
        let mut timestamps = Vec::with_capacity((height - first + 1) as usize);
        for h in first..=height {
            let header = self
                .header_at(h, candidate)?
                .ok_or(ChainError::OperationFailed)?;
            timestamps.push(header.time);
        }

        let boundary = height - height % params.retargeting_interval;
        let retarget_time = self
            .header_at(boundary, candidate)?
            .ok_or(ChainError::OperationFailed)?
            .time;

        Ok(ChainState::from_parts(
            height,
            &tip_header,
            timestamps,
            retarget_time,
            params,
        ))
    }

    /// Fetch the referenced output with spent-at-fork metadata. `candidate`
    /// selects which spend marks count against the view.
    pub fn populate_output(
        &self,
        outpoint: &OutPoint,
        fork_height: u32,
        candidate: bool,
    ) -> Result<Option<PopulatedOutput>, ChainError> {
        let Some(tx) = self.transaction(&outpoint.hash)? else {
            return Ok(None);
        };
        let Some(output) = tx.vout.get(outpoint.index as usize) else {
            return Ok(None);
        };
        let placement = self.transaction_placement(&outpoint.hash)?;
        let (height, coinbase, confirmed) = match placement {
            Some(meta) if meta.state != TX_POOLED => (
                Some(meta.height),
                meta.position == 0,
                meta.state == TX_CONFIRMED,
            ),
            _ => (None, false, false),
        };

        let spent = match self.store.get(Column::Spend, &outpoint.key())? {
            Some(bytes) => {
                let (_, spend_height, flags) = decode_spend(&bytes)?;
                let mask = if candidate {
                    SPEND_CANDIDATE | SPEND_CONFIRMED
                } else {
                    SPEND_CONFIRMED
                };
                flags & mask != 0 && spend_height <= fork_height
            }
            None => false,
        };

        Ok(Some(PopulatedOutput {
            value: output.value,
            script_pubkey: output.script_pubkey.clone(),
            height,
            coinbase,
            confirmed,
            spent,
        }))
    }

    // Writers. All failures are fatal for the store.
    // ------------------------------------------------------------------

    /// Persist a block body under its already-indexed candidate header.
    pub fn update(&self, block: &Block, height: u32, relay: bool) -> Result<(), ChainError> {
        let hash = block.hash();
        let mut entry = self
            .header_entry(&hash)?
            .ok_or(ChainError::OperationFailed)?;
        let mut batch = WriteBatch::new();
        self.put_block_transactions(&mut batch, block, height, TX_PLACED, relay)?;
        entry.state |= STATE_STORED;
        batch.put(Column::HeaderIndex, hash, encode_header_entry(&entry));
        self.commit(batch)
    }

    /// Mark a block invalid, along with every unvalidated candidate
    /// ancestor above the fork point. Sticky.
    pub fn invalidate(&self, hash: &Hash256, error: &ChainError) -> Result<(), ChainError> {
        let fork = self.fork_point()?;
        let mut batch = WriteBatch::new();
        let mut current = *hash;
        loop {
            let Some(mut entry) = self.header_entry(&current)? else {
                break;
            };
            let decided = entry.is_valid() || entry.is_confirmed() || entry.is_invalid();
            if current != *hash && (decided || entry.height <= fork.height) {
                break;
            }
            entry.state |= STATE_INVALID;
            entry.error_code = error.code();
            let parent = entry.header.prev_block;
            batch.put(Column::HeaderIndex, current, encode_header_entry(&entry));
            current = parent;
        }
        self.commit(batch)
    }

    /// Record a sticky invalid mark against a single header.
    pub fn invalidate_header(&self, hash: &Hash256, error: &ChainError) -> Result<(), ChainError> {
        let mut entry = self
            .header_entry(hash)?
            .ok_or(ChainError::OperationFailed)?;
        entry.state |= STATE_INVALID;
        entry.error_code = error.code();
        let mut batch = WriteBatch::new();
        batch.put(Column::HeaderIndex, *hash, encode_header_entry(&entry));
        self.commit(batch)
    }

    /// Mark a validated block's outputs spent in the candidate index.
    pub fn candidate(&self, block: &Block, height: u32) -> Result<(), ChainError> {
        let hash = block.hash();
        let mut entry = self
            .header_entry(&hash)?
            .ok_or(ChainError::OperationFailed)?;
        let mut batch = WriteBatch::new();
        entry.state |= STATE_VALID;
        batch.put(Column::HeaderIndex, hash, encode_header_entry(&entry));
        self.mark_spends(&mut batch, block, height, SPEND_CANDIDATE, true)?;
        self.commit(batch)
    }

    /// Rewind the candidate index to the fork point and append the new
    /// branch, undoing and remarking candidate spend transitions. Returns
    /// the displaced headers, tip first order reversed to ascending.
    pub fn reorganize_headers(
        &self,
        fork: &Checkpoint,
        incoming: &[Arc<BlockHeader>],
    ) -> Result<Vec<Arc<BlockHeader>>, ChainError> {
        let tip = self.top(true)?;
        let mut batch = WriteBatch::new();
        let mut outgoing: Vec<Arc<BlockHeader>> = Vec::new();

        let mut height = tip.height;
        while height > fork.height {
            let hash = self
                .height_hash(height, true)?
                .ok_or(ChainError::OperationFailed)?;
            let mut entry = self
                .header_entry(&hash)?
                .ok_or(ChainError::OperationFailed)?;
            // Undo candidate spend marks for validated bodies.
            if entry.is_valid() && entry.is_stored() {
                if let Some(block) = self.block_by_hash(&hash)? {
                    self.mark_spends(&mut batch, &block, entry.height, SPEND_CANDIDATE, false)?;
                }
            }
            // Displaced headers leave the candidate index entirely; the
            // organizer re-pools them so a future branch can anchor below
            // them with a correct work comparison.
            entry.state &= !(STATE_CANDIDATE | STATE_INDEXED);
            batch.put(Column::HeaderIndex, hash, encode_header_entry(&entry));
            batch.delete(Column::CandidateIndex, height_key(height));
            outgoing.push(Arc::new(entry.header));
            height -= 1;
        }
        outgoing.reverse();

        let fork_entry = self
            .header_entry(&fork.hash)?
            .ok_or(ChainError::OperationFailed)?;
        let mut work = fork_entry.work_value();
        let mut height = fork.height;
        let mut tip_hash = fork.hash;

        for header in incoming {
            height += 1;
            let hash = header.hash();
            let proof = block_proof(header.bits).map_err(|_| ChainError::OperationFailed)?;
            work = work.saturating_add(proof);

            let existing = self.header_entry(&hash)?;
            let (mut state, error_code) = match &existing {
                Some(entry) => (entry.state, entry.error_code),
                None => (0, 0),
            };
            state |= STATE_INDEXED | STATE_CANDIDATE;
            let entry = HeaderEntry {
                header: (**header).clone(),
                height,
                work: work.to_big_endian(),
                state,
                error_code,
            };
            // Remark spends for bodies that were validated on a prior stint
            // in the candidate index.
            if entry.is_valid() && entry.is_stored() {
                if let Some(block) = self.block_by_hash(&hash)? {
                    self.mark_spends(&mut batch, &block, height, SPEND_CANDIDATE, true)?;
                }
            }
            batch.put(Column::HeaderIndex, hash, encode_header_entry(&entry));
            batch.put(Column::CandidateIndex, height_key(height), hash);
            tip_hash = hash;
        }

        batch.put(Column::Meta, META_CANDIDATE_TIP, tip_hash);

        // The chains can only agree up to the branch's anchor now.
        let fork_point = self.fork_point()?;
        if fork.height < fork_point.height {
            batch.put(Column::Meta, META_FORK_POINT, encode_checkpoint(fork));
        }

        self.commit(batch)?;
        Ok(outgoing)
    }

    /// Swap the confirmed index to the validated candidate prefix above the
    /// fork point. No-op when the confirmable work does not exceed the
    /// confirmed work above the fork. Returns `(incoming, outgoing, new
    /// fork point)`.
    #[allow(clippy::type_complexity)]
    pub fn reorganize_confirmed(
        &self,
        fork: &Checkpoint,
    ) -> Result<Option<(Vec<Arc<Block>>, Vec<Arc<Block>>, Checkpoint)>, ChainError> {
        // Gather the confirmable candidate run first.
        let mut incoming: Vec<(u32, Hash256, Block)> = Vec::new();
        let mut incoming_work = U256::zero();
        let mut height = fork.height + 1;
        while let Some(hash) = self.height_hash(height, true)? {
            let entry = self
                .header_entry(&hash)?
                .ok_or(ChainError::OperationFailed)?;
            if !entry.is_valid() || !entry.is_stored() {
                break;
            }
            let proof = block_proof(entry.header.bits).map_err(|_| ChainError::OperationFailed)?;
            incoming_work = incoming_work.saturating_add(proof);
            let block = self
                .block_by_hash(&hash)?
                .ok_or(ChainError::OperationFailed)?;
            incoming.push((height, hash, block));
            height += 1;
        }

        let outgoing_work = self.get_work(fork.height, false, None)?;
        if incoming.is_empty() || incoming_work <= outgoing_work {
            return Ok(None);
        }

        let confirmed_tip = self.top(false)?;
        let mut batch = WriteBatch::new();
        let mut outgoing: Vec<Arc<Block>> = Vec::new();

        let mut height = confirmed_tip.height;
        while height > fork.height {
            let hash = self
                .height_hash(height, false)?
                .ok_or(ChainError::OperationFailed)?;
            let mut entry = self
                .header_entry(&hash)?
                .ok_or(ChainError::OperationFailed)?;
            let block = self
                .block_by_hash(&hash)?
                .ok_or(ChainError::OperationFailed)?;
            entry.state &= !STATE_CONFIRMED;
            batch.put(Column::HeaderIndex, hash, encode_header_entry(&entry));
            batch.delete(Column::ConfirmedIndex, height_key(height));
            self.mark_spends(&mut batch, &block, height, SPEND_CONFIRMED, false)?;
            // Member transactions return to the unconfirmed pool state; the
            // coinbase stays pinned to its (now unconfirmed) block.
            for (position, tx) in block.transactions.iter().enumerate() {
                let meta = if tx.is_coinbase() {
                    encode_tx_meta(height, position as u32, TX_PLACED)
                } else {
                    encode_tx_meta(NO_HEIGHT, NO_HEIGHT, TX_POOLED)
                };
                batch.put(Column::TxMeta, tx.txid(), meta);
            }
            outgoing.push(Arc::new(block));
            height -= 1;
        }
        outgoing.reverse();

        let mut new_tip = *fork;
        let mut confirmed_blocks = Vec::with_capacity(incoming.len());
        for (height, hash, block) in incoming {
            let mut entry = self
                .header_entry(&hash)?
                .ok_or(ChainError::OperationFailed)?;
            entry.state |= STATE_CONFIRMED;
            batch.put(Column::HeaderIndex, hash, encode_header_entry(&entry));
            batch.put(Column::ConfirmedIndex, height_key(height), hash);
            self.mark_spends(&mut batch, &block, height, SPEND_CONFIRMED, true)?;
            for (position, tx) in block.transactions.iter().enumerate() {
                batch.put(
                    Column::TxMeta,
                    tx.txid(),
                    encode_tx_meta(height, position as u32, TX_CONFIRMED),
                );
            }
            new_tip = Checkpoint { hash, height };
            confirmed_blocks.push(Arc::new(block));
        }

        batch.put(Column::Meta, META_CONFIRMED_TIP, new_tip.hash);
        // Candidate and confirmed now agree through the new tip.
        batch.put(Column::Meta, META_FORK_POINT, encode_checkpoint(&new_tip));

        self.commit(batch)?;
        Ok(Some((confirmed_blocks, outgoing, new_tip)))
    }

    /// Persist an unconfirmed transaction.
    pub fn store_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        let mut batch = WriteBatch::new();
        batch.put(Column::Tx, tx.txid(), tx.consensus_encode());
        batch.put(
            Column::TxMeta,
            tx.txid(),
            encode_tx_meta(NO_HEIGHT, NO_HEIGHT, TX_POOLED),
        );
        self.commit(batch)
    }

    // Internals.
    // ------------------------------------------------------------------

    fn put_block_transactions(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        height: u32,
        tx_state: u8,
        relay: bool,
    ) -> Result<(), ChainError> {
        let txids = block.txids();
        batch.put(Column::BlockTx, block.hash(), encode_txid_list(&txids));
        for (position, (tx, txid)) in block.transactions.iter().zip(&txids).enumerate() {
            // With relay on, pooled bodies are already present; skip the
            // redundant body write.
            let body_present = relay && self.store.get(Column::Tx, txid)?.is_some();
            if !body_present {
                batch.put(Column::Tx, *txid, tx.consensus_encode());
            }
            batch.put(
                Column::TxMeta,
                *txid,
                encode_tx_meta(height, position as u32, tx_state),
            );
        }
        Ok(())
    }

    fn mark_spends(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        height: u32,
        flag: u8,
        set: bool,
    ) -> Result<(), ChainError> {
        for tx in &block.transactions {
            if tx.is_coinbase() {
                continue;
            }
            let txid = tx.txid();
            for input in &tx.vin {
                let key = input.prevout.key();
                let existing = self.store.get(Column::Spend, &key)?;
                let (spender, spend_height, mut flags) = match existing {
                    Some(bytes) => decode_spend(&bytes)?,
                    None => (txid, height, 0),
                };
                if set {
                    flags |= flag;
                } else {
                    flags &= !flag;
                }
                if flags == 0 {
                    batch.delete(Column::Spend, key);
                } else {
                    let (spender, spend_height) = if set {
                        (txid, height)
                    } else {
                        (spender, spend_height)
                    };
                    batch.put(Column::Spend, key, encode_spend(&spender, spend_height, flags));
                }
            }
        }
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), ChainError> {
        self.store.write_batch(&batch).map_err(|err| {
            log_error!("fatal: store write failed, store is corrupted: {err}");
            ChainError::StoreCorrupted
        })
    }
}

// Encoding helpers.
// ----------------------------------------------------------------------

pub(crate) fn height_key(height: u32) -> [u8; 4] {
    height.to_le_bytes()
}

fn index_column(candidate: bool) -> Column {
    if candidate {
        Column::CandidateIndex
    } else {
        Column::ConfirmedIndex
    }
}

fn encode_header_entry(entry: &HeaderEntry) -> Vec<u8> {
    let mut encoder = Encoder::with_capacity(HEADER_SIZE + 42);
    encoder.write_bytes(&entry.header.consensus_encode());
    encoder.write_u32_le(entry.height);
    encoder.write_bytes(&entry.work);
    encoder.write_u8(entry.state);
    encoder.write_u8(entry.error_code);
    encoder.into_inner()
}

fn decode_header_entry(bytes: &[u8]) -> Result<HeaderEntry, ChainError> {
    if bytes.len() != HEADER_SIZE + 42 {
        return Err(ChainError::OperationFailed);
    }
    let header = BlockHeader::consensus_decode(&bytes[..HEADER_SIZE])
        .map_err(|_| ChainError::OperationFailed)?;
    let mut decoder = Decoder::new(&bytes[HEADER_SIZE..]);
    let height = decoder.read_u32_le().map_err(|_| ChainError::OperationFailed)?;
    let mut work = [0u8; 32];
    work.copy_from_slice(
        &decoder
            .read_bytes(32)
            .map_err(|_| ChainError::OperationFailed)?,
    );
    let state = decoder.read_u8().map_err(|_| ChainError::OperationFailed)?;
    let error_code = decoder.read_u8().map_err(|_| ChainError::OperationFailed)?;
    Ok(HeaderEntry {
        header,
        height,
        work,
        state,
        error_code,
    })
}

fn encode_checkpoint(checkpoint: &Checkpoint) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&checkpoint.hash);
    out.extend_from_slice(&checkpoint.height.to_le_bytes());
    out
}

fn decode_checkpoint(bytes: &[u8]) -> Result<Checkpoint, ChainError> {
    if bytes.len() != 36 {
        return Err(ChainError::OperationFailed);
    }
    let hash = decode_hash(&bytes[..32])?;
    let height = u32::from_le_bytes(bytes[32..36].try_into().expect("checkpoint height"));
    Ok(Checkpoint { hash, height })
}

fn decode_hash(bytes: &[u8]) -> Result<Hash256, ChainError> {
    if bytes.len() != 32 {
        return Err(ChainError::OperationFailed);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(bytes);
    Ok(hash)
}

fn encode_txid_list(txids: &[Hash256]) -> Vec<u8> {
    let mut encoder = Encoder::with_capacity(9 + txids.len() * 32);
    encoder.write_varint(txids.len() as u64);
    for txid in txids {
        encoder.write_hash_le(txid);
    }
    encoder.into_inner()
}

fn decode_txid_list(bytes: &[u8]) -> Result<Vec<Hash256>, ChainError> {
    let mut decoder = Decoder::new(bytes);
    let count = decoder.read_varint().map_err(|_| ChainError::OperationFailed)?;
    let count = usize::try_from(count).map_err(|_| ChainError::OperationFailed)?;
    let mut txids = Vec::with_capacity(count);
    for _ in 0..count {
        txids.push(
            decoder
                .read_hash_le()
                .map_err(|_| ChainError::OperationFailed)?,
        );
    }
    Ok(txids)
}

fn encode_tx_meta(height: u32, position: u32, state: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&position.to_le_bytes());
    out.push(state);
    out
}

fn decode_tx_meta(bytes: &[u8]) -> Result<TransactionPlacement, ChainError> {
    if bytes.len() != 9 {
        return Err(ChainError::OperationFailed);
    }
    Ok(TransactionPlacement {
        height: u32::from_le_bytes(bytes[0..4].try_into().expect("meta height")),
        position: u32::from_le_bytes(bytes[4..8].try_into().expect("meta position")),
        state: bytes[8],
    })
}

fn encode_spend(spender: &Hash256, height: u32, flags: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(37);
    out.extend_from_slice(spender);
    out.extend_from_slice(&height.to_le_bytes());
    out.push(flags);
    out
}

fn decode_spend(bytes: &[u8]) -> Result<(Hash256, u32, u8), ChainError> {
    if bytes.len() != 37 {
        return Err(ChainError::OperationFailed);
    }
    let spender = decode_hash(&bytes[..32])?;
    let height = u32::from_le_bytes(bytes[32..36].try_into().expect("spend height"));
    Ok((spender, height, bytes[36]))
}
