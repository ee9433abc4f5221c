//! Candidate headers not yet accepted into the header index.

use std::collections::HashMap;
use std::sync::Arc;

use emberd_consensus::Hash256;
use emberd_pow::difficulty::block_proof;
use emberd_primitives::block::BlockHeader;
use emberd_storage::KeyValueStore;
use primitive_types::U256;

use crate::error::ChainError;
use crate::store::ChainStore;

/// A contiguous header sequence rooted at an indexed fork point.
#[derive(Clone, Debug)]
pub struct HeaderBranch {
    pub fork_hash: Hash256,
    pub fork_height: u32,
    pub headers: Vec<Arc<BlockHeader>>,
}

impl HeaderBranch {
    pub fn empty() -> Self {
        Self {
            fork_hash: [0u8; 32],
            fork_height: 0,
            headers: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Sum of member proofs.
    pub fn work(&self) -> U256 {
        self.headers.iter().fold(U256::zero(), |sum, header| {
            sum.saturating_add(block_proof(header.bits).unwrap_or_default())
        })
    }

    pub fn top(&self) -> Option<&Arc<BlockHeader>> {
        self.headers.last()
    }

    pub fn top_height(&self) -> u32 {
        self.fork_height + self.headers.len() as u32
    }
}

struct PoolEntry {
    header: Arc<BlockHeader>,
    height: u32,
}

/// In-memory graph of candidate headers keyed by hash. Insertion is
/// idempotent and never fails; branch extraction anchors at the header
/// index and returns empty for unknown or already-indexed headers.
#[derive(Default)]
pub struct HeaderPool {
    entries: HashMap<Hash256, PoolEntry>,
}

impl HeaderPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn add(&mut self, header: Arc<BlockHeader>, height: u32) {
        self.entries
            .entry(header.hash())
            .or_insert(PoolEntry { header, height });
    }

    /// Walk parent links through the pool until an indexed ancestor (the
    /// fork point). Returns the empty branch when the header is already
    /// indexed or its ancestry never reaches the index.
    pub fn get_branch<S: KeyValueStore>(
        &self,
        store: &ChainStore<S>,
        header: Arc<BlockHeader>,
    ) -> Result<HeaderBranch, ChainError> {
        let hash = header.hash();
        if let Some(entry) = store.header_entry(&hash)? {
            if entry.is_indexed() {
                return Ok(HeaderBranch::empty());
            }
        }

        let mut headers = vec![header];
        loop {
            let parent_hash = headers.last().expect("nonempty branch").prev_block;
            if let Some(entry) = store.header_entry(&parent_hash)? {
                if entry.is_indexed() {
                    headers.reverse();
                    return Ok(HeaderBranch {
                        fork_hash: parent_hash,
                        fork_height: entry.height,
                        headers,
                    });
                }
            }
            match self.entries.get(&parent_hash) {
                Some(entry) => headers.push(Arc::clone(&entry.header)),
                // Unrooted ancestry; nothing to organize.
                None => return Ok(HeaderBranch::empty()),
            }
        }
    }

    /// Drop entries that were absorbed by a reorganization or abandoned
    /// far below the fork point.
    pub fn prune<S: KeyValueStore>(
        &mut self,
        store: &ChainStore<S>,
        fork_height: u32,
        distance: u32,
    ) -> Result<(), ChainError> {
        let floor = fork_height.saturating_sub(distance);
        let mut dropped = Vec::new();
        for (hash, entry) in &self.entries {
            if entry.height < floor {
                dropped.push(*hash);
                continue;
            }
            if let Some(indexed) = store.header_entry(hash)? {
                if indexed.is_indexed() {
                    dropped.push(*hash);
                }
            }
        }
        for hash in dropped {
            self.entries.remove(&hash);
        }
        Ok(())
    }
}
