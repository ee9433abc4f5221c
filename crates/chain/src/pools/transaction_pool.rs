//! Admitted unconfirmed transactions.

use std::collections::HashMap;

use emberd_consensus::Hash256;
use emberd_primitives::outpoint::OutPoint;
use emberd_primitives::transaction::Transaction;
use std::sync::Arc;

struct PoolEntry {
    tx: Arc<Transaction>,
    size: usize,
    sequence: u64,
}

/// Byte-bounded set of admitted unconfirmed transactions with an
/// outpoint-spender map for conflict detection. Oldest entries are evicted
/// first when the ceiling is exceeded.
pub struct TransactionPool {
    entries: HashMap<Hash256, PoolEntry>,
    spent: HashMap<OutPoint, Hash256>,
    total_bytes: usize,
    capacity_bytes: usize,
    sequence: u64,
}

impl TransactionPool {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            spent: HashMap::new(),
            total_bytes: 0,
            capacity_bytes,
            sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn exists(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<Arc<Transaction>> {
        self.entries.get(txid).map(|entry| Arc::clone(&entry.tx))
    }

    /// The pooled transaction spending the given outpoint, if any.
    pub fn spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent.get(outpoint).copied()
    }

    /// A pooled prevout for chained unconfirmed spends.
    pub fn output(&self, outpoint: &OutPoint) -> Option<(i64, Vec<u8>)> {
        let entry = self.entries.get(&outpoint.hash)?;
        let output = entry.tx.vout.get(outpoint.index as usize)?;
        Some((output.value, output.script_pubkey.clone()))
    }

    pub fn add(&mut self, tx: Arc<Transaction>) {
        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return;
        }
        let size = tx.serialized_size();
        for input in &tx.vin {
            self.spent.insert(input.prevout, txid);
        }
        self.sequence += 1;
        self.entries.insert(
            txid,
            PoolEntry {
                tx,
                size,
                sequence: self.sequence,
            },
        );
        self.total_bytes += size;
        self.evict();
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<Arc<Transaction>> {
        let entry = self.entries.remove(txid)?;
        self.total_bytes -= entry.size;
        for input in &entry.tx.vin {
            if self.spent.get(&input.prevout) == Some(txid) {
                self.spent.remove(&input.prevout);
            }
        }
        Some(entry.tx)
    }

    /// Drop every member that was confirmed by a block.
    pub fn purge_confirmed(&mut self, txids: &[Hash256]) {
        for txid in txids {
            self.remove(txid);
        }
    }

    fn evict(&mut self) {
        while self.capacity_bytes > 0 && self.total_bytes > self.capacity_bytes {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.sequence)
                .map(|(txid, _)| *txid)
            else {
                break;
            };
            self.remove(&oldest);
        }
    }
}
