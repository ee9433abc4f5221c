//! Block validation: check, accept, and the connect script fan-out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use emberd_consensus::constants::{
    COINBASE_MATURITY, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE, MAX_COINBASE_SCRIPT_SIZE, MAX_TX_SIZE,
    MIN_COINBASE_SCRIPT_SIZE,
};
use emberd_consensus::forks::{FORK_BIP113, FORK_BIP34};
use emberd_consensus::money::money_range;
use emberd_consensus::{block_subsidy, ConsensusParams};
use emberd_primitives::block::Block;
use emberd_primitives::merkle::merkle_root;
use rayon::prelude::*;

use crate::chain_state::ChainState;
use crate::error::ChainError;
use crate::priority::{CompletionLatch, PriorityPool};
use crate::validate::{ScriptVerifier, UtxoView};

pub struct BlockValidator {
    params: Arc<ConsensusParams>,
}

impl BlockValidator {
    pub fn new(params: Arc<ConsensusParams>) -> Self {
        Self { params }
    }

    /// Context-free structural checks.
    pub fn check(&self, block: &Block) -> Result<(), ChainError> {
        if block.transactions.is_empty() {
            return Err(ChainError::InvalidBlock("block has no transactions"));
        }
        if block.serialized_size() > MAX_BLOCK_SIZE as usize {
            return Err(ChainError::InvalidBlock("block exceeds maximum size"));
        }

        let coinbase = &block.transactions[0];
        if !coinbase.is_coinbase() {
            return Err(ChainError::InvalidBlock("first transaction not coinbase"));
        }
        let script_len = coinbase.vin[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&script_len) {
            return Err(ChainError::InvalidBlock("coinbase script size out of range"));
        }
        if block.transactions[1..].iter().any(|tx| tx.is_coinbase()) {
            return Err(ChainError::InvalidBlock("extra coinbase"));
        }

        let txids = block.txids();
        if merkle_root(&txids) != block.header.merkle_root {
            return Err(ChainError::InvalidBlock("merkle root mismatch"));
        }
        let unique: HashSet<_> = txids.iter().collect();
        if unique.len() != txids.len() {
            return Err(ChainError::InvalidBlock("duplicate transaction"));
        }

        let mut spent = HashSet::new();
        let mut sigops = 0u32;
        for tx in &block.transactions {
            if tx.vout.is_empty() {
                return Err(ChainError::InvalidBlock("transaction has no outputs"));
            }
            if tx.serialized_size() > MAX_TX_SIZE as usize {
                return Err(ChainError::InvalidBlock("transaction exceeds maximum size"));
            }
            let Some(total) = tx.total_output_value() else {
                return Err(ChainError::InvalidBlock("output value overflow"));
            };
            if !money_range(total) || tx.vout.iter().any(|output| !money_range(output.value)) {
                return Err(ChainError::InvalidBlock("output value out of range"));
            }
            sigops = sigops.saturating_add(tx.sigops());
            if tx.is_coinbase() {
                continue;
            }
            if tx.vin.is_empty() {
                return Err(ChainError::InvalidBlock("transaction has no inputs"));
            }
            for input in &tx.vin {
                if input.prevout.is_null() {
                    return Err(ChainError::InvalidBlock("null previous output"));
                }
                if !spent.insert(input.prevout) {
                    return Err(ChainError::InvalidBlock("duplicate input in block"));
                }
            }
        }
        if sigops > MAX_BLOCK_SIGOPS {
            return Err(ChainError::InvalidBlock("too many signature operations"));
        }
        Ok(())
    }

    /// Contextual checks against the parent-tip state and the populated
    /// prevout view. Returns the total non-coinbase fees.
    pub fn accept(
        &self,
        block: &Block,
        height: u32,
        parent_state: &ChainState,
        view: &UtxoView,
    ) -> Result<i64, ChainError> {
        let forks = parent_state.forks_next();
        let time_cutoff = if forks.active(FORK_BIP113) {
            parent_state.median_time_past()
        } else {
            block.header.time
        };

        if forks.active(FORK_BIP34) && !coinbase_commits_height(block, height) {
            return Err(ChainError::InvalidBlock("coinbase missing height commitment"));
        }

        let mut fees = 0i64;
        for tx in &block.transactions[1..] {
            if !tx.is_final(height as i32, time_cutoff) {
                return Err(ChainError::InvalidBlock("non-final transaction"));
            }
            let mut value_in = 0i64;
            for input in &tx.vin {
                let Some(prevout) = view.get(&input.prevout) else {
                    return Err(ChainError::InvalidBlock("missing input"));
                };
                if prevout.spent {
                    return Err(ChainError::InvalidBlock("double spend"));
                }
                if prevout.coinbase {
                    let created = prevout.height.unwrap_or(height);
                    if height.saturating_sub(created) < COINBASE_MATURITY as u32 {
                        return Err(ChainError::InvalidBlock("premature coinbase spend"));
                    }
                }
                value_in = value_in
                    .checked_add(prevout.value)
                    .ok_or(ChainError::InvalidBlock("input value overflow"))?;
            }
            let value_out = tx
                .total_output_value()
                .ok_or(ChainError::InvalidBlock("output value overflow"))?;
            if value_out > value_in {
                return Err(ChainError::InvalidBlock("spends exceed inputs"));
            }
            fees = fees
                .checked_add(value_in - value_out)
                .ok_or(ChainError::InvalidBlock("fee overflow"))?;
            if !money_range(fees) {
                return Err(ChainError::InvalidBlock("fees out of range"));
            }
        }

        let claimed = block.transactions[0]
            .total_output_value()
            .ok_or(ChainError::InvalidBlock("output value overflow"))?;
        let subsidy = block_subsidy(height, &self.params);
        if claimed > subsidy.saturating_add(fees) {
            return Err(ChainError::InvalidBlock("coinbase claim exceeds subsidy"));
        }
        Ok(fees)
    }

    /// Fan input script checks out over the priority pool and park the
    /// caller on the completion latch.
    pub fn connect(
        &self,
        block: Arc<Block>,
        view: Arc<UtxoView>,
        parent_state: &ChainState,
        verifier: Arc<dyn ScriptVerifier>,
        pool: &PriorityPool,
        stopped: Arc<AtomicBool>,
    ) -> Result<(), ChainError> {
        let forks = parent_state.forks_next();
        let mut checks = Vec::new();
        for (tx_index, tx) in block.transactions.iter().enumerate().skip(1) {
            for input_index in 0..tx.vin.len() {
                checks.push((tx_index, input_index));
            }
        }
        if checks.is_empty() {
            return Ok(());
        }

        let latch = CompletionLatch::new();
        let completer = latch.completer();
        pool.dispatch(move || {
            let result = checks
                .into_par_iter()
                .try_for_each(|(tx_index, input_index)| {
                    if stopped.load(Ordering::Acquire) {
                        return Err(ChainError::ServiceStopped);
                    }
                    let tx = &block.transactions[tx_index];
                    let prevout = view
                        .get(&tx.vin[input_index].prevout)
                        .ok_or(ChainError::InvalidBlock("missing input"))?;
                    verifier
                        .verify(tx, input_index, prevout, forks)
                        .map_err(ChainError::InvalidBlock)
                });
            completer.complete(result);
        });
        latch.wait()
    }
}

/// BIP34: the coinbase unlock script must begin with a minimal push of the
/// block height.
fn coinbase_commits_height(block: &Block, height: u32) -> bool {
    let script = &block.transactions[0].vin[0].script_sig;
    let expected = script_number(height);
    if script.len() < 1 + expected.len() {
        return false;
    }
    script[0] as usize == expected.len() && script[1..=expected.len()] == expected[..]
}

fn script_number(height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut value = height;
    while value > 0 {
        bytes.push((value & 0xff) as u8);
        value >>= 8;
    }
    if let Some(last) = bytes.last() {
        if last & 0x80 != 0 {
            bytes.push(0);
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_number_is_minimal_little_endian() {
        assert_eq!(script_number(1), vec![0x01]);
        assert_eq!(script_number(0x80), vec![0x80, 0x00]);
        assert_eq!(script_number(0x1234), vec![0x34, 0x12]);
    }
}
