//! Three-phase validators: check (context-free), accept (contextual),
//! connect (script fan-out).

pub mod block;
pub mod header;
pub mod transaction;

use std::collections::HashMap;

use emberd_consensus::constants::MAX_SCRIPT_SIZE;
use emberd_consensus::ForkFlags;
use emberd_primitives::outpoint::OutPoint;
use emberd_primitives::transaction::Transaction;

use crate::store::PopulatedOutput;

pub use block::BlockValidator;
pub use header::HeaderValidator;
pub use transaction::TransactionValidator;

/// The prevout set a connect phase runs against, keyed by outpoint.
/// Assembled from the store (and pool, for mempool admissions) before
/// validation so that `connect` is pure given the view.
#[derive(Debug, Default)]
pub struct UtxoView {
    outputs: HashMap<OutPoint, PopulatedOutput>,
}

impl UtxoView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outpoint: OutPoint, output: PopulatedOutput) {
        self.outputs.insert(outpoint, output);
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&PopulatedOutput> {
        self.outputs.get(outpoint)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Input script execution, the external collaborator behind the connect
/// phase. Implementations must be safe to fan out across threads.
pub trait ScriptVerifier: Send + Sync {
    fn verify(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevout: &PopulatedOutput,
        forks: ForkFlags,
    ) -> Result<(), &'static str>;
}

/// Structural stand-in for a full script interpreter: enforces script size
/// bounds and that guarded outputs carry an unlocking script. Cryptographic
/// signature checks live outside this engine.
pub struct StructuralVerifier;

impl ScriptVerifier for StructuralVerifier {
    fn verify(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevout: &PopulatedOutput,
        _forks: ForkFlags,
    ) -> Result<(), &'static str> {
        let Some(input) = tx.vin.get(input_index) else {
            return Err("input index out of range");
        };
        if input.script_sig.len() > MAX_SCRIPT_SIZE {
            return Err("unlock script exceeds maximum size");
        }
        if prevout.script_pubkey.len() > MAX_SCRIPT_SIZE {
            return Err("lock script exceeds maximum size");
        }
        // OP_TRUE and empty lock scripts are anyone-can-spend.
        let anyone_can_spend =
            prevout.script_pubkey.is_empty() || prevout.script_pubkey == [0x51];
        if !anyone_can_spend && input.script_sig.is_empty() {
            return Err("empty unlock script for guarded output");
        }
        Ok(())
    }
}
