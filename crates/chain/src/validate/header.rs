//! Header validation: check and accept phases only.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use emberd_consensus::constants::{MAX_FUTURE_BLOCK_TIME, MIN_BLOCK_VERSION};
use emberd_consensus::ConsensusParams;
use emberd_pow::difficulty::u256_to_compact;
use emberd_pow::validation::{validate_pow_header, PowError};
use emberd_primitives::block::BlockHeader;
use primitive_types::U256;

use crate::chain_state::ChainState;
use crate::error::ChainError;
use crate::pools::HeaderBranch;

pub struct HeaderValidator {
    params: Arc<ConsensusParams>,
    scrypt: bool,
    pow_limit_bits: u32,
}

impl HeaderValidator {
    pub fn new(params: Arc<ConsensusParams>, scrypt: bool) -> Self {
        let pow_limit_bits = u256_to_compact(U256::from_little_endian(&params.pow_limit));
        Self {
            params,
            scrypt,
            pow_limit_bits,
        }
    }

    /// Context-free checks: version floor, future-time bound, proof of
    /// work against the claimed bits.
    pub fn check(&self, header: &BlockHeader) -> Result<(), ChainError> {
        if header.version < MIN_BLOCK_VERSION {
            return Err(ChainError::InvalidHeader("version below minimum"));
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if u64::from(header.time) > now + u64::from(MAX_FUTURE_BLOCK_TIME) {
            return Err(ChainError::InvalidHeader("timestamp too far in the future"));
        }
        validate_pow_header(header, &self.params, self.scrypt).map_err(|err| {
            ChainError::InvalidHeader(match err {
                PowError::HashMismatch => "proof of work below claimed bits",
                PowError::InvalidBits(message) => message,
                PowError::Compact(_) => "malformed compact bits",
            })
        })
    }

    /// Contextual checks along a branch, promoting the fork-point state one
    /// header at a time. Returns the state at the branch top.
    pub fn accept(
        &self,
        branch: &HeaderBranch,
        fork_state: &ChainState,
    ) -> Result<ChainState, ChainError> {
        let mut state = fork_state.clone();
        let mut height = branch.fork_height;
        for header in &branch.headers {
            height += 1;
            if let Some(checkpoint) = self.params.checkpoint_at(height) {
                if checkpoint.hash != header.hash() {
                    return Err(ChainError::InvalidHeader("checkpoint mismatch"));
                }
            }
            let scheduled = state.work_required_next();
            let min_difficulty = state.min_difficulty_applies(header.time, &self.params)
                && header.bits == self.pow_limit_bits;
            if header.bits != scheduled && !min_difficulty {
                return Err(ChainError::InvalidHeader("incorrect proof of work bits"));
            }
            if header.time <= state.median_time_past() {
                return Err(ChainError::InvalidHeader("timestamp under median time past"));
            }
            if header.version < state.forks_next().minimum_block_version() {
                return Err(ChainError::InvalidHeader("version below fork minimum"));
            }
            state = state.promote(header, &self.params);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberd_consensus::{chain_params, Checkpoint, Network};
    use emberd_consensus::Hash256;

    fn header(prev: Hash256, time: u32, bits: u32, nonce: u32) -> Arc<BlockHeader> {
        Arc::new(BlockHeader {
            version: 1,
            prev_block: prev,
            merkle_root: [0u8; 32],
            time,
            bits,
            nonce,
        })
    }

    fn regtest() -> Arc<ConsensusParams> {
        Arc::new(chain_params(Network::Regtest))
    }

    fn branch_of(fork_height: u32, headers: Vec<Arc<BlockHeader>>) -> HeaderBranch {
        HeaderBranch {
            fork_hash: headers[0].prev_block,
            fork_height,
            headers,
        }
    }

    #[test]
    fn check_rejects_future_timestamp() {
        let params = regtest();
        let validator = HeaderValidator::new(Arc::clone(&params), false);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        let header = header([0u8; 32], now + MAX_FUTURE_BLOCK_TIME + 60, params.genesis_bits, 0);
        assert_eq!(
            validator.check(&header),
            Err(ChainError::InvalidHeader("timestamp too far in the future"))
        );
    }

    #[test]
    fn accept_rejects_wrong_bits() {
        let params = regtest();
        let validator = HeaderValidator::new(Arc::clone(&params), false);
        let genesis = header([0u8; 32], 1_000, params.genesis_bits, 0);
        let state = ChainState::genesis(&genesis, &params);
        let child = header(genesis.hash(), 2_000, 0x1d00_ffff, 1);
        let branch = branch_of(0, vec![child]);
        assert_eq!(
            validator.accept(&branch, &state),
            Err(ChainError::InvalidHeader("incorrect proof of work bits"))
        );
    }

    #[test]
    fn accept_rejects_stale_timestamp() {
        let params = regtest();
        let validator = HeaderValidator::new(Arc::clone(&params), false);
        let genesis = header([0u8; 32], 1_000, params.genesis_bits, 0);
        let state = ChainState::genesis(&genesis, &params);
        let child = header(genesis.hash(), 1_000, params.genesis_bits, 1);
        let branch = branch_of(0, vec![child]);
        assert_eq!(
            validator.accept(&branch, &state),
            Err(ChainError::InvalidHeader("timestamp under median time past"))
        );
    }

    #[test]
    fn accept_promotes_along_branch() {
        let params = regtest();
        let validator = HeaderValidator::new(Arc::clone(&params), false);
        let genesis = header([0u8; 32], 1_000, params.genesis_bits, 0);
        let state = ChainState::genesis(&genesis, &params);

        let h1 = header(genesis.hash(), 1_600, params.genesis_bits, 1);
        let h2 = header(h1.hash(), 2_200, params.genesis_bits, 2);
        let branch = branch_of(0, vec![h1, h2.clone()]);
        let top = validator.accept(&branch, &state).expect("accept");
        assert_eq!(top.height(), 2);
        assert_eq!(top.hash(), h2.hash());
    }

    #[test]
    fn accept_enforces_checkpoints() {
        let mut params = chain_params(Network::Regtest);
        params.checkpoints = vec![Checkpoint {
            height: 1,
            hash: [7u8; 32],
        }];
        let params = Arc::new(params);
        let validator = HeaderValidator::new(Arc::clone(&params), false);
        let genesis = header([0u8; 32], 1_000, params.genesis_bits, 0);
        let state = ChainState::genesis(&genesis, &params);
        let child = header(genesis.hash(), 1_600, params.genesis_bits, 1);
        let branch = branch_of(0, vec![child]);
        assert_eq!(
            validator.accept(&branch, &state),
            Err(ChainError::InvalidHeader("checkpoint mismatch"))
        );
    }
}
