//! Chain-state snapshots and cheap roll-forward promotion.

use std::time::{SystemTime, UNIX_EPOCH};

use emberd_consensus::constants::MEDIAN_TIME_PAST_INTERVAL;
use emberd_consensus::{ConsensusParams, ForkFlags, Hash256};
use emberd_pow::difficulty::{median_time_past, u256_to_compact, work_required};
use emberd_primitives::block::BlockHeader;
use primitive_types::U256;

/// Immutable summary of a chain ending at `(height, hash)`: the soft forks
/// and compact bits governing the next header, plus the trailing timestamp
/// window. Snapshots are shared behind `Arc` by the facade's cached slots.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainState {
    height: u32,
    hash: Hash256,
    bits: u32,
    time: u32,
    /// Up to eleven trailing timestamps, oldest first, tip included.
    timestamps: Vec<u32>,
    /// Timestamp of the header at the last retarget boundary at or below
    /// `height`.
    retarget_time: u32,
    forks_next: ForkFlags,
    work_required_next: u32,
}

impl ChainState {
    /// Build the snapshot for a chain tip from raw parts. `timestamps`
    /// must cover the trailing headers up to and including the tip.
    pub fn from_parts(
        height: u32,
        header: &BlockHeader,
        timestamps: Vec<u32>,
        retarget_time: u32,
        params: &ConsensusParams,
    ) -> Self {
        debug_assert!(!timestamps.is_empty());
        debug_assert_eq!(*timestamps.last().expect("tip timestamp"), header.time);
        Self {
            height,
            hash: header.hash(),
            bits: header.bits,
            time: header.time,
            timestamps: tail_window(timestamps),
            retarget_time,
            forks_next: params.fork_flags(height + 1),
            work_required_next: next_work(
                height,
                header.bits,
                header.time,
                retarget_time,
                params,
            ),
        }
    }

    pub fn genesis(header: &BlockHeader, params: &ConsensusParams) -> Self {
        Self::from_parts(0, header, vec![header.time], header.time, params)
    }

    /// Roll the snapshot forward by exactly one header.
    pub fn promote(&self, header: &BlockHeader, params: &ConsensusParams) -> Self {
        let height = self.height + 1;
        let mut timestamps = self.timestamps.clone();
        timestamps.push(header.time);
        let retarget_time = if height % params.retargeting_interval == 0 {
            header.time
        } else {
            self.retarget_time
        };
        Self {
            height,
            hash: header.hash(),
            bits: header.bits,
            time: header.time,
            timestamps: tail_window(timestamps),
            retarget_time,
            forks_next: params.fork_flags(height + 1),
            work_required_next: next_work(height, header.bits, header.time, retarget_time, params),
        }
    }

    /// Fold `promote` along a branch, oldest header first.
    pub fn promote_branch<'a, I>(&self, headers: I, params: &ConsensusParams) -> Self
    where
        I: IntoIterator<Item = &'a BlockHeader>,
    {
        headers
            .into_iter()
            .fold(self.clone(), |state, header| state.promote(header, params))
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    /// Median of the trailing timestamp window; the lower bound for the
    /// next header's time and the BIP113 lock-time endpoint.
    pub fn median_time_past(&self) -> u32 {
        median_time_past(&self.timestamps)
    }

    /// Fork set active for the object at `height + 1`.
    pub fn forks_next(&self) -> ForkFlags {
        self.forks_next
    }

    /// Compact bits required of the header at `height + 1`.
    pub fn work_required_next(&self) -> u32 {
        self.work_required_next
    }

    /// Testnet rule: a child spaced at least twice the target spacing may
    /// carry pow-limit bits instead of the scheduled difficulty.
    pub fn min_difficulty_applies(&self, child_time: u32, params: &ConsensusParams) -> bool {
        params.allow_min_difficulty
            && i64::from(child_time) > i64::from(self.time) + params.pow_target_spacing * 2
    }

    /// True when the tip is older than the configured limit.
    pub fn is_stale(&self, limit_hours: u32) -> bool {
        if limit_hours == 0 {
            return false;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(u64::from(self.time)) > u64::from(limit_hours) * 3600
    }
}

fn tail_window(mut timestamps: Vec<u32>) -> Vec<u32> {
    if timestamps.len() > MEDIAN_TIME_PAST_INTERVAL {
        timestamps.drain(..timestamps.len() - MEDIAN_TIME_PAST_INTERVAL);
    }
    timestamps
}

fn next_work(
    height: u32,
    bits: u32,
    time: u32,
    retarget_time: u32,
    params: &ConsensusParams,
) -> u32 {
    if params.no_retargeting {
        return bits;
    }
    if (height + 1) % params.retargeting_interval == 0 {
        work_required(bits, retarget_time, time, params)
            .unwrap_or_else(|_| u256_to_compact(U256::from_little_endian(&params.pow_limit)))
    } else {
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberd_consensus::{chain_params, Network};

    fn header(prev: Hash256, time: u32, bits: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: prev,
            merkle_root: [0u8; 32],
            time,
            bits,
            nonce: 0,
        }
    }

    #[test]
    fn promote_tracks_height_and_window() {
        let params = chain_params(Network::Regtest);
        let genesis = header([0u8; 32], 1_000, params.genesis_bits);
        let mut state = ChainState::genesis(&genesis, &params);
        let mut prev = genesis.hash();

        for index in 1..=15u32 {
            let child = header(prev, 1_000 + index * 600, params.genesis_bits);
            prev = child.hash();
            state = state.promote(&child, &params);
            assert_eq!(state.height(), index);
            assert_eq!(state.hash(), prev);
        }
        // Window is capped at eleven; median sits six blocks back.
        assert_eq!(state.median_time_past(), 1_000 + 10 * 600);
    }

    #[test]
    fn promote_branch_equals_iterated_promote() {
        let params = chain_params(Network::Regtest);
        let genesis = header([0u8; 32], 1_000, params.genesis_bits);
        let state = ChainState::genesis(&genesis, &params);

        let mut prev = genesis.hash();
        let mut branch = Vec::new();
        for index in 1..=3u32 {
            let child = header(prev, 1_000 + index * 600, params.genesis_bits);
            prev = child.hash();
            branch.push(child);
        }

        let folded = state.promote_branch(branch.iter(), &params);
        let mut stepped = state;
        for child in &branch {
            stepped = stepped.promote(child, &params);
        }
        assert_eq!(folded.height(), stepped.height());
        assert_eq!(folded.hash(), stepped.hash());
        assert_eq!(folded.median_time_past(), stepped.median_time_past());
        assert_eq!(folded.work_required_next(), stepped.work_required_next());
    }

    #[test]
    fn regtest_never_retargets() {
        let params = chain_params(Network::Regtest);
        let genesis = header([0u8; 32], 1_000, params.genesis_bits);
        let mut state = ChainState::genesis(&genesis, &params);
        let mut prev = genesis.hash();
        for index in 1..=(params.retargeting_interval + 2) {
            let child = header(prev, 1_000 + index, params.genesis_bits);
            prev = child.hash();
            state = state.promote(&child, &params);
            assert_eq!(state.work_required_next(), params.genesis_bits);
        }
    }

    #[test]
    fn min_difficulty_requires_double_spacing() {
        let mut params = chain_params(Network::Regtest);
        params.allow_min_difficulty = true;
        let genesis = header([0u8; 32], 1_000, params.genesis_bits);
        let state = ChainState::genesis(&genesis, &params);
        assert!(!state.min_difficulty_applies(1_000 + 1_200, &params));
        assert!(state.min_difficulty_applies(1_000 + 1_201, &params));
    }
}
