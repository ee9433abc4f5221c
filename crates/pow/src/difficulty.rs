//! Difficulty and compact target utilities.

use emberd_consensus::{ConsensusParams, Hash256};
use primitive_types::U256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0;

    if negative {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        let shift = 8 * (3 - size);
        word >>= shift;
        U256::from(word)
    } else {
        let shift = 8 * (size - 3);
        U256::from(word) << shift
    };

    if word != 0 {
        let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
        if overflow {
            return Err(CompactError::Overflow);
        }
    }

    Ok(value)
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact: u32;

    if size <= 3 {
        compact = value.low_u32() << (8 * (3 - size));
    } else {
        let shift = 8 * (size - 3);
        compact = (value >> shift).low_u32();
    }

    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

pub fn hash_meets_target(hash: &Hash256, target: U256) -> bool {
    U256::from_little_endian(hash) <= target
}

/// Expected work to produce a header at the given compact target:
/// `(~target / (target + 1)) + 1`, which is `2^256 / (target + 1)` without
/// overflowing 256 bits.
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    let one = U256::from(1u64);
    Ok((!target / (target + one)) + one)
}

/// Median of up to the last eleven timestamps, newest last.
pub fn median_time_past(timestamps: &[u32]) -> u32 {
    if timestamps.is_empty() {
        return 0;
    }
    let start = timestamps.len().saturating_sub(11);
    let mut window: Vec<u32> = timestamps[start..].to_vec();
    window.sort_unstable();
    window[window.len() / 2]
}

/// Compact bits required for the block following a retarget boundary.
///
/// `retarget_bits` and `retarget_time` describe the first block of the
/// closing period; `last_time` its final block. Off-boundary callers must
/// not invoke this (bits carry over unchanged).
pub fn work_required(
    retarget_bits: u32,
    retarget_time: u32,
    last_time: u32,
    params: &ConsensusParams,
) -> Result<u32, CompactError> {
    let mut actual_timespan = last_time as i64 - retarget_time as i64;
    if actual_timespan < params.min_timespan() {
        actual_timespan = params.min_timespan();
    }
    if actual_timespan > params.max_timespan() {
        actual_timespan = params.max_timespan();
    }

    let mut next = compact_to_u256(retarget_bits)?;
    next /= U256::from(params.target_timespan() as u64);
    next = next.saturating_mul(U256::from(actual_timespan as u64));

    let pow_limit = U256::from_little_endian(&params.pow_limit);
    if next > pow_limit {
        next = pow_limit;
    }

    Ok(u256_to_compact(next))
}
