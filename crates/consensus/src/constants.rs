//! Consensus-wide constants shared across validation.

/// The minimum allowed block version (network rule).
pub const MIN_BLOCK_VERSION: i32 = 1;
/// The minimum allowed transaction version (network rule).
pub const MIN_TX_VERSION: i32 = 1;
/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 1_000_000;
/// The maximum allowed number of signature check operations in a block (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = 20_000;
/// The maximum allowed size for a serialized transaction, in bytes.
pub const MAX_TX_SIZE: u32 = 100_000;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Coinbase script_sig size bounds (network rule).
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;
/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Lock times below this value are block heights, at or above are timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
/// Number of trailing headers whose median timestamp bounds a new header.
pub const MEDIAN_TIME_PAST_INTERVAL: usize = 11;
/// Maximum distance of a header timestamp ahead of wall-clock, in seconds.
pub const MAX_FUTURE_BLOCK_TIME: u32 = 2 * 60 * 60;
/// Sequence locks are disabled when this bit is set (BIP68).
pub const SEQUENCE_DISABLE_BIT: u32 = 1 << 31;
