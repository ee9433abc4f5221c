//! Proof-of-work arithmetic and header validation.

pub mod difficulty;
pub mod validation;

pub use difficulty::{
    block_proof, compact_to_u256, median_time_past, u256_to_compact, work_required, CompactError,
};
pub use validation::{validate_pow_header, PowError};
