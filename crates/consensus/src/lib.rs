//! Consensus constants, parameters, and soft-fork schedule.

pub mod constants;
pub mod forks;
pub mod money;
pub mod params;
pub mod subsidy;

pub use forks::{ForkFlags, Hash256};
pub use params::{chain_params, Checkpoint, ConsensusParams, Network};
pub use subsidy::block_subsidy;
