//! Two-chain blockchain engine core: a candidate header chain and a
//! confirmed block chain over a persistent store, reorganized under the
//! most-accumulated-work rule, with mempool admission.

pub mod chain;
pub mod chain_state;
pub mod error;
pub mod organize;
pub mod pools;
pub mod priority;
pub mod settings;
pub mod store;
pub mod subscribe;
pub mod validate;

pub use chain::Chain;
pub use chain_state::ChainState;
pub use error::ChainError;
pub use settings::Settings;
pub use store::{
    ChainStore, HeaderEntry, PopulatedOutput, STATE_CANDIDATE, STATE_CONFIRMED, STATE_FAILED,
    STATE_INDEXED, STATE_INVALID, STATE_STORED, STATE_VALID,
};
pub use subscribe::{BlockEvent, HeaderEvent, TransactionEvent};
pub use validate::{ScriptVerifier, StructuralVerifier, UtxoView};
