pub mod header_pool;
pub mod transaction_pool;

pub use header_pool::{HeaderBranch, HeaderPool};
pub use transaction_pool::TransactionPool;
