//! Blockchain engine configuration.

#[derive(Clone, Debug)]
pub struct Settings {
    /// Satoshis per byte required for mempool admission; 0 disables.
    pub byte_fee_satoshis: f32,
    /// Satoshis per signature operation required for mempool admission.
    pub sigop_fee_satoshis: f32,
    /// Outputs below this value make a transaction dusty.
    pub minimum_output_satoshis: u64,
    /// Tip age in hours beyond which a chain is reported stale; 0 disables.
    pub notify_limit_hours: u32,
    /// Grade proof-of-work with scrypt instead of double-SHA256.
    pub scrypt_proof_of_work: bool,
    /// Consult the unconfirmed pool when populating prevouts.
    pub relay_transactions: bool,
    /// Threads reserved for script-validation fan-outs.
    pub priority_threads: usize,
    /// Pooled headers this far below the fork point are dropped.
    pub reorg_pool_distance: u32,
    /// Byte ceiling for the unconfirmed transaction pool.
    pub tx_pool_capacity_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            byte_fee_satoshis: 1.0,
            sigop_fee_satoshis: 100.0,
            minimum_output_satoshis: 500,
            notify_limit_hours: 24,
            scrypt_proof_of_work: false,
            relay_transactions: true,
            priority_threads: 4,
            reorg_pool_distance: 100,
            tx_pool_capacity_bytes: 32 * 1024 * 1024,
        }
    }
}
