//! Consensus parameter definitions.

use crate::forks::{
    ForkFlags, Hash256, FORK_BIP112, FORK_BIP113, FORK_BIP141, FORK_BIP16, FORK_BIP30, FORK_BIP34,
    FORK_BIP65, FORK_BIP66, FORK_BIP68,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// A named confirmed position used to pin header acceptance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub hash_genesis_block: Hash256,
    pub genesis_time: u32,
    pub genesis_bits: u32,
    /// Highest valid proof-of-work target, little-endian.
    pub pow_limit: Hash256,
    /// Seconds between blocks the retarget aims for.
    pub pow_target_spacing: i64,
    /// Blocks per retargeting period.
    pub retargeting_interval: u32,
    /// Clamp factor applied to the measured timespan on retarget.
    pub retargeting_factor: i64,
    /// Testnet rule: a block spaced 2x the target may use the pow limit.
    pub allow_min_difficulty: bool,
    /// Regtest rule: bits never retarget.
    pub no_retargeting: bool,
    pub subsidy_halving_interval: u32,
    pub bip16_height: u32,
    pub bip30_height: u32,
    pub bip34_height: u32,
    pub bip66_height: u32,
    pub bip65_height: u32,
    /// BIP68/112/113 activate together.
    pub csv_height: u32,
    pub segwit_height: u32,
    pub checkpoints: Vec<Checkpoint>,
}

impl ConsensusParams {
    pub fn target_timespan(&self) -> i64 {
        self.pow_target_spacing * i64::from(self.retargeting_interval)
    }

    pub fn min_timespan(&self) -> i64 {
        self.target_timespan() / self.retargeting_factor
    }

    pub fn max_timespan(&self) -> i64 {
        self.target_timespan() * self.retargeting_factor
    }

    pub fn is_retarget_height(&self, height: u32) -> bool {
        !self.no_retargeting && height > 0 && height % self.retargeting_interval == 0
    }

    /// Fork set scheduled active at the given height.
    pub fn fork_flags(&self, height: u32) -> ForkFlags {
        let mut bits = 0u32;
        if height >= self.bip16_height {
            bits |= FORK_BIP16;
        }
        if height >= self.bip30_height {
            bits |= FORK_BIP30;
        }
        if height >= self.bip34_height {
            bits |= FORK_BIP34;
        }
        if height >= self.bip66_height {
            bits |= FORK_BIP66;
        }
        if height >= self.bip65_height {
            bits |= FORK_BIP65;
        }
        if height >= self.csv_height {
            bits |= FORK_BIP68 | FORK_BIP112 | FORK_BIP113;
        }
        if height >= self.segwit_height {
            bits |= FORK_BIP141;
        }
        ForkFlags::new(bits)
    }

    /// The checkpoint governing the given height, if any.
    pub fn checkpoint_at(&self, height: u32) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .find(|checkpoint| checkpoint.height == height)
    }

    pub fn top_checkpoint_height(&self) -> u32 {
        self.checkpoints
            .iter()
            .map(|checkpoint| checkpoint.height)
            .max()
            .unwrap_or(0)
    }
}

pub fn chain_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_params(),
        Network::Testnet => testnet_params(),
        Network::Regtest => regtest_params(),
    }
}

const MAINNET_POW_LIMIT: Hash256 = pow_limit_le(0x1d00_ffff);
const REGTEST_POW_LIMIT: Hash256 = pow_limit_le(0x207f_ffff);

/// Expand a compact-bits limit into a little-endian 256-bit target.
const fn pow_limit_le(bits: u32) -> Hash256 {
    let size = (bits >> 24) as usize;
    let word = bits & 0x007f_ffff;
    let mut out = [0u8; 32];
    // size >= 3 for every limit we define.
    out[size - 1] = (word >> 16) as u8;
    out[size - 2] = (word >> 8) as u8;
    out[size - 3] = word as u8;
    out
}

fn mainnet_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        hash_genesis_block: hash_le(&[
            0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72, 0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63,
            0xf7, 0x4f, 0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c, 0x68, 0xd6, 0x19, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ]),
        genesis_time: 1_231_006_505,
        genesis_bits: 0x1d00_ffff,
        pow_limit: MAINNET_POW_LIMIT,
        pow_target_spacing: 600,
        retargeting_interval: 2016,
        retargeting_factor: 4,
        allow_min_difficulty: false,
        no_retargeting: false,
        subsidy_halving_interval: 210_000,
        bip16_height: 173_805,
        bip30_height: 0,
        bip34_height: 227_931,
        bip66_height: 363_725,
        bip65_height: 388_381,
        csv_height: 419_328,
        segwit_height: 481_824,
        checkpoints: Vec::new(),
    }
}

fn testnet_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        hash_genesis_block: hash_le(&[
            0x43, 0x49, 0x7f, 0xd7, 0xf8, 0x26, 0x95, 0x71, 0x08, 0xf4, 0xa3, 0x0f, 0xd9, 0xce,
            0xc3, 0xae, 0xba, 0x79, 0x97, 0x20, 0x84, 0xe9, 0x0e, 0xad, 0x01, 0xea, 0x33, 0x09,
            0x00, 0x00, 0x00, 0x00,
        ]),
        genesis_time: 1_296_688_602,
        genesis_bits: 0x1d00_ffff,
        pow_limit: MAINNET_POW_LIMIT,
        pow_target_spacing: 600,
        retargeting_interval: 2016,
        retargeting_factor: 4,
        allow_min_difficulty: true,
        no_retargeting: false,
        subsidy_halving_interval: 210_000,
        bip16_height: 514,
        bip30_height: 0,
        bip34_height: 21_111,
        bip66_height: 330_776,
        bip65_height: 581_885,
        csv_height: 770_112,
        segwit_height: 834_624,
        checkpoints: Vec::new(),
    }
}

fn regtest_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        hash_genesis_block: [0u8; 32],
        genesis_time: 1_296_688_602,
        genesis_bits: 0x207f_ffff,
        pow_limit: REGTEST_POW_LIMIT,
        pow_target_spacing: 600,
        retargeting_interval: 144,
        retargeting_factor: 4,
        allow_min_difficulty: true,
        no_retargeting: true,
        subsidy_halving_interval: 150,
        bip16_height: 0,
        bip30_height: 0,
        bip34_height: 100_000_000,
        bip66_height: 100_000_000,
        bip65_height: 100_000_000,
        csv_height: 100_000_000,
        segwit_height: 100_000_000,
        checkpoints: Vec::new(),
    }
}

fn hash_le(bytes: &[u8; 32]) -> Hash256 {
    *bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow_limit_expansion() {
        // 0x1d00ffff places the 0xffff mantissa at bytes 26..28 little-endian.
        let limit = pow_limit_le(0x1d00_ffff);
        assert_eq!(limit[26], 0xff);
        assert_eq!(limit[27], 0xff);
        assert_eq!(limit[28], 0x00);
        assert!(limit[29..].iter().all(|byte| *byte == 0));
        assert!(limit[..26].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn fork_schedule_is_monotone() {
        let params = chain_params(Network::Mainnet);
        let early = params.fork_flags(100_000);
        let late = params.fork_flags(500_000);
        assert!(!early.active(crate::forks::FORK_BIP65));
        assert!(late.active(crate::forks::FORK_BIP65));
        assert_eq!(late.bits() & early.bits(), early.bits());
    }

    #[test]
    fn retarget_heights() {
        let params = chain_params(Network::Mainnet);
        assert!(params.is_retarget_height(2016));
        assert!(!params.is_retarget_height(2017));
        assert!(!params.is_retarget_height(0));
        let regtest = chain_params(Network::Regtest);
        assert!(!regtest.is_retarget_height(144));
    }
}
