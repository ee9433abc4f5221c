//! Shared builders for organizer tests: regtest chains over a memory store.
#![allow(dead_code)]

use std::sync::Arc;

use emberd_chain::{Chain, Settings};
use emberd_consensus::money::COIN;
use emberd_consensus::{chain_params, ConsensusParams, Hash256, Network};
use emberd_pow::difficulty::{compact_to_u256, hash_meets_target};
use emberd_primitives::block::{Block, BlockHeader};
use emberd_primitives::merkle::merkle_root;
use emberd_primitives::outpoint::OutPoint;
use emberd_primitives::transaction::{Transaction, TxIn, TxOut};
use emberd_storage::memory::MemoryStore;

pub const GENESIS_TIME: u32 = 1_296_688_602;
pub const SPACING: u32 = 600;

pub fn coinbase_tx(height: u32, value: i64) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

/// Search nonces until the header satisfies its own claimed bits.
pub fn mine_header(prev_block: Hash256, merkle: Hash256, time: u32, bits: u32) -> BlockHeader {
    let target = compact_to_u256(bits).expect("test bits");
    for nonce in 0..u32::MAX {
        let header = BlockHeader {
            version: 1,
            prev_block,
            merkle_root: merkle,
            time,
            bits,
            nonce,
        };
        if hash_meets_target(&header.pow_hash(false), target) {
            return header;
        }
    }
    unreachable!("regtest difficulty always yields a nonce");
}

pub fn mine_block(
    prev_block: Hash256,
    time: u32,
    bits: u32,
    transactions: Vec<Transaction>,
) -> Block {
    let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
    let header = mine_header(prev_block, merkle_root(&txids), time, bits);
    Block {
        header,
        transactions,
    }
}

pub fn genesis_block(params: &ConsensusParams) -> Block {
    mine_block(
        [0u8; 32],
        GENESIS_TIME,
        params.genesis_bits,
        vec![coinbase_tx(0, 50 * COIN)],
    )
}

pub fn test_settings() -> Settings {
    Settings {
        byte_fee_satoshis: 0.0,
        sigop_fee_satoshis: 0.0,
        minimum_output_satoshis: 0,
        priority_threads: 2,
        ..Settings::default()
    }
}

pub fn new_chain(settings: Settings) -> (Chain<MemoryStore>, Block, ConsensusParams) {
    let params = chain_params(Network::Regtest);
    let genesis = genesis_block(&params);
    let chain = Chain::new(
        Arc::new(MemoryStore::new()),
        params.clone(),
        settings,
        &genesis,
    )
    .expect("chain construction");
    assert!(chain.start());
    (chain, genesis, params)
}

/// Mine a linear run of headers on top of `prev`, spaced by `SPACING`.
pub fn header_run(
    prev: Hash256,
    start_time: u32,
    bits: u32,
    count: usize,
) -> Vec<Arc<BlockHeader>> {
    let mut headers = Vec::with_capacity(count);
    let mut prev_block = prev;
    for index in 0..count {
        let header = mine_header(
            prev_block,
            [0u8; 32],
            start_time + (index as u32 + 1) * SPACING,
            bits,
        );
        prev_block = header.hash();
        headers.push(Arc::new(header));
    }
    headers
}

/// Mine a block for an already-organized header by rebuilding it with the
/// same position in the chain but a real transaction list.
pub fn block_for(
    prev_block: Hash256,
    time: u32,
    bits: u32,
    transactions: Vec<Transaction>,
) -> Arc<Block> {
    Arc::new(mine_block(prev_block, time, bits, transactions))
}

/// Organize `count` plain coinbase blocks atop `prev`, returning the tip
/// hash. Headers and bodies are admitted in lockstep, so each block
/// confirms as it validates.
pub fn extend_chain(
    chain: &Chain<MemoryStore>,
    prev: Hash256,
    start_height: u32,
    count: u32,
    bits: u32,
) -> Hash256 {
    let mut prev_hash = prev;
    for offset in 0..count {
        let height = start_height + offset;
        let block = block_for(
            prev_hash,
            GENESIS_TIME + height * SPACING,
            bits,
            vec![coinbase_tx(height, 50 * COIN)],
        );
        prev_hash = block.hash();
        chain
            .organize_header(Arc::new(block.header.clone()))
            .expect("organize header");
        chain
            .organize_block(Arc::clone(&block), height)
            .expect("organize block");
    }
    prev_hash
}
