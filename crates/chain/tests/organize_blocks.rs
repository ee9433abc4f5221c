mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::*;
use emberd_chain::validate::ScriptVerifier;
use emberd_chain::{
    Chain, ChainError, PopulatedOutput, Settings, STATE_CONFIRMED, STATE_INVALID, STATE_STORED,
    STATE_VALID,
};
use emberd_consensus::forks::ForkFlags;
use emberd_consensus::money::COIN;
use emberd_consensus::{chain_params, Hash256, Network};
use emberd_primitives::block::Block;
use emberd_primitives::outpoint::OutPoint;
use emberd_primitives::transaction::{Transaction, TxIn, TxOut};
use emberd_storage::memory::MemoryStore;

/// Counts connect-phase invocations so sticky-invalid tests can assert
/// that no script work is repeated.
struct CountingVerifier {
    calls: AtomicUsize,
}

impl CountingVerifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl ScriptVerifier for CountingVerifier {
    fn verify(
        &self,
        _tx: &Transaction,
        _input_index: usize,
        _prevout: &PopulatedOutput,
        _forks: ForkFlags,
    ) -> Result<(), &'static str> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counting_chain(
    settings: Settings,
) -> (Chain<MemoryStore>, Block, Arc<CountingVerifier>) {
    let params = chain_params(Network::Regtest);
    let genesis = genesis_block(&params);
    let verifier = CountingVerifier::new();
    let chain = Chain::with_verifier(
        Arc::new(MemoryStore::new()),
        params,
        settings,
        &genesis,
        Arc::clone(&verifier) as Arc<dyn ScriptVerifier>,
    )
    .expect("chain construction");
    assert!(chain.start());
    (chain, genesis, verifier)
}

fn spend(prevout: OutPoint, value: i64, script_pubkey: Vec<u8>) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout,
            script_sig: vec![0x01],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value,
            script_pubkey,
        }],
        lock_time: 0,
    }
}

#[test]
fn linear_blocks_validate_and_confirm() {
    let (chain, genesis, params) = new_chain(test_settings());

    let log: Arc<Mutex<Vec<(u32, usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    chain.subscribe_blocks(move |event| {
        sink.lock()
            .unwrap()
            .push((event.fork_height, event.incoming.len(), event.outgoing.len()));
        true
    });

    let block1 = block_for(
        genesis.hash(),
        GENESIS_TIME + SPACING,
        params.genesis_bits,
        vec![coinbase_tx(1, 50 * COIN)],
    );
    chain
        .organize_header(Arc::new(block1.header.clone()))
        .expect("header 1");
    chain
        .organize_block(Arc::clone(&block1), 1)
        .expect("block 1");

    assert_eq!(chain.get_top(false).expect("confirmed top").height, 1);
    assert_eq!(chain.fork_point().height, 1);
    assert_eq!(chain.fork_point().hash, block1.hash());
    let state = chain.get_block_state(&block1.hash()).expect("state");
    assert_ne!(state & STATE_VALID, 0);
    assert_ne!(state & STATE_CONFIRMED, 0);
    assert_ne!(state & STATE_STORED, 0);

    let block2 = block_for(
        block1.hash(),
        GENESIS_TIME + 2 * SPACING,
        params.genesis_bits,
        vec![coinbase_tx(2, 50 * COIN)],
    );
    chain
        .organize_header(Arc::new(block2.header.clone()))
        .expect("header 2");
    chain
        .organize_block(Arc::clone(&block2), 2)
        .expect("block 2");

    assert_eq!(chain.get_top(false).expect("confirmed top").height, 2);
    let events = log.lock().unwrap();
    assert_eq!(*events, vec![(0, 1, 0), (1, 1, 0)]);
}

#[test]
fn revalidated_block_is_duplicate() {
    let (chain, genesis, params) = new_chain(test_settings());
    let block1 = block_for(
        genesis.hash(),
        GENESIS_TIME + SPACING,
        params.genesis_bits,
        vec![coinbase_tx(1, 50 * COIN)],
    );
    chain
        .organize_header(Arc::new(block1.header.clone()))
        .expect("header");
    chain
        .organize_block(Arc::clone(&block1), 1)
        .expect("block");
    assert_eq!(
        chain.organize_block(block1, 1),
        Err(ChainError::DuplicateBlock)
    );
}

#[test]
fn invalid_block_poisons_candidate_ancestry() {
    let (chain, genesis, verifier) = counting_chain(test_settings());
    let params = chain_params(Network::Regtest);

    // H1 carries a valid confirmed block; H2 and H3 are header-only.
    let block1 = block_for(
        genesis.hash(),
        GENESIS_TIME + SPACING,
        params.genesis_bits,
        vec![coinbase_tx(1, 50 * COIN)],
    );
    chain
        .organize_header(Arc::new(block1.header.clone()))
        .expect("header 1");
    chain
        .organize_block(Arc::clone(&block1), 1)
        .expect("block 1");

    // Bad body for H3: spends an unknown output, so accept fails before
    // any script work.
    let bad_spend = spend(
        OutPoint {
            hash: [0x77; 32],
            index: 0,
        },
        1,
        vec![0x51],
    );
    let block2 = block_for(
        block1.hash(),
        GENESIS_TIME + 2 * SPACING,
        params.genesis_bits,
        vec![coinbase_tx(2, 50 * COIN)],
    );
    let block3 = block_for(
        block2.hash(),
        GENESIS_TIME + 3 * SPACING,
        params.genesis_bits,
        vec![coinbase_tx(3, 50 * COIN), bad_spend],
    );
    chain
        .organize_header(Arc::new(block2.header.clone()))
        .expect("header 2");
    chain
        .organize_header(Arc::new(block3.header.clone()))
        .expect("header 3");

    assert_eq!(
        chain.organize_block(Arc::clone(&block3), 3),
        Err(ChainError::InvalidBlock("missing input"))
    );

    // The failing block and its unvalidated candidate ancestor are both
    // poisoned; the valid confirmed ancestor is untouched.
    assert_ne!(
        chain.get_block_state(&block3.hash()).expect("state") & STATE_INVALID,
        0
    );
    assert_ne!(
        chain.get_block_state(&block2.hash()).expect("state") & STATE_INVALID,
        0
    );
    assert_eq!(
        chain.get_block_state(&block1.hash()).expect("state") & STATE_INVALID,
        0
    );
    assert!(matches!(
        chain.get_block_error(&block3.hash()).expect("error"),
        Some(ChainError::InvalidBlock(_))
    ));

    // Resubmission short-circuits without re-running connect.
    let calls_before = verifier.calls.load(Ordering::SeqCst);
    assert_eq!(
        chain.organize_block(Arc::clone(&block3), 3),
        Err(ChainError::InvalidBlock("previously invalidated block"))
    );
    assert_eq!(
        chain.organize_block(Arc::clone(&block2), 2),
        Err(ChainError::InvalidBlock("previously invalidated block"))
    );
    assert_eq!(verifier.calls.load(Ordering::SeqCst), calls_before);

    // Headers extending the poisoned chain are rejected outright.
    let extension = header_run(block3.hash(), GENESIS_TIME + 4 * SPACING, params.genesis_bits, 1);
    assert_eq!(
        chain.organize_header(Arc::clone(&extension[0])),
        Err(ChainError::InvalidHeader("previously invalidated header"))
    );
}

#[test]
fn candidate_spend_is_rejected_as_double_spend() {
    let (chain, genesis, params) = new_chain(test_settings());

    // Mature the genesis coinbase: 100 confirmations required.
    let tip = extend_chain(&chain, genesis.hash(), 1, 101, params.genesis_bits);

    let coinbase0 = genesis.transactions[0].txid();
    let fund_outpoint = OutPoint {
        hash: coinbase0,
        index: 0,
    };

    // Block 102 spends the genesis coinbase.
    let spend_a = spend(fund_outpoint, 50 * COIN, vec![0x51]);
    let block102 = block_for(
        tip,
        GENESIS_TIME + 102 * SPACING,
        params.genesis_bits,
        vec![coinbase_tx(102, 50 * COIN), spend_a],
    );
    chain
        .organize_header(Arc::new(block102.header.clone()))
        .expect("header 102");
    chain
        .organize_block(Arc::clone(&block102), 102)
        .expect("block 102");

    // Block 103 tries to spend the same outpoint again.
    let spend_b = spend(fund_outpoint, 50 * COIN, vec![0x51]);
    let block103 = block_for(
        block102.hash(),
        GENESIS_TIME + 103 * SPACING,
        params.genesis_bits,
        vec![coinbase_tx(103, 50 * COIN), spend_b],
    );
    chain
        .organize_header(Arc::new(block103.header.clone()))
        .expect("header 103");
    assert_eq!(
        chain.organize_block(Arc::clone(&block103), 103),
        Err(ChainError::InvalidBlock("double spend"))
    );
}

#[test]
fn premature_coinbase_spend_is_rejected() {
    let (chain, genesis, params) = new_chain(test_settings());
    let tip = extend_chain(&chain, genesis.hash(), 1, 5, params.genesis_bits);

    let immature = spend(
        OutPoint {
            hash: genesis.transactions[0].txid(),
            index: 0,
        },
        50 * COIN,
        vec![0x51],
    );
    let block6 = block_for(
        tip,
        GENESIS_TIME + 6 * SPACING,
        params.genesis_bits,
        vec![coinbase_tx(6, 50 * COIN), immature],
    );
    chain
        .organize_header(Arc::new(block6.header.clone()))
        .expect("header 6");
    assert_eq!(
        chain.organize_block(Arc::clone(&block6), 6),
        Err(ChainError::InvalidBlock("premature coinbase spend"))
    );
}

#[test]
fn coinbase_overclaim_is_rejected() {
    let (chain, genesis, params) = new_chain(test_settings());
    let block1 = block_for(
        genesis.hash(),
        GENESIS_TIME + SPACING,
        params.genesis_bits,
        vec![coinbase_tx(1, 50 * COIN + 1)],
    );
    chain
        .organize_header(Arc::new(block1.header.clone()))
        .expect("header");
    assert_eq!(
        chain.organize_block(block1, 1),
        Err(ChainError::InvalidBlock("coinbase claim exceeds subsidy"))
    );
}

#[test]
fn stronger_fork_reorganizes_confirmed_chain() {
    let (chain, genesis, params) = new_chain(test_settings());

    let log: Arc<Mutex<Vec<(u32, Vec<Hash256>, Vec<Hash256>)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    chain.subscribe_blocks(move |event| {
        sink.lock().unwrap().push((
            event.fork_height,
            event.incoming.iter().map(|block| block.hash()).collect(),
            event.outgoing.iter().map(|block| block.hash()).collect(),
        ));
        true
    });

    // Confirmed side A: two blocks.
    let block_a1 = block_for(
        genesis.hash(),
        GENESIS_TIME + SPACING,
        params.genesis_bits,
        vec![coinbase_tx(1, 50 * COIN)],
    );
    let block_a2 = block_for(
        block_a1.hash(),
        GENESIS_TIME + 2 * SPACING,
        params.genesis_bits,
        vec![coinbase_tx(2, 50 * COIN)],
    );
    for (block, height) in [(&block_a1, 1u32), (&block_a2, 2u32)] {
        chain
            .organize_header(Arc::new(block.header.clone()))
            .expect("header A");
        chain
            .organize_block(Arc::clone(block), height)
            .expect("block A");
    }
    assert_eq!(chain.get_top(false).expect("top").height, 2);

    // Side B: three blocks rooted at genesis. Header admission pools the
    // first two, then the third wins the candidate index.
    let mut side_b = Vec::new();
    let mut prev = genesis.hash();
    for height in 1..=3u32 {
        // A slightly smaller claim keeps side B's coinbases distinct from
        // side A's.
        let block = block_for(
            prev,
            GENESIS_TIME + height * SPACING + 13,
            params.genesis_bits,
            vec![coinbase_tx(height, 50 * COIN - 1)],
        );
        prev = block.hash();
        side_b.push(block);
    }
    assert_eq!(
        chain.organize_header(Arc::new(side_b[0].header.clone())),
        Err(ChainError::InsufficientWork)
    );
    assert_eq!(
        chain.organize_header(Arc::new(side_b[1].header.clone())),
        Err(ChainError::InsufficientWork)
    );
    chain
        .organize_header(Arc::new(side_b[2].header.clone()))
        .expect("winning header branch");
    assert_eq!(chain.fork_point().height, 0);

    // Bodies validate in order; the confirmed swap happens only once the
    // valid candidate work beats the confirmed work above the fork.
    chain
        .organize_block(side_b[0].clone(), 1)
        .expect("block B1");
    chain
        .organize_block(side_b[1].clone(), 2)
        .expect("block B2");
    assert_eq!(chain.get_top(false).expect("top").hash, block_a2.hash());
    chain
        .organize_block(side_b[2].clone(), 3)
        .expect("block B3");

    assert_eq!(chain.get_top(false).expect("top").hash, side_b[2].hash());
    assert_eq!(chain.fork_point().height, 3);

    let events = log.lock().unwrap();
    let (fork_height, incoming, outgoing) = events.last().expect("swap event");
    assert_eq!(*fork_height, 0);
    assert_eq!(
        incoming,
        &side_b.iter().map(|block| block.hash()).collect::<Vec<_>>()
    );
    assert_eq!(outgoing, &vec![block_a1.hash(), block_a2.hash()]);
    // Displaced blocks return to a non-confirmed state.
    for hash in outgoing {
        assert_eq!(
            chain.get_block_state(hash).expect("state") & STATE_CONFIRMED,
            0
        );
    }
}
