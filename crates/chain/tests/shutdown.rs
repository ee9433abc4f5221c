mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use emberd_chain::validate::ScriptVerifier;
use emberd_chain::{Chain, ChainError, PopulatedOutput, STATE_VALID};
use emberd_consensus::forks::ForkFlags;
use emberd_consensus::money::COIN;
use emberd_consensus::{chain_params, Network};
use emberd_primitives::outpoint::OutPoint;
use emberd_primitives::transaction::{Transaction, TxIn, TxOut};
use emberd_storage::memory::MemoryStore;

/// Parks every script check until released, so a shutdown can race a
/// validation that is waiting in the priority pool.
struct ParkingVerifier {
    release: AtomicBool,
}

impl ParkingVerifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            release: AtomicBool::new(false),
        })
    }

    fn release(&self) {
        self.release.store(true, Ordering::Release);
    }
}

impl ScriptVerifier for ParkingVerifier {
    fn verify(
        &self,
        _tx: &Transaction,
        _input_index: usize,
        _prevout: &PopulatedOutput,
        _forks: ForkFlags,
    ) -> Result<(), &'static str> {
        while !self.release.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}

fn parked_chain() -> (Arc<Chain<MemoryStore>>, Arc<ParkingVerifier>, OutPoint) {
    let params = chain_params(Network::Regtest);
    let genesis = genesis_block(&params);
    let verifier = ParkingVerifier::new();
    let chain = Arc::new(
        Chain::with_verifier(
            Arc::new(MemoryStore::new()),
            params.clone(),
            test_settings(),
            &genesis,
            Arc::clone(&verifier) as Arc<dyn ScriptVerifier>,
        )
        .expect("chain construction"),
    );
    assert!(chain.start());

    // Mature the genesis coinbase without exercising the verifier.
    verifier.release.store(true, Ordering::Release);
    extend_chain(&chain, genesis.hash(), 1, 101, params.genesis_bits);
    verifier.release.store(false, Ordering::Release);

    let outpoint = OutPoint {
        hash: genesis.transactions[0].txid(),
        index: 0,
    };
    (chain, verifier, outpoint)
}

#[test]
fn stop_completes_parked_transaction_admission() {
    let (chain, verifier, outpoint) = parked_chain();

    let tx = Arc::new(Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: outpoint,
            script_sig: vec![0x01],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 50 * COIN,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    });

    let worker = {
        let chain = Arc::clone(&chain);
        let tx = Arc::clone(&tx);
        thread::spawn(move || chain.organize_transaction(tx))
    };

    // Let the admission park inside the connect fan-out, then stop.
    thread::sleep(Duration::from_millis(50));
    chain.stop();
    verifier.release();

    assert_eq!(worker.join().expect("join"), Err(ChainError::ServiceStopped));

    // No write happened: after restart the same admission is fresh.
    assert!(chain.start());
    chain
        .organize_transaction(tx)
        .expect("admission after restart");
}

#[test]
fn stop_completes_parked_block_validation() {
    let (chain, verifier, outpoint) = parked_chain();
    let params = chain_params(Network::Regtest);
    let tip = chain.get_top(false).expect("tip");

    let spend = Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: outpoint,
            script_sig: vec![0x01],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 50 * COIN,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    };
    let block = block_for(
        tip.hash,
        GENESIS_TIME + 102 * SPACING,
        params.genesis_bits,
        vec![coinbase_tx(102, 50 * COIN), spend],
    );
    chain
        .organize_header(Arc::new(block.header.clone()))
        .expect("header 102");

    let worker = {
        let chain = Arc::clone(&chain);
        let block = Arc::clone(&block);
        thread::spawn(move || chain.organize_block(block, 102))
    };

    thread::sleep(Duration::from_millis(50));
    chain.stop();
    verifier.release();

    assert_eq!(worker.join().expect("join"), Err(ChainError::ServiceStopped));

    // The block was neither validated nor confirmed.
    let state = chain.get_block_state(&block.hash()).expect("state");
    assert_eq!(state & STATE_VALID, 0);
    assert_eq!(chain.get_top(false).expect("confirmed tip").height, 101);
}
