//! Reorganization and mempool event subscribers.

use std::sync::{Arc, Mutex};

use emberd_primitives::block::{Block, BlockHeader};
use emberd_primitives::transaction::Transaction;

/// Delivered on every header-index reorganization, and once with empty
/// branches as the unsubscribe terminator.
#[derive(Clone, Debug)]
pub struct HeaderEvent {
    pub code: u8,
    pub fork_height: u32,
    pub incoming: Arc<Vec<Arc<BlockHeader>>>,
    pub outgoing: Arc<Vec<Arc<BlockHeader>>>,
}

impl HeaderEvent {
    pub(crate) fn terminator() -> Self {
        Self {
            code: 0,
            fork_height: 0,
            incoming: Arc::new(Vec::new()),
            outgoing: Arc::new(Vec::new()),
        }
    }
}

/// Delivered on every confirmed-chain reorganization.
#[derive(Clone, Debug)]
pub struct BlockEvent {
    pub code: u8,
    pub fork_height: u32,
    pub incoming: Arc<Vec<Arc<Block>>>,
    pub outgoing: Arc<Vec<Arc<Block>>>,
}

impl BlockEvent {
    pub(crate) fn terminator() -> Self {
        Self {
            code: 0,
            fork_height: 0,
            incoming: Arc::new(Vec::new()),
            outgoing: Arc::new(Vec::new()),
        }
    }
}

/// Delivered on every mempool admission.
#[derive(Clone, Debug)]
pub struct TransactionEvent {
    pub code: u8,
    pub transaction: Option<Arc<Transaction>>,
}

impl TransactionEvent {
    pub(crate) fn terminator() -> Self {
        Self {
            code: 0,
            transaction: None,
        }
    }
}

type Handler<E> = Box<dyn Fn(&E) -> bool + Send>;

/// A retained-handler subscriber list. Handlers returning `false` are
/// dropped after the delivery; `stop` broadcasts the terminator event and
/// clears the list. Delivery order follows write order because every
/// notification happens under the facade's write path.
pub struct Resubscriber<E> {
    handlers: Mutex<Vec<Handler<E>>>,
}

impl<E> Resubscriber<E> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&E) -> bool + Send + 'static,
    {
        self.handlers
            .lock()
            .expect("subscriber lock")
            .push(Box::new(handler));
    }

    pub fn notify(&self, event: &E) {
        let mut handlers = self.handlers.lock().expect("subscriber lock");
        handlers.retain(|handler| handler(event));
    }

    pub fn stop(&self, terminator: &E) {
        let mut handlers = self.handlers.lock().expect("subscriber lock");
        for handler in handlers.iter() {
            handler(terminator);
        }
        handlers.clear();
    }
}

impl<E> Default for Resubscriber<E> {
    fn default() -> Self {
        Self::new()
    }
}
