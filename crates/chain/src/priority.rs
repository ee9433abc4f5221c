//! Write-lock prioritization and the script-validation pool.

use std::sync::{Condvar, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::ChainError;

#[derive(Default)]
struct LockState {
    locked: bool,
    waiting_high: usize,
}

/// A write mutex with two waiter queues. Header and block organizers take
/// the high-priority side; the transaction organizer takes the low-priority
/// side and yields to any waiting consensus writer. A low-priority holder
/// is never preempted, but no further low-priority acquirer is granted
/// while a high-priority one waits.
#[derive(Default)]
pub struct PrioritizedMutex {
    state: Mutex<LockState>,
    released: Condvar,
}

impl PrioritizedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_high_priority(&self) -> HighPriorityGuard<'_> {
        let mut state = self.state.lock().expect("prioritized mutex poisoned");
        state.waiting_high += 1;
        while state.locked {
            state = self.released.wait(state).expect("prioritized mutex poisoned");
        }
        state.waiting_high -= 1;
        state.locked = true;
        HighPriorityGuard { mutex: self }
    }

    pub fn lock_low_priority(&self) -> LowPriorityGuard<'_> {
        let mut state = self.state.lock().expect("prioritized mutex poisoned");
        while state.locked || state.waiting_high > 0 {
            state = self.released.wait(state).expect("prioritized mutex poisoned");
        }
        state.locked = true;
        LowPriorityGuard { mutex: self }
    }

    fn unlock(&self) {
        let mut state = self.state.lock().expect("prioritized mutex poisoned");
        state.locked = false;
        drop(state);
        self.released.notify_all();
    }
}

pub struct HighPriorityGuard<'a> {
    mutex: &'a PrioritizedMutex,
}

impl Drop for HighPriorityGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

pub struct LowPriorityGuard<'a> {
    mutex: &'a PrioritizedMutex,
}

impl Drop for LowPriorityGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// Thread pool reserved for script-validation fan-outs. Writers dispatch
/// their connect phase here and park on a [`CompletionLatch`] so the pool
/// is never consumed by waiting callers.
pub struct PriorityPool {
    pool: rayon::ThreadPool,
}

impl PriorityPool {
    pub fn new(threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("priority-{index}"))
            .build()
            .expect("priority pool construction");
        Self { pool }
    }

    /// Run the fan-out closure on the pool. Rayon parallel iterators inside
    /// the closure split across the pool's threads.
    pub fn dispatch<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(work);
    }
}

/// One-shot completion signal for a parked admission. Created fresh before
/// each dispatch; a second set on the same latch is a programming error.
pub struct CompletionLatch {
    sender: Sender<Result<(), ChainError>>,
    receiver: Receiver<Result<(), ChainError>>,
}

impl CompletionLatch {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self { sender, receiver }
    }

    pub fn completer(&self) -> LatchCompleter {
        LatchCompleter {
            sender: self.sender.clone(),
        }
    }

    /// Park the calling thread until the fan-out signals completion.
    pub fn wait(self) -> Result<(), ChainError> {
        // The sender half kept by self must not hold the channel open.
        let Self { sender, receiver } = self;
        drop(sender);
        receiver.recv().unwrap_or(Err(ChainError::OperationFailed))
    }
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LatchCompleter {
    sender: Sender<Result<(), ChainError>>,
}

impl LatchCompleter {
    pub fn complete(self, result: Result<(), ChainError>) {
        debug_assert!(!self.sender.is_full(), "completion latch set twice");
        let _ = self.sender.try_send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn high_priority_overtakes_waiting_low() {
        let mutex = Arc::new(PrioritizedMutex::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let holder = mutex.lock_high_priority();

        let low = {
            let mutex = Arc::clone(&mutex);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let _guard = mutex.lock_low_priority();
                order.lock().unwrap().push("low");
            })
        };
        // Let the low waiter park first.
        thread::sleep(Duration::from_millis(50));
        let high = {
            let mutex = Arc::clone(&mutex);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let _guard = mutex.lock_high_priority();
                order.lock().unwrap().push("high");
            })
        };
        thread::sleep(Duration::from_millis(50));
        drop(holder);

        high.join().unwrap();
        low.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }

    #[test]
    fn latch_delivers_fanout_result() {
        let pool = PriorityPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let latch = CompletionLatch::new();
        let completer = latch.completer();
        let worker_counter = Arc::clone(&counter);
        pool.dispatch(move || {
            worker_counter.fetch_add(1, Ordering::SeqCst);
            completer.complete(Ok(()));
        });
        assert_eq!(latch.wait(), Ok(()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn latch_reports_failure_when_completer_dropped() {
        let latch = CompletionLatch::new();
        let completer = latch.completer();
        drop(completer);
        assert_eq!(latch.wait(), Err(ChainError::OperationFailed));
    }
}
