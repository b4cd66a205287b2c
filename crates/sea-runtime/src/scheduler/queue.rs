//! The lock-free MPMC run queue pair, Michael-Scott style, where
//! stealing touches only the victim's local queue.
//!
//! Implemented on top of `crossbeam_deque` rather than a hand-rolled
//! intrusive atomic-pointer list: an `Injector` already is the lock-free
//! MPMC structure this needs, and a per-worker `Worker`/`Stealer` pair is
//! exactly a local queue where stealing only ever touches the victim's
//! own queue (DESIGN.md).

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use sea_fiber::FiberId;

/// The shared global run queue.
pub struct GlobalQueue {
    injector: Injector<FiberId>,
}

impl GlobalQueue {
    pub fn new() -> Self {
        GlobalQueue {
            injector: Injector::new(),
        }
    }

    pub fn push(&self, fiber: FiberId) {
        self.injector.push(fiber);
    }

    /// Pops one fiber directly from the global queue.
    pub fn pop(&self) -> Option<FiberId> {
        loop {
            match self.injector.steal() {
                Steal::Success(id) => return Some(id),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Steals a batch from the global queue into `dest`'s local queue,
    /// returning one fiber to run immediately.
    pub fn steal_batch_and_pop(&self, dest: &Worker<FiberId>) -> Option<FiberId> {
        loop {
            match self.injector.steal_batch_and_pop(dest) {
                Steal::Success(id) => return Some(id),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}

impl Default for GlobalQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker's local run queue plus the `Stealer` handle other workers use
/// to steal from it.
pub struct LocalQueue {
    worker: Worker<FiberId>,
}

impl LocalQueue {
    pub fn new() -> (Self, Stealer<FiberId>) {
        let worker = Worker::new_fifo();
        let stealer = worker.stealer();
        (LocalQueue { worker }, stealer)
    }

    pub fn push(&self, fiber: FiberId) {
        self.worker.push(fiber);
    }

    pub fn pop(&self) -> Option<FiberId> {
        self.worker.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.worker.is_empty()
    }

    /// Attempts one steal from `victim` into this worker's local queue,
    /// returning one fiber to run immediately.
    pub fn steal_from(&self, victim: &Stealer<FiberId>) -> Option<FiberId> {
        loop {
            match victim.steal_batch_and_pop(&self.worker) {
                Steal::Success(id) => return Some(id),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}
