//! `AsyncScope`, the structured-concurrency container
//! describes — "a mutable list of child fibers, a cancellation token
//! (atomic bool + parent chain), optional parent scope, a first-error
//! slot, disposal state, statistics counters."
//!
//! Grounded on `libs/async-exec/src/scheduler.rs`'s `AtomicUsize` +
//! `compare_exchange` idioms for `race`/`parallel_for` (DESIGN.md); the
//! child-list/mutex shape is the scope's own, since no example crate in
//! the corpus has a directly analogous structured-concurrency type.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sea_fiber::FiberId;
use tracing::trace;

use crate::context;
use crate::scheduler::Scheduler;

enum ChildOutcome {
    Ok,
    Err(String),
}

struct ScopeInner {
    children: Vec<FiberId>,
    results: HashMap<FiberId, Arc<Mutex<Option<ChildOutcome>>>>,
    first_error: Option<String>,
    error_count: u64,
    destroyed: bool,
}

/// A structured-concurrency scope owning a set of child fibers. A scope is destroyable only once every child has reached
/// `DONE`/`ERROR` (enforced by [`AsyncScope::destroy`] waiting first).
pub struct AsyncScope {
    scheduler: Arc<Scheduler>,
    parent: Option<Arc<AsyncScope>>,
    cancelled: AtomicBool,
    inner: Mutex<ScopeInner>,
}

impl AsyncScope {
    /// Creates a scope rooted under `parent`, or a fresh cancellation root
    /// if `parent` is `None` ( `create(parent?) -> scope`).
    #[must_use]
    pub fn create(parent: Option<Arc<AsyncScope>>, scheduler: &Arc<Scheduler>) -> Arc<Self> {
        Arc::new(AsyncScope {
            scheduler: Arc::clone(scheduler),
            parent,
            cancelled: AtomicBool::new(false),
            inner: Mutex::new(ScopeInner {
                children: Vec::new(),
                results: HashMap::new(),
                first_error: None,
                error_count: 0,
                destroyed: false,
            }),
        })
    }

    /// Own-or-inherited cancellation state; a scope whose parent has been
    /// cancelled reports itself cancelled too.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
        || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Spawns `body` as a child of this scope, on the caller's current
    /// scheduler. Tracks completion (and, on panic, the first error
    /// message) for [`AsyncScope::wait_all`]/[`AsyncScope::has_error`].
    pub fn spawn<F>(self: &Arc<Self>, priority: u8, body: F) -> FiberId
    where
        F: FnOnce() + Send + 'static,
    {
        let cell: Arc<Mutex<Option<ChildOutcome>>> = Arc::new(Mutex::new(None));
        let scope = Arc::clone(self);
        let cell_for_body = Arc::clone(&cell);

        let wrapped = move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(body));
            match outcome {
                Ok(()) => {
                    *cell_for_body.lock() = Some(ChildOutcome::Ok);
                    scope.record_error(None);
                }
                Err(payload) => {
                    let message = panic_message(&payload);
                    *cell_for_body.lock() = Some(ChildOutcome::Err(message.clone()));
                    scope.record_error(Some(message));
                    // Re-raise so the fiber's own entry trampoline also
                    // observes the panic and leaves it in `FiberState::ERROR`
                    //, not just this scope's bookkeeping.
                    std::panic::resume_unwind(payload);
                }
            }
        };

        let parent_fiber = context::current_fiber();
        let id = self
            .scheduler
            .spawn_with_parent(priority, parent_fiber, wrapped);

        let mut inner = self.inner.lock();
        inner.children.push(id);
        inner.results.insert(id, cell);
        trace!(fiber = id.as_u64(), "scope spawned child");
        id
    }

    fn record_error(&self, error: Option<String>) {
        if let Some(message) = error {
            let mut inner = self.inner.lock();
            inner.error_count += 1;
            if inner.first_error.is_none() {
                inner.first_error = Some(message);
            }
        }
    }

    /// Cooperatively cancels this scope: marks it cancelled and cancels
    /// every live child fiber (and, recursively, their descendants in the
    /// fiber tree, so nested scopes spawned from within a child are
    /// cancelled too). Idempotent.
    pub fn cancel(self: &Arc<Self>) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = self.inner.lock().children.clone();
        for id in children {
            self.cancel_recursive(id);
        }
    }

    fn cancel_recursive(&self, id: FiberId) {
        if let Some(fiber) = self.scheduler.lookup(id) {
            fiber.cancel();
            self.scheduler.unblock(id);
            for child in fiber.children() {
                self.cancel_recursive(child);
            }
        }
    }

    /// Blocks the caller fiber (by yielding) until every child has
    /// finished. Off a fiber, busy-polls the OS
    /// thread instead — used by top-level harness/test code.
    pub fn wait_all(self: &Arc<Self>) {
        self.wait_all_timeout(None);
    }

    /// As [`AsyncScope::wait_all`], but gives up after `timeout`, returning
    /// `false` if children are still running (they are *not*
    /// auto-cancelled, ).
    pub fn wait_all_timeout(self: &Arc<Self>, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.reap_finished();
            if self.inner.lock().children.is_empty() {
                return true;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            if context::current_fiber().is_some() {
                context::with_current_yielder(|yielder| yielder.suspend());
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Drops children whose completion cell has been filled in, i.e. whose
    /// fiber body has returned (normally or via panic).
    fn reap_finished(&self) {
        let mut inner = self.inner.lock();
        inner.children.retain(|id| {
            let done = inner
                .results
                .get(id)
                .is_some_and(|cell| cell.lock().is_some());
            !done
        });
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.inner.lock().first_error.is_some()
    }

    #[must_use]
    pub fn first_error(&self) -> Option<String> {
        self.inner.lock().first_error.clone()
    }

    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.inner.lock().error_count
    }

    /// Cancels, waits for every child to finish, then marks the scope
    /// destroyed. A second call is a no-op.
    pub fn destroy(self: &Arc<Self>) {
        if self.inner.lock().destroyed {
            return;
        }
        self.cancel();
        self.wait_all();
        self.inner.lock().destroyed = true;
    }

    /// Spawns one fiber per item in `items`, each pulling its index
    /// atomically from a shared counter, and waits for all of them.
    pub fn parallel_for<T, F>(self: &Arc<Self>, priority: u8, items: Vec<T>, f: F)
    where
        T: Send + 'static,
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        let len = items.len();
        let slots: Vec<Mutex<Option<T>>> = items.into_iter().map(|v| Mutex::new(Some(v))).collect();
        let slots = Arc::new(slots);
        let counter = Arc::new(AtomicUsize::new(0));
        let f = Arc::new(f);

        for _ in 0..len {
            let slots = Arc::clone(&slots);
            let counter = Arc::clone(&counter);
            let f = Arc::clone(&f);
            self.spawn(priority, move || {
                let idx = counter.fetch_add(1, Ordering::Relaxed);
                if let Some(item) = slots[idx].lock().take() {
                    f(idx, item);
                }
            });
        }
        self.wait_all();
    }

    /// Creates a nested scope, spawns every task in it, and returns the
    /// index of whichever task is first to claim the winner slot via
    /// compare-exchange; the rest are cancelled through the nested scope.
    pub fn race<F>(self: &Arc<Self>, priority: u8, tasks: Vec<F>) -> usize
    where
        F: FnOnce() + Send + 'static,
    {
        let nested = AsyncScope::create(Some(Arc::clone(self)), &self.scheduler);
        let winner = Arc::new(AtomicUsize::new(usize::MAX));

        for (idx, task) in tasks.into_iter().enumerate() {
            let winner = Arc::clone(&winner);
            let nested_for_body = Arc::clone(&nested);
            nested.spawn(priority, move || {
                task();
                if winner
                    .compare_exchange(usize::MAX, idx, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    nested_for_body.cancel();
                }
            });
        }

        nested.wait_all();
        nested.destroy();
        winner.load(Ordering::Acquire)
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "scope child panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn wait_all_observes_all_children_done() {
        let scheduler = Scheduler::new(SchedulerConfig::deterministic(1));
        scheduler.start();
        let total = Arc::new(AtomicU64::new(0));

        {
            let scheduler = Arc::clone(&scheduler);
            let total = Arc::clone(&total);
            let (tx, rx) = std::sync::mpsc::channel();
            scheduler.spawn(0, move || {
                let scope = AsyncScope::create(None, &scheduler);
                for i in 1..=100u64 {
                    let total = Arc::clone(&total);
                    scope.spawn(0, move || {
                        total.fetch_add(i, Ordering::Relaxed);
                    });
                }
                scope.wait_all();
                tx.send(()).unwrap();
            });
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        scheduler.stop();
        assert_eq!(total.load(Ordering::Relaxed), 5050);
    }

    #[test]
    fn cancel_is_idempotent_and_observed() {
        let scheduler = Scheduler::new(SchedulerConfig::deterministic(2));
        scheduler.start();
        let reached_end = Arc::new(AtomicBool::new(false));

        {
            let scheduler = Arc::clone(&scheduler);
            let reached_end = Arc::clone(&reached_end);
            let (tx, rx) = std::sync::mpsc::channel();
            scheduler.spawn(0, move || {
                let scope = AsyncScope::create(None, &scheduler);
                scope.spawn(0, move || {
                    context::with_current_yielder(|yielder| loop {
                        if yielder.is_cancelled() {
                            return;
                        }
                        yielder.suspend();
                    });
                });
                scope.cancel();
                scope.cancel();
                scope.wait_all();
                reached_end.store(true, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        scheduler.stop();
        assert!(reached_end.load(Ordering::SeqCst));
    }
}
