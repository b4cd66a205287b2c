//! The work-stealing multi-threaded scheduler.
//!
//! Grounded on `kernel/src/executor/scheduler/multi_thread/{mod,worker}.rs`'s
//! topology (N workers, one global queue, per-worker local queues, a
//! shared idle/park coordinator) with the task-polling machinery replaced
//! by `sea_fiber::Fiber::resume` (DESIGN.md).

pub(crate) mod park;
pub(crate) mod queue;
pub mod stats;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_deque::Stealer;
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sea_fiber::{Fiber, FiberId, FiberState};
use tracing::{debug, trace};

use crate::config::SchedulerConfig;
use crate::context;
use queue::{GlobalQueue, LocalQueue};
use park::Parker;
pub use stats::StatsSnapshot;
use stats::SchedulerStats;

/// A multi-threaded fiber scheduler: `N` worker threads cooperatively
/// running stackful fibers, plus a dedicated I/O reactor thread.
pub struct Scheduler {
    pub(crate) config: SchedulerConfig,
    fibers: RwLock<HashMap<FiberId, Arc<Fiber>>>,
    global: GlobalQueue,
    stealers: RwLock<Vec<Stealer<FiberId>>>,
    parkers: Vec<Parker>,
    next_wake: AtomicUsize,
    stats: SchedulerStats,
    reactor: crate::reactor::Reactor,
    shutdown: AtomicBool,
    started: AtomicBool,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    reactor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let num_workers = config.resolved_workers().max(1);
        let reactor = crate::reactor::Reactor::new().expect("failed to create I/O reactor");
        Arc::new(Scheduler {
            config,
            fibers: RwLock::new(HashMap::new()),
            global: GlobalQueue::new(),
            stealers: RwLock::new(Vec::with_capacity(num_workers)),
            parkers: (0..num_workers).map(|_| Parker::new()).collect(),
            next_wake: AtomicUsize::new(0),
            stats: SchedulerStats::default(),
            reactor,
            shutdown: AtomicBool::new(false),
            started: AtomicBool::new(false),
            worker_handles: Mutex::new(Vec::new()),
            reactor_handle: Mutex::new(None),
        })
    }

    /// Starts the worker threads and the reactor thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let num_workers = self.parkers.len();
        debug!(num_workers, "starting scheduler");

        let mut locals = Vec::with_capacity(num_workers);
        {
            let mut stealers = self.stealers.write();
            for _ in 0..num_workers {
                let (local, stealer) = LocalQueue::new();
                stealers.push(stealer);
                locals.push(local);
            }
        }

        for (worker_id, local) in locals.into_iter().enumerate() {
            let scheduler = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("sea-worker-{worker_id}"))
                .spawn(move || worker::run(scheduler, worker_id, local))
                .expect("failed to spawn scheduler worker thread");
            self.worker_handles.lock().push(handle);
        }

        {
            let scheduler = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name("sea-reactor".to_string())
                .spawn(move || scheduler.run_reactor())
                .expect("failed to spawn reactor thread");
            *self.reactor_handle.lock() = Some(handle);
        }
    }

    /// Signals shutdown and waits for every worker and the reactor thread
    /// to exit.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        for parker in &self.parkers {
            parker.unpark();
        }
        for handle in self.worker_handles.lock().drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.reactor_handle.lock().take() {
            let _ = handle.join();
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn stats_inner(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Creates a fiber and pushes it to the global queue. `parent` attaches the new fiber as the given fiber's
    /// child when `Some` (structured concurrency, driven by
    /// `sea_runtime::scope`).
    pub fn spawn_with_parent<F>(self: &Arc<Self>, priority: u8, parent: Option<FiberId>, body: F) -> FiberId
    where
        F: FnOnce() + Send + 'static,
    {
        let wrapped = move |yielder: &sea_fiber::Yielder<'_>| {
            let _yielder_guard = context::enter_yielder(yielder);
            body();
        };
        let fiber = Arc::new(Fiber::new(self.config.stack_hint, priority, parent, wrapped));
        let id = fiber.id();
        if let Some(parent_id) = parent {
            if let Some(parent_fiber) = self.fibers.read().get(&parent_id) {
                parent_fiber.attach_child(id);
            }
        }
        self.fibers.write().insert(id, Arc::clone(&fiber));
        self.stats.record_created();
        self.global.push(id);
        self.wake_one();
        trace!(fiber = id.as_u64(), priority, "spawned fiber");
        id
    }

    pub fn spawn<F>(self: &Arc<Self>, priority: u8, body: F) -> FiberId
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_with_parent(priority, None, body)
    }

    /// Transitions a `BLOCKED` fiber back to `READY` and pushes it to the
    /// global queue. Safe to call from any thread, including the reactor.
    pub fn unblock(&self, fiber: FiberId) {
        let Some(handle) = self.fibers.read().get(&fiber).cloned() else {
            return;
        };
        if handle.state() != FiberState::Blocked {
            return;
        }
        handle.mark_ready();
        self.global.push(fiber);
        self.wake_one();
    }

    #[must_use]
    pub(crate) fn lookup(&self, id: FiberId) -> Option<Arc<Fiber>> {
        self.fibers.read().get(&id).cloned()
    }

    pub(crate) fn retire(&self, id: FiberId) {
        if let Some(fiber) = self.fibers.write().remove(&id) {
            if let Some(parent_id) = fiber.parent() {
                if let Some(parent_fiber) = self.fibers.read().get(&parent_id) {
                    parent_fiber.detach_child(id);
                }
            }
        }
        self.stats.record_completed();
    }

    pub(crate) fn global_pop(&self) -> Option<FiberId> {
        self.global.pop()
    }

    pub(crate) fn global_push(&self, id: FiberId) {
        self.global.push(id);
    }

    fn wake_one(&self) {
        if self.parkers.is_empty() {
            return;
        }
        let idx = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.parkers.len();
        self.parkers[idx].unpark();
    }

    pub(crate) fn park(&self, worker_id: usize, timeout: std::time::Duration) {
        self.parkers[worker_id].park_timeout(timeout);
    }

    pub(crate) fn stealers_snapshot(&self) -> Vec<Stealer<FiberId>> {
        self.stealers.read().clone()
    }

    pub(crate) fn rng_for(&self, worker_id: usize) -> ChaCha8Rng {
        if self.config.deterministic {
            ChaCha8Rng::seed_from_u64(self.config.random_seed.wrapping_add(worker_id as u64))
        } else {
            ChaCha8Rng::from_entropy()
        }
    }

    /// Registers an I/O descriptor, unblocking `fiber` when it becomes
    /// ready.
    ///
    /// # Safety
    /// See [`crate::reactor::Reactor::register`].
    pub unsafe fn register_io_event(
        &self,
        fd: std::os::unix::io::RawFd,
        readable: bool,
        writable: bool,
        fiber: FiberId,
    ) -> std::io::Result<crate::reactor::IoToken> {
        // Safety: forwarded to the caller.
        unsafe { self.reactor.register(fd, readable, writable, fiber) }
    }

    pub fn deregister_io_event(
        &self,
        fd: std::os::unix::io::RawFd,
        token: crate::reactor::IoToken,
    ) -> std::io::Result<()> {
        self.reactor.deregister(fd, token)
    }

    fn run_reactor(&self) {
        let timeout = std::time::Duration::from_millis(self.config.io_poll_timeout_ms);
        while !self.is_shutdown() {
            if let Err(err) = self.reactor.poll_once(timeout, &self.stats, |fiber| {
                self.unblock(fiber);
            }) {
                tracing::warn!(%err, "reactor poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[test]
    fn spawned_fiber_runs_and_retires() {
        let scheduler = Scheduler::new(SchedulerConfig::deterministic(1));
        scheduler.start();
        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = Arc::clone(&ran);
        scheduler.spawn(0, move || {
            ran2.store(1, Ordering::SeqCst);
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ran.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats().created, 1);
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[test]
    fn multi_worker_stealing_runs_all_fibers() {
        let scheduler = Scheduler::new(SchedulerConfig {
            num_workers: 4,
            ..SchedulerConfig::default()
        });
        scheduler.start();
        let count = Arc::new(AtomicU64::new(0));
        for _ in 0..200 {
            let count = Arc::clone(&count);
            scheduler.spawn(0, move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 200 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop();

        assert_eq!(count.load(Ordering::SeqCst), 200);
    }
}
