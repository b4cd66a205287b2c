//! `SchedulerStats`, grounded on the `Counter`/`counter!` pattern in
//! `kernel/src/executor/scheduler/multi_thread/worker.rs` (`NUM_PARKS`,
//! `NUM_POLLS`,...), collapsed into one struct rather than free-standing
//! statics since `sea_runtime::Scheduler` supports multiple independent
//! instances per process.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SchedulerStats {
    created: AtomicU64,
    completed: AtomicU64,
    switches: AtomicU64,
    steal_attempts: AtomicU64,
    steal_successes: AtomicU64,
    io_events: AtomicU64,
}

/// Point-in-time snapshot returned by `Scheduler::stats` (
/// `scheduler_stats()`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub created: u64,
    pub completed: u64,
    pub switches: u64,
    pub steal_attempts: u64,
    pub steal_successes: u64,
    pub io_events: u64,
}

impl SchedulerStats {
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_switch(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_steal_attempt(&self) {
        self.steal_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_steal_success(&self) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_io_event(&self) {
        self.io_events.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steal_successes: self.steal_successes.load(Ordering::Relaxed),
            io_events: self.io_events.load(Ordering::Relaxed),
        }
    }
}
