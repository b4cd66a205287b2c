//! `SchedulerConfig` mirrors the scheduler-creation config struct
//! field-for-field, plus the `DEFAULT_GLOBAL_QUEUE_INTERVAL`-style tunables
//! `kernel/src/executor/scheduler/multi_thread/worker.rs` hangs off its
//! `Worker`/`Core`.

/// Default number of times a worker polls its local queue before checking
/// the global queue.
pub const DEFAULT_GLOBAL_QUEUE_INTERVAL: u32 = 61;

/// Reactor park timeout: how long the reactor thread blocks in one poll
/// before checking for shutdown.
pub const DEFAULT_IO_POLL_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// `0` autodetects the number of online CPUs.
    pub num_workers: usize,
    /// Fixes `num_workers` to 1, disables stealing, and seeds the tie-break
    /// PRNG.
    pub deterministic: bool,
    pub random_seed: u64,
    pub stack_hint: usize,
    pub enable_stealing: bool,
    pub global_queue_interval: u32,
    pub io_poll_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            num_workers: 0,
            deterministic: false,
            random_seed: 0,
            stack_hint: sea_fiber::stack::DEFAULT_STACK_SIZE,
            enable_stealing: true,
            global_queue_interval: DEFAULT_GLOBAL_QUEUE_INTERVAL,
            io_poll_timeout_ms: DEFAULT_IO_POLL_TIMEOUT_MS,
        }
    }
}

impl SchedulerConfig {
    /// Single-worker, no-stealing, seeded configuration used by the
    /// property tests.
    #[must_use]
    pub fn deterministic(seed: u64) -> Self {
        SchedulerConfig {
            num_workers: 1,
            deterministic: true,
            random_seed: seed,
            enable_stealing: false,
            ..SchedulerConfig::default()
        }
    }

    #[must_use]
    pub fn resolved_workers(&self) -> usize {
        if self.num_workers == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.num_workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_config_disables_stealing_and_fixes_one_worker() {
        let config = SchedulerConfig::deterministic(42);
        assert_eq!(config.resolved_workers(), 1);
        assert!(!config.enable_stealing);
        assert!(config.deterministic);
        assert_eq!(config.random_seed, 42);
    }

    #[test]
    fn explicit_worker_count_is_not_autodetected() {
        let config = SchedulerConfig {
            num_workers: 3,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.resolved_workers(), 3);
    }
}
