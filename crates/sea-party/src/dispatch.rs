//! The Party Dispatcher: fans a role table out across fibers and joins the
//! results according to a join strategy. Grounded stylistically on
//! `kernel/src/executor/task/mod.rs`'s per-task spawn/join bookkeeping and
//! the `Counter`/statistics pattern in
//! `kernel/src/executor/scheduler/multi_thread/worker.rs` for
//! [`FiberStats`] (see DESIGN.md).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sea_runtime::{context, time, Scheduler};
use tracing::{instrument, trace};

use crate::context::PartyContext;

/// A role's parallel entry point: given the party's context, runs once and
/// reports success or an error message.
pub type RoleFn = Arc<dyn Fn(&PartyContext) -> Result<(), String> + Send + Sync>;

/// One role's compile-time-derivable parallel metadata plus its slot
/// binding.
#[derive(Clone)]
pub struct RoleSpec {
    pub role_id: String,
    pub instance_slot_id: u32,
    pub parallel_fn: Option<RoleFn>,
    pub scheduler_tag: u32,
    pub priority: u8,
    pub interval_ms: u64,
    pub is_continuous: bool,
}

/// One entry in a generated [`FiberMap`]. Only roles with a
/// non-null `parallel_fn` are included.
#[derive(Clone)]
pub struct FiberMapEntry {
    pub role_id: String,
    pub instance_slot_id: u32,
    pub parallel_fn: RoleFn,
    pub scheduler_tag: u32,
    pub priority: u8,
    pub interval_ms: u64,
    pub is_continuous: bool,
}

/// An ordered, cacheable dispatch plan for one party.
pub struct FiberMap {
    pub party_name: String,
    pub entries: Vec<FiberMapEntry>,
    pub cache_key: u64,
}

fn fnv1a32_str(s: &str) -> u64 {
    u64::from(sea_slot::fnv1a32(s.as_bytes()))
}

/// `hash(party_type) XOR Σ hash(role_id) XOR (scheduler_tag << 32)`.
fn compute_cache_key(party_name: &str, entries: &[FiberMapEntry]) -> u64 {
    entries.iter().fold(fnv1a32_str(party_name), |key, e| {
        key ^ fnv1a32_str(&e.role_id) ^ (u64::from(e.scheduler_tag) << 32)
    })
}

type FiberMapCache = OnceLock<Mutex<HashMap<u64, Arc<FiberMap>>>>;
static FIBER_MAP_CACHE: FiberMapCache = OnceLock::new();

/// Builds a [`FiberMap`] from a party's role bindings, dropping roles with
/// no `parallel_fn`. When `cacheable` is set (every input is known at
/// compile time), the result is memoized by its cache key — the one
/// process-wide mutable table this layer keeps beyond the scheduler
/// thread-locals.
#[instrument(skip(bindings))]
pub fn generate_fiber_map(party_name: &str, bindings: Vec<RoleSpec>, cacheable: bool) -> Arc<FiberMap> {
    let entries: Vec<FiberMapEntry> = bindings
        .into_iter()
        .filter_map(|spec| {
            spec.parallel_fn.map(|parallel_fn| FiberMapEntry {
                role_id: spec.role_id,
                instance_slot_id: spec.instance_slot_id,
                parallel_fn,
                scheduler_tag: spec.scheduler_tag,
                priority: spec.priority,
                interval_ms: spec.interval_ms,
                is_continuous: spec.is_continuous,
            })
        })
        .collect();
    let cache_key = compute_cache_key(party_name, &entries);

    if cacheable {
        let cache = FIBER_MAP_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        let mut cache = cache.lock();
        if let Some(existing) = cache.get(&cache_key) {
            trace!(cache_key, "fiber map cache hit");
            return Arc::clone(existing);
        }
        let map = Arc::new(FiberMap {
            party_name: party_name.to_string(),
            entries,
            cache_key,
        });
        cache.insert(cache_key, Arc::clone(&map));
        return map;
    }

    Arc::new(FiberMap {
        party_name: party_name.to_string(),
        entries,
        cache_key,
    })
}

/// Maps a scheduler tag to the `Scheduler` that owns it, falling back to a
/// built-in default when the tag has no registered scheduler.
pub struct SchedulerRegistry {
    schedulers: HashMap<u32, Arc<Scheduler>>,
    default: Arc<Scheduler>,
}

impl SchedulerRegistry {
    #[must_use]
    pub fn new(default: Arc<Scheduler>) -> Self {
        SchedulerRegistry {
            schedulers: HashMap::new(),
            default,
        }
    }

    pub fn register(&mut self, tag: u32, scheduler: Arc<Scheduler>) {
        self.schedulers.insert(tag, scheduler);
    }

    #[must_use]
    pub fn get(&self, tag: u32) -> Arc<Scheduler> {
        self.schedulers
            .get(&tag)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

/// Rule governing how [`dispatch_parallel`] waits on the oneshot fibers it
/// spawns. Continuous (periodic) entries are never covered by these rules —
/// they are always stopped and joined explicitly once the strategy below is
/// satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Wait for every oneshot entry to complete, success or failure.
    All,
    /// Wait for the first oneshot entry to complete, then return. The
    /// remaining oneshot entries are left running unjoined; the caller owns
    /// cancelling or otherwise reaping them. Their [`RoleResult`] carries
    /// `success: false` with an explanatory error rather than a real
    /// outcome.
    Any,
    /// Wait for the first oneshot entry to *succeed*, ignoring failures and
    /// continuing to wait past them. Like `Any`, any entries still running
    /// once a winner is found are left unjoined and reported as such.
    Race,
    /// Wait until strictly more than half of the oneshot entries have
    /// succeeded, or all of them have finished, whichever comes first.
    Majority,
}

#[derive(Debug, Clone)]
pub struct RoleResult {
    pub role_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub elapsed_ns: u64,
}

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub results: Vec<RoleResult>,
    pub all_succeeded: bool,
    pub total_time_ns: u64,
}

#[derive(Debug, Default)]
struct FiberStatsInner {
    count: u64,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
    errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FiberStatsSnapshot {
    pub count: u64,
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub avg_ns: u64,
    pub errors: u64,
}

/// Per-role `{count, min/max/avg_ns, errors}` statistics (
/// `get_fiber_stats(role_id)`), updated after every dispatch round.
#[derive(Default)]
pub struct FiberStatsTable {
    by_role: Mutex<HashMap<String, FiberStatsInner>>,
}

impl FiberStatsTable {
    #[must_use]
    pub fn new() -> Self {
        FiberStatsTable::default()
    }

    fn record(&self, role_id: &str, elapsed_ns: u64, errored: bool) {
        let mut table = self.by_role.lock();
        let entry = table.entry(role_id.to_string()).or_default();
        entry.count += 1;
        entry.total_ns += elapsed_ns;
        entry.min_ns = if entry.count == 1 {
            elapsed_ns
        } else {
            entry.min_ns.min(elapsed_ns)
        };
        entry.max_ns = entry.max_ns.max(elapsed_ns);
        if errored {
            entry.errors += 1;
        }
    }

    #[must_use]
    pub fn get(&self, role_id: &str) -> Option<FiberStatsSnapshot> {
        let table = self.by_role.lock();
        table.get(role_id).map(|entry| FiberStatsSnapshot {
            count: entry.count,
            total_ns: entry.total_ns,
            min_ns: entry.min_ns,
            max_ns: entry.max_ns,
            avg_ns: entry.total_ns.checked_div(entry.count).unwrap_or(0),
            errors: entry.errors,
        })
    }
}

enum RoleOutcome {
    Ok,
    Err(String),
}

struct EntryRun {
    role_id: String,
    instance_slot_id: u32,
    completion: Arc<Mutex<Option<RoleOutcome>>>,
    stop: Arc<AtomicBool>,
    started: Instant,
    is_continuous: bool,
}

/// Spawns one fiber per [`FiberMap`] entry on its registered scheduler,
/// applies `join_strategy`, then signals and waits for every continuous
/// entry to exit.
///
/// The join strategy governs waiting on each entry's own completion
/// (oneshot entries complete when their function returns; continuous
/// entries only "complete" once explicitly stopped in step 4 below, so a
/// strategy like `ALL` effectively waits on the oneshot subset while
/// continuous roles keep running until the explicit stop phase). Under
/// `Any`/`Race`, oneshot entries still running when the strategy is
/// satisfied are left unjoined — they are not waited on in step 4 and their
/// result carries a "left running" error rather than a real outcome.
pub fn dispatch_parallel(
    map: &FiberMap,
    context: Arc<PartyContext>,
    join_strategy: JoinStrategy,
    registry: &SchedulerRegistry,
    stats: &FiberStatsTable,
) -> DispatchResult {
    let dispatch_start = Instant::now();
    let mut runs = Vec::with_capacity(map.entries.len());

    for entry in &map.entries {
        let scheduler = registry.get(entry.scheduler_tag);
        let completion: Arc<Mutex<Option<RoleOutcome>>> = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let role_fn = Arc::clone(&entry.parallel_fn);
        let party_context = Arc::clone(&context);
        let completion_for_body = Arc::clone(&completion);
        let stop_for_body = Arc::clone(&stop);
        let is_continuous = entry.is_continuous;
        let interval_ms = entry.interval_ms;
        let role_id = entry.role_id.clone();

        scheduler.spawn(entry.priority, move || {
            let mut last_error: Option<String> = None;
            loop {
                if let Err(e) = role_fn(&party_context) {
                    last_error = Some(e);
                }
                if !is_continuous || stop_for_body.load(Ordering::Acquire) {
                    break;
                }
                if interval_ms > 0 {
                    time::sleep(Duration::from_millis(interval_ms));
                } else {
                    time::yield_now();
                }
            }
            *completion_for_body.lock() = Some(match last_error {
                Some(message) => RoleOutcome::Err(message),
                None => RoleOutcome::Ok,
            });
            trace!(role_id = %role_id, "role fiber finished");
        });

        runs.push(EntryRun {
            role_id: entry.role_id.clone(),
            instance_slot_id: entry.instance_slot_id,
            completion,
            stop,
            started: Instant::now(),
            is_continuous: entry.is_continuous,
        });
    }

    wait_for_join_strategy(&runs, join_strategy);

    // `All`/`Majority` already waited above for every oneshot entry to reach
    // the strategy's threshold; join the remaining stragglers so every
    // oneshot entry has a real outcome by the time results are built. Under
    // `Any`/`Race` the still-running oneshot entries are deliberately left
    // alone — joining them here would silently turn an early return into a
    // wait for everyone, defeating the strategy.
    let join_oneshot = matches!(join_strategy, JoinStrategy::All | JoinStrategy::Majority);

    for run in &runs {
        if run.is_continuous || join_oneshot {
            run.stop.store(true, Ordering::Release);
        }
    }
    for run in &runs {
        if run.is_continuous || join_oneshot {
            block_until(|| run.completion.lock().is_some());
        }
    }

    let mut results = Vec::with_capacity(runs.len());
    for run in runs {
        let elapsed_ns = u64::try_from(run.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let outcome = run.completion.lock().take();
        let (success, error) = match outcome {
            Some(RoleOutcome::Ok) => {
                stats.record(&run.role_id, elapsed_ns, false);
                (true, None)
            }
            Some(RoleOutcome::Err(message)) => {
                stats.record(&run.role_id, elapsed_ns, true);
                (false, Some(message))
            }
            None => (
                false,
                Some("left running: not joined under this join strategy".to_string()),
            ),
        };
        trace!(
            role_id = %run.role_id,
            instance_slot_id = run.instance_slot_id,
            success,
            "role dispatch result"
        );
        results.push(RoleResult {
            role_id: run.role_id,
            success,
            error,
            elapsed_ns,
        });
    }

    let all_succeeded = match join_strategy {
        JoinStrategy::All => results.iter().all(|r| r.success),
        JoinStrategy::Any => results.iter().any(|r| r.success),
        JoinStrategy::Race => results.iter().any(|r| r.success),
        JoinStrategy::Majority => {
            let succeeded = results.iter().filter(|r| r.success).count();
            succeeded * 2 > results.len()
        }
    };

    DispatchResult {
        results,
        all_succeeded,
        total_time_ns: u64::try_from(dispatch_start.elapsed().as_nanos()).unwrap_or(u64::MAX),
    }
}

/// Applies `strategy`'s wait condition to the oneshot subset of `runs`.
/// Continuous entries never spontaneously complete, so they are excluded
/// here and joined separately once every oneshot entry (or the strategy's
/// threshold) is satisfied — step 4 handles them via an
/// explicit stop signal.
fn wait_for_join_strategy(runs: &[EntryRun], strategy: JoinStrategy) {
    let oneshot: Vec<&EntryRun> = runs.iter().filter(|r| !r.is_continuous).collect();
    if oneshot.is_empty() {
        return;
    }
    match strategy {
        JoinStrategy::All => {
            for run in &oneshot {
                block_until(|| run.completion.lock().is_some());
            }
        }
        JoinStrategy::Any => {
            block_until(|| oneshot.iter().any(|r| r.completion.lock().is_some()));
        }
        JoinStrategy::Race => {
            block_until(|| {
                oneshot.iter().any(|r| {
                    matches!(
                        *r.completion.lock(),
                        Some(RoleOutcome::Ok)
                    )
                })
            });
        }
        JoinStrategy::Majority => {
            let need = oneshot.len() / 2 + 1;
            block_until(|| {
                let succeeded = oneshot
                    .iter()
                    .filter(|r| matches!(*r.completion.lock(), Some(RoleOutcome::Ok)))
                    .count();
                let finished = oneshot.iter().filter(|r| r.completion.lock().is_some()).count();
                succeeded >= need || finished == oneshot.len()
            });
        }
    }
}

/// Busy-waits (yielding cooperatively inside a fiber, sleeping on a bare OS
/// thread) until `condition` holds.
fn block_until(mut condition: impl FnMut() -> bool) {
    loop {
        if condition() {
            return;
        }
        if context::current_fiber().is_some() {
            time::yield_now();
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_runtime::SchedulerConfig;

    fn role(name: &str, succeed: bool) -> RoleSpec {
        role_sleep(name, succeed, 0)
    }

    fn role_sleep(name: &str, succeed: bool, sleep_ms: u64) -> RoleSpec {
        RoleSpec {
            role_id: name.to_string(),
            instance_slot_id: 0,
            parallel_fn: Some(Arc::new(move |_ctx: &PartyContext| {
                if sleep_ms > 0 {
                    std::thread::sleep(Duration::from_millis(sleep_ms));
                }
                if succeed {
                    Ok(())
                } else {
                    Err("role failed".to_string())
                }
            })),
            scheduler_tag: 0,
            priority: 0,
            interval_ms: 0,
            is_continuous: false,
        }
    }

    #[test]
    fn fiber_map_drops_roles_without_a_function() {
        let mut with_fn = role("a", true);
        let without_fn = RoleSpec {
            parallel_fn: None,
            ..role("b", true)
        };
        with_fn.instance_slot_id = 1;
        let map = generate_fiber_map("party", vec![with_fn, without_fn], false);
        assert_eq!(map.entries.len(), 1);
        assert_eq!(map.entries[0].role_id, "a");
    }

    #[test]
    fn cacheable_fiber_map_is_memoized_by_key() {
        let a = generate_fiber_map("cached-party", vec![role("x", true)], true);
        let b = generate_fiber_map("cached-party", vec![role("x", true)], true);
        assert_eq!(a.cache_key, b.cache_key);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn dispatch_majority_scenario() {
        let scheduler = Scheduler::new(SchedulerConfig {
            num_workers: 4,
            ..SchedulerConfig::default()
        });
        scheduler.start();
        let registry = SchedulerRegistry::new(Arc::clone(&scheduler));
        let stats = FiberStatsTable::new();
        let manager = Arc::new(sea_slot::SlotManager::new(8));
        let context = Arc::new(PartyContext::new(manager));

        let bindings = vec![
            role("r1", true),
            role("r2", true),
            role("r3", true),
            role("r4", false),
            role("r5", false),
        ];
        let map = generate_fiber_map("majority-party", bindings, false);

        let result = dispatch_parallel(&map, context, JoinStrategy::Majority, &registry, &stats);
        scheduler.stop();

        assert!(result.all_succeeded);
        assert_eq!(result.results.len(), 5);
        assert_eq!(result.results.iter().filter(|r| r.success).count(), 3);
        assert!(stats.get("r1").is_some());
    }

    #[test]
    fn dispatch_any_returns_early_and_leaves_straggler_unjoined() {
        let scheduler = Scheduler::new(SchedulerConfig {
            num_workers: 4,
            ..SchedulerConfig::default()
        });
        scheduler.start();
        let registry = SchedulerRegistry::new(Arc::clone(&scheduler));
        let stats = FiberStatsTable::new();
        let manager = Arc::new(sea_slot::SlotManager::new(8));
        let context = Arc::new(PartyContext::new(manager));

        let bindings = vec![role("fast", true), role_sleep("slow", true, 500)];
        let map = generate_fiber_map("any-party", bindings, false);

        let result = dispatch_parallel(&map, context, JoinStrategy::Any, &registry, &stats);
        scheduler.stop();

        assert!(result.all_succeeded);
        assert!(
            result.total_time_ns < 300_000_000,
            "Any should return once the fast role finishes, not wait for the slow one"
        );
        let fast = result.results.iter().find(|r| r.role_id == "fast").unwrap();
        assert!(fast.success);
        let slow = result.results.iter().find(|r| r.role_id == "slow").unwrap();
        assert!(!slow.success);
        assert!(slow.error.as_deref().unwrap().contains("left running"));
    }

    #[test]
    fn dispatch_race_ignores_failures_and_leaves_straggler_unjoined() {
        let scheduler = Scheduler::new(SchedulerConfig {
            num_workers: 4,
            ..SchedulerConfig::default()
        });
        scheduler.start();
        let registry = SchedulerRegistry::new(Arc::clone(&scheduler));
        let stats = FiberStatsTable::new();
        let manager = Arc::new(sea_slot::SlotManager::new(8));
        let context = Arc::new(PartyContext::new(manager));

        let bindings = vec![
            role("fails-fast", false),
            role_sleep("wins", true, 50),
            role_sleep("slow", true, 500),
        ];
        let map = generate_fiber_map("race-party", bindings, false);

        let result = dispatch_parallel(&map, context, JoinStrategy::Race, &registry, &stats);
        scheduler.stop();

        assert!(result.all_succeeded);
        assert!(
            result.total_time_ns < 300_000_000,
            "Race should return once the winner succeeds, not wait for the slow one"
        );
        let fails_fast = result.results.iter().find(|r| r.role_id == "fails-fast").unwrap();
        assert!(!fails_fast.success);
        assert_eq!(fails_fast.error.as_deref(), Some("role failed"));
        let wins = result.results.iter().find(|r| r.role_id == "wins").unwrap();
        assert!(wins.success);
        let slow = result.results.iter().find(|r| r.role_id == "slow").unwrap();
        assert!(!slow.success);
        assert!(slow.error.as_deref().unwrap().contains("left running"));
    }

    #[test]
    fn stats_table_tracks_min_max_avg() {
        let stats = FiberStatsTable::new();
        stats.record("role", 100, false);
        stats.record("role", 300, true);
        let snapshot = stats.get("role").unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.min_ns, 100);
        assert_eq!(snapshot.max_ns, 300);
        assert_eq!(snapshot.avg_ns, 200);
        assert_eq!(snapshot.errors, 1);
    }
}
