//! The thin World/Systemic layer: runs a fixed set of parties frame by
//! frame, grounded stylistically on the frame-loop shape the rest of this
//! workspace already uses for "run until a deadline, sleeping to hold
//! cadence" (`sea_runtime::time::sleep`'s "yield loop with a monotonic
//! clock check" — see DESIGN.md).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::PartyContext;
use crate::dispatch::{
    dispatch_parallel, DispatchResult, FiberMap, FiberStatsSnapshot, FiberStatsTable,
    JoinStrategy, SchedulerRegistry,
};

/// A party instance bound into a systemic: its generated dispatch plan,
/// its context, and the join strategy it dispatches with every frame.
pub struct PartyInstance {
    pub name: String,
    pub map: Arc<FiberMap>,
    pub context: Arc<PartyContext>,
    pub join_strategy: JoinStrategy,
}

/// An ordered list of party instances plus shared fields;
/// executing a systemic executes each of its parties and aggregates
/// results.
pub struct Systemic {
    pub name: String,
    pub parties: Vec<PartyInstance>,
}

impl Systemic {
    #[must_use]
    pub fn new(name: impl Into<String>, parties: Vec<PartyInstance>) -> Self {
        Systemic {
            name: name.into(),
            parties,
        }
    }

    fn execute(&self, registry: &SchedulerRegistry, stats: &FiberStatsTable) -> SystemicResult {
        let start = Instant::now();
        let party_results = self
            .parties
            .iter()
            .map(|party| {
                let result = dispatch_parallel(
                    &party.map,
                    Arc::clone(&party.context),
                    party.join_strategy,
                    registry,
                    stats,
                );
                (party.name.clone(), result)
            })
            .collect();
        SystemicResult {
            name: self.name.clone(),
            party_results,
            elapsed_ns: u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemicResult {
    pub name: String,
    pub party_results: Vec<(String, DispatchResult)>,
    pub elapsed_ns: u64,
}

#[derive(Debug, Clone)]
pub struct FrameResult {
    pub frame: u64,
    pub systemic_results: Vec<SystemicResult>,
    pub frame_time_ns: u64,
}

/// An ordered list of systemics plus a frame counter and start time.
/// `run_for`/`run_until` are convenience drivers around a per-frame loop
/// that executes each systemic in order, optionally sleeping to hold a
/// target frame period.
pub struct World {
    systemics: Vec<Systemic>,
    registry: SchedulerRegistry,
    stats: FiberStatsTable,
    frame: u64,
    start: Instant,
    target_frame_ns: Option<u64>,
}

impl World {
    #[must_use]
    pub fn new(systemics: Vec<Systemic>, registry: SchedulerRegistry) -> Self {
        World {
            systemics,
            registry,
            stats: FiberStatsTable::new(),
            frame: 0,
            start: Instant::now(),
            target_frame_ns: None,
        }
    }

    /// Sets a target nanosecond period: `run_for`/`run_until` will sleep at
    /// the end of each frame to hold this cadence.
    #[must_use]
    pub fn with_target_frame_ns(mut self, target_frame_ns: u64) -> Self {
        self.target_frame_ns = Some(target_frame_ns);
        self
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[must_use]
    pub fn stats(&self) -> &FiberStatsTable {
        &self.stats
    }

    fn run_one_frame(&mut self) -> FrameResult {
        let frame_start = Instant::now();
        let systemic_results = self
            .systemics
            .iter()
            .map(|systemic| systemic.execute(&self.registry, &self.stats))
            .collect();
        self.frame += 1;
        FrameResult {
            frame: self.frame,
            systemic_results,
            frame_time_ns: u64::try_from(frame_start.elapsed().as_nanos()).unwrap_or(u64::MAX),
        }
    }

    fn hold_cadence(&self, frame_start: Instant) {
        if let Some(target_ns) = self.target_frame_ns {
            let target = Duration::from_nanos(target_ns);
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                std::thread::sleep(target - elapsed);
            }
        }
    }

    /// Runs exactly `n_frames` frames, calling `on_frame_start(frame_no)`
    /// before each and `on_frame_end(&result)` after each.
    pub fn run_for<FStart, FEnd>(
        &mut self,
        n_frames: u64,
        mut on_frame_start: FStart,
        mut on_frame_end: FEnd,
    ) where
    FStart: FnMut(u64),
    FEnd: FnMut(&FrameResult),
    {
        for _ in 0..n_frames {
            let frame_start = Instant::now();
            on_frame_start(self.frame + 1);
            let result = self.run_one_frame();
            on_frame_end(&result);
            self.hold_cadence(frame_start);
        }
    }

    /// Runs frames until `Instant::now() >= deadline`, with the same
    /// per-frame callbacks as [`Self::run_for`].
    pub fn run_until<FStart, FEnd>(
        &mut self,
        deadline: Instant,
        mut on_frame_start: FStart,
        mut on_frame_end: FEnd,
    ) where
    FStart: FnMut(u64),
    FEnd: FnMut(&FrameResult),
    {
        while Instant::now() < deadline {
            let frame_start = Instant::now();
            on_frame_start(self.frame + 1);
            let result = self.run_one_frame();
            on_frame_end(&result);
            self.hold_cadence(frame_start);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorldStatistics {
    pub frame_count: u64,
    pub elapsed_ns: u64,
    pub role_stats: Vec<(String, FiberStatsSnapshot)>,
}

/// Aggregates a world's per-role `FiberStats` across every systemic/party
/// dispatched so far ( `get_world_statistics(world)`).
#[must_use]
pub fn get_world_statistics(world: &World, role_ids: &[&str]) -> WorldStatistics {
    let role_stats = role_ids
        .iter()
        .filter_map(|role_id| world.stats().get(role_id).map(|snap| ((*role_id).to_string(), snap)))
        .collect();
    WorldStatistics {
        frame_count: world.frame_count(),
        elapsed_ns: u64::try_from(world.elapsed().as_nanos()).unwrap_or(u64::MAX),
        role_stats,
    }
}
