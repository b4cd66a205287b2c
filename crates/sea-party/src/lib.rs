//! Party/Systemic role-execution layer: `PartyContext` role lookups, the
//! `FiberMap` dispatcher, and the thin World/Systemic frame loop built on
//! top of `sea-runtime`'s scheduler and `sea-slot`'s handles.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod world;

pub use context::PartyContext;
pub use dispatch::{
    dispatch_parallel, generate_fiber_map, DispatchResult, FiberMap, FiberMapEntry, FiberStatsSnapshot,
    FiberStatsTable, JoinStrategy, RoleFn, RoleResult, RoleSpec, SchedulerRegistry,
};
pub use error::{ErrorCode, PartyError, PartyResult};
pub use world::{get_world_statistics, FrameResult, PartyInstance, Systemic, SystemicResult, World, WorldStatistics};
