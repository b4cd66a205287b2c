//! `sea`: the slot, fiber, runtime, and party crates wired together as one
//! runtime core.
//!
//! Each layer keeps its own crate so it can be depended on in isolation
//! (a pure slot allocator with no scheduler, say); this crate is the
//! assembled whole, the way a `kernel` binary is what actually links a
//! `fiber` crate and an async-executor crate together rather than a layer
//! of its own.

pub mod fiber {
    pub use sea_fiber::{sea_fiber_switch, Effect, Fiber, FiberId, FiberState, Yielder};
    pub use sea_fiber::stack::{FiberStack, MIN_STACK_SIZE};
}

pub mod slot {
    pub use sea_slot::{
        fnv1a32, BlockPool, BlockRef, ErrorCode, Handle, PoolIndex, SlotError, SlotManager,
        SlotPool, SlotResult, TypeInfo, TypeRegistry, TypeTag, BOOL, BYTES, DEFAULT_BLOCK_SIZE,
        FLOAT, INT, NULL_INDEX, USER_TAG_BASE,
    };
    pub use sea_slot::security;
}

pub mod runtime {
    pub use sea_runtime::{
        current_fiber, current_scheduler, select, sleep, AsyncScope, Channel, ErrorCode, IoToken,
        RuntimeError, RuntimeResult, Scheduler, SchedulerConfig, SelectCase, SelectOutcome,
        StatsSnapshot,
    };
}

pub mod party {
    pub use sea_party::{
        dispatch_parallel, generate_fiber_map, get_world_statistics, DispatchResult, ErrorCode,
        FiberMap, FiberMapEntry, FiberStatsSnapshot, FiberStatsTable, FrameResult, JoinStrategy,
        PartyContext, PartyError, PartyInstance, PartyResult, RoleFn, RoleResult, RoleSpec,
        SchedulerRegistry, Systemic, SystemicResult, World, WorldStatistics,
    };
}

pub use fiber::{Fiber, FiberId, FiberState};
pub use party::{DispatchResult, FiberMap, JoinStrategy, PartyContext, Systemic, World};
pub use runtime::{AsyncScope, Channel, Scheduler, SchedulerConfig};
pub use slot::{Handle, SlotManager};
