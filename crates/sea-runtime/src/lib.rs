//! `sea-runtime`: a lock-free run queue, a work-stealing scheduler,
//! `AsyncScope` structured concurrency, and CSP channels. Built on `sea-fiber`'s
//! stackful coroutines; the scheduler drives them, `context` exposes the
//! "current scheduler / fiber / yielder" thread-local cells every suspending
//! operation needs, and `channel`/`scope`/`time` are the suspending
//! operations built on top of them.

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod reactor;
pub mod scheduler;
pub mod scope;
pub mod time;

pub use channel::{select, Channel, SelectCase, SelectOutcome};
pub use config::SchedulerConfig;
pub use context::{current_fiber, current_scheduler};
pub use error::{ErrorCode, RuntimeError, RuntimeResult};
pub use reactor::IoToken;
pub use scheduler::stats::StatsSnapshot;
pub use scheduler::Scheduler;
pub use scope::AsyncScope;
pub use time::sleep;

pub use sea_fiber::{Effect, FiberId, FiberState};
