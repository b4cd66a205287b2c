//! Thread-local "current scheduler / current fiber / current yielder"
//! cells: set on worker-thread entry, cleared on exit, and the only
//! process-wide mutable state this layer keeps.

use std::cell::Cell;

use sea_fiber::{FiberId, Yielder};

use crate::Scheduler;

thread_local! {
    static CURRENT_SCHEDULER: Cell<Option<*const Scheduler>> = const { Cell::new(None) };
    static CURRENT_FIBER: Cell<Option<FiberId>> = const { Cell::new(None) };
    static CURRENT_YIELDER: Cell<*const ()> = const { Cell::new(std::ptr::null()) };
}

/// RAII guard installing `scheduler` as the thread's current scheduler
/// for its lifetime; used once per worker thread for its whole run loop.
pub(crate) struct SchedulerGuard;

pub(crate) fn enter_scheduler(scheduler: &Scheduler) -> SchedulerGuard {
    CURRENT_SCHEDULER.with(|c| c.set(Some(scheduler as *const Scheduler)));
    SchedulerGuard
}

impl Drop for SchedulerGuard {
    fn drop(&mut self) {
        CURRENT_SCHEDULER.with(|c| c.set(None));
    }
}

/// Returns the scheduler driving the calling worker thread, or `None` if
/// called off a worker thread. Borrowed only for the duration of the
/// closure; the pointer is never retained past it.
pub fn current_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> Option<R> {
    CURRENT_SCHEDULER.with(|c| c.get().map(|ptr| f(unsafe { &*ptr })))
}

pub(crate) struct FiberGuard(Option<FiberId>);

pub(crate) fn enter_fiber(id: FiberId) -> FiberGuard {
    let previous = CURRENT_FIBER.with(|c| c.replace(Some(id)));
    FiberGuard(previous)
}

impl Drop for FiberGuard {
    fn drop(&mut self) {
        CURRENT_FIBER.with(|c| c.set(self.0));
    }
}

#[must_use]
pub fn current_fiber() -> Option<FiberId> {
    CURRENT_FIBER.with(Cell::get)
}

/// RAII guard installing `yielder` as the current fiber's yielder for the
/// dynamic extent of its body closure.
///
/// # Safety contract
/// The guard must be dropped before `yielder` is invalidated, i.e. before
/// the `resume()` call that produced it returns into the worker. The
/// wrapped fiber body (`scheduler::worker::wrap_body`) upholds this by
/// constructing the guard as the first statement in the body and letting
/// it drop at the end of scope, which is always before the underlying
/// `Yielder` reference goes out of scope.
pub(crate) struct YielderGuard;

pub(crate) fn enter_yielder(yielder: &Yielder<'_>) -> YielderGuard {
    CURRENT_YIELDER.with(|c| c.set(std::ptr::from_ref(yielder).cast::<()>()));
    YielderGuard
}

impl Drop for YielderGuard {
    fn drop(&mut self) {
        CURRENT_YIELDER.with(|c| c.set(std::ptr::null()));
    }
}

/// Borrows the current fiber's yielder for the duration of `f`. Panics if
/// called off a fiber body (programmer error: every suspending operation
/// in `sea-runtime` must run inside a scheduled fiber).
pub(crate) fn with_current_yielder<R>(f: impl FnOnce(&Yielder<'_>) -> R) -> R {
    CURRENT_YIELDER.with(|c| {
        let ptr = c.get();
        assert!(
            !ptr.is_null(),
            "sea_runtime suspending operation called outside a fiber"
        );
        // Safety: non-null only while a `YielderGuard` for a live `Yielder`
        // is installed on this thread, per the guard's safety contract.
        let yielder = unsafe { &*ptr.cast::<Yielder<'_>>() };
        f(yielder)
    })
}
