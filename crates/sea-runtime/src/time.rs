//! `AsyncSleep`, built on a `FiberYield` loop with a monotonic clock check,
//! since the scheduler itself exposes no global timeout facility.

use std::time::{Duration, Instant};

use crate::context;

/// Cooperatively suspends the calling fiber until `duration` has
/// elapsed, yielding at every suspension point so the worker running it
/// can make progress on other fibers meanwhile.
pub fn sleep(duration: Duration) {
    let deadline = Instant::now() + duration;
    context::with_current_yielder(|yielder| {
        while Instant::now() < deadline && !yielder.is_cancelled() {
            yielder.suspend();
        }
    });
}

/// Yields once back to the scheduler; used by periodic dispatch loops that
/// sleep `interval_ms` or yield when it's zero.
pub fn yield_now() {
    context::with_current_yielder(|yielder| yielder.suspend());
}
