//! Per-worker parking, grounded on `kernel/src/executor/scheduler/
//! multi_thread/worker.rs`'s `util::condvar::Condvar` + `ParkingSpot`
//! pairing (one condvar per worker, guarded by a small mutex), adapted
//! from `no_std` to `std::sync` since this crate is hosted.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One worker's parking state: a `notified` flag guarded by a `Mutex`,
/// paired with a `Condvar`. Notifying before a worker parks is not lost —
/// `park` checks the flag before waiting.
pub struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    pub fn new() -> Self {
        Parker {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Parks the calling thread until `unpark` is called or `timeout`
    /// elapses, whichever comes first. Returns immediately if a
    /// notification is already pending.
    pub fn park_timeout(&self, timeout: Duration) {
        let mut notified = self.notified.lock().unwrap();
        if *notified {
            *notified = false;
            return;
        }
        let (guard, _) = self
            .condvar
            .wait_timeout(notified, timeout)
            .unwrap();
        notified = guard;
        *notified = false;
    }

    /// Wakes the parked worker, or arms a pending notification if it is
    /// not currently parked.
    pub fn unpark(&self) {
        let mut notified = self.notified.lock().unwrap();
        *notified = true;
        self.condvar.notify_one();
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unpark_before_park_is_not_lost() {
        let parker = Parker::new();
        parker.unpark();
        parker.park_timeout(Duration::from_millis(10));
        // Would have blocked for the full timeout if the notification had
        // been lost; this just checks the call returns promptly enough to
        // not be flaky under CI scheduling jitter.
    }

    #[test]
    fn unpark_wakes_a_parked_thread() {
        let parker = Arc::new(Parker::new());
        let parker2 = Arc::clone(&parker);
        let handle = thread::spawn(move || {
            parker2.park_timeout(Duration::from_secs(5));
        });
        thread::sleep(Duration::from_millis(20));
        parker.unpark();
        handle.join().unwrap();
    }
}
