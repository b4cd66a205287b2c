//! The I/O reactor: owns an OS readiness interface and turns ready events
//! into `unblock` calls. `register(fd, events, fiber)`
//! attaches a fiber to a descriptor; the reactor thread loops with a
//! bounded timeout (`SchedulerConfig::io_poll_timeout_ms`) polling for
//! readiness.
//!
//! Built on `polling::Poller` rather than hand-rolled `libc::epoll_wait`/
//! kqueue/IOCP bindings per platform — the same unsafety-budget tradeoff
//! `sea-runtime`'s run queue makes by reaching for `crossbeam_deque`
//! (DESIGN.md).

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use polling::{Event, Events, Poller};
use sea_fiber::FiberId;

use crate::scheduler::stats::SchedulerStats;

/// A registration token returned by [`Reactor::register`], needed to
/// [`Reactor::deregister`] before the fd is closed or reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoToken(usize);

pub struct Reactor {
    poller: Poller,
    registered: Mutex<HashMap<usize, FiberId>>,
    next_key: AtomicUsize,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Reactor {
            poller: Poller::new()?,
            registered: Mutex::new(HashMap::new()),
            next_key: AtomicUsize::new(0),
        })
    }

    /// Registers `fd` for readiness (`register_io_event(fd, events,
    /// fiber)`); `fiber` is unblocked the next time the reactor observes it
    /// ready.
    ///
    /// # Safety
    /// `fd` must stay open and valid until [`Reactor::deregister`] is
    /// called for the returned token.
    pub unsafe fn register(
        &self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        fiber: FiberId,
    ) -> io::Result<IoToken> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.registered.lock().insert(key, fiber);
        let event = Event {
            key,
            readable,
            writable,
        };
        // Safety: forwarded to the caller's contract above.
        unsafe { self.poller.add(fd, event) }?;
        Ok(IoToken(key))
    }

    pub fn deregister(&self, fd: RawFd, token: IoToken) -> io::Result<()> {
        self.registered.lock().remove(&token.0);
        self.poller.delete(fd)
    }

    /// Polls once, blocking for at most `timeout`, and unblocks every
    /// fiber whose registered descriptor became ready.
    pub fn poll_once(
        &self,
        timeout: Duration,
        stats: &SchedulerStats,
        mut unblock: impl FnMut(FiberId),
    ) -> io::Result<()> {
        let mut events = Events::new();
        self.poller.wait(&mut events, Some(timeout))?;
        let mut registered = self.registered.lock();
        for ev in events.iter() {
            if let Some(fiber) = registered.remove(&ev.key) {
                stats.record_io_event();
                unblock(fiber);
            }
        }
        Ok(())
    }
}
