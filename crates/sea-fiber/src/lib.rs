//! Stackful user-space fibers multiplexed onto worker threads by the
//! scheduler in `sea-runtime`.
//!
//! A [`Fiber`] owns a private stack, a saved register context, and
//! parent/child links. [`sea_fiber_switch`] is the
//! single context-switch primitive: yielding and blocking both funnel
//! through [`Yielder::suspend`]/[`Yielder::block`], which call it.
//!
//! Grounded on `libs/fiber` (DESIGN.md); generalized from its
//! generator-style `resume(Input) -> FiberResult<Yield, Return>` API to an
//! explicit `{NEW,READY,RUNNING,SUSPENDED,BLOCKED,DONE,ERROR}` state
//! machine, since fibers here are driven by an external scheduler rather
//! than resumed directly by their creator.

mod arch;
pub mod stack;

use std::any::Any;
use std::cell::UnsafeCell;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use tracing::{trace, warn};

use stack::FiberStack;

pub use arch::sea_fiber_switch;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Dense, process-unique fiber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// fiber state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    New = 0,
    Ready = 1,
    Running = 2,
    Suspended = 3,
    Blocked = 4,
    Done = 5,
    Error = 6,
}

impl FiberState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FiberState::New,
            1 => FiberState::Ready,
            2 => FiberState::Running,
            3 => FiberState::Suspended,
            4 => FiberState::Blocked,
            5 => FiberState::Done,
            _ => FiberState::Error,
        }
    }
}

/// A reified description of a suspending operation, recorded on the fiber purely for introspection/stats —
/// the scheduler and reactor in `sea-runtime` own the actual wakeup
/// wiring for each kind.
#[derive(Debug, Clone)]
pub enum Effect {
    Io { fd: i32 },
    Timer,
    Channel,
    Spawn,
    Join,
    Slot,
}

struct EntryData {
    fiber: *const Fiber,
    body: Option<Box<dyn FnOnce(&Yielder) + Send + 'static>>,
}

/// A stackful coroutine: its own stack, saved register context, state, and
/// parent/child links.
pub struct Fiber {
    id: FiberId,
    state: AtomicU8,
    stack: FiberStack,
    saved_rsp: UnsafeCell<usize>,
    resumer_rsp_ptr: UnsafeCell<*mut usize>,
    /// Raw, as-yet-unowned pointer to the boxed entry data living on the
    /// heap; ownership transfers to `sea_fiber_entry_trampoline` the first
    /// (and only) time this fiber is resumed. `started` guards against
    /// touching it afterwards, once that ownership transfer has happened.
    entry_ptr: *mut EntryData,
    started: AtomicBool,
    priority: u8,
    scheduler_tag: AtomicU32,
    parent: Option<FiberId>,
    children: Mutex<Vec<FiberId>>,
    is_cancelled: AtomicBool,
    pending_effect: Mutex<Option<Effect>>,
    error: Mutex<Option<(i32, String)>>,
}

// Safety: a `Fiber`'s stack and saved context are only ever touched by the
// one worker thread currently resuming it (enforced by the scheduler in
// `sea-runtime`, which never resumes the same fiber concurrently); the
// other fields use their own synchronization.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Drop for Fiber {
    fn drop(&mut self) {
        // If this fiber was never resumed, `entry_ptr`'s allocation was
        // never reclaimed by `sea_fiber_entry_trampoline`; reclaim it here
        // instead. Once started, the trampoline owns it exclusively.
        if !self.started.load(Ordering::Acquire) && !self.entry_ptr.is_null() {
            unsafe {
                drop(Box::from_raw(self.entry_ptr));
            }
        }
    }
}

impl Fiber {
    /// Creates a new fiber in [`FiberState::New`] with a private stack of
    /// `stack_size` bytes (rounded up to at least
    /// [`stack::MIN_STACK_SIZE`]), ready to be pushed to [`FiberState::Ready`]
    /// and resumed by a scheduler.
    pub fn new<F>(stack_size: usize, priority: u8, parent: Option<FiberId>, body: F) -> Self
    where
        F: FnOnce(&Yielder) + Send + 'static,
    {
        let stack = FiberStack::new(stack_size).expect("failed to allocate fiber stack");
        let mut fiber = Fiber {
            id: FiberId::next(),
            state: AtomicU8::new(FiberState::New as u8),
            stack,
            saved_rsp: UnsafeCell::new(0),
            resumer_rsp_ptr: UnsafeCell::new(std::ptr::null_mut()),
            entry_ptr: std::ptr::null_mut(),
            started: AtomicBool::new(false),
            priority,
            scheduler_tag: AtomicU32::new(0),
            parent,
            children: Mutex::new(Vec::new()),
            is_cancelled: AtomicBool::new(false),
            pending_effect: Mutex::new(None),
            error: Mutex::new(None),
        };

        let entry_data = Box::new(EntryData {
            fiber: std::ptr::null(),
            body: Some(Box::new(body)),
        });
        let entry_ptr = Box::into_raw(entry_data);
        fiber.entry_ptr = entry_ptr;

        // Safety: `stack.top()` is a fresh, writable mapping from `FiberStack::new`.
        let rsp = unsafe { arch::init_stack(fiber.stack.top(), entry_ptr.cast::<u8>()) };
        unsafe {
            *fiber.saved_rsp.get() = rsp;
        }

        fiber.state.store(FiberState::Ready as u8, Ordering::Release);
        trace!(fiber = fiber.id.as_u64(), priority, "fiber created");
        fiber
    }

    #[must_use]
    pub fn id(&self) -> FiberId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub fn parent(&self) -> Option<FiberId> {
        self.parent
    }

    #[must_use]
    pub fn scheduler_tag(&self) -> u32 {
        self.scheduler_tag.load(Ordering::Relaxed)
    }

    pub fn set_scheduler_tag(&self, tag: u32) {
        self.scheduler_tag.store(tag, Ordering::Relaxed);
    }

    pub fn attach_child(&self, child: FiberId) {
        self.children.lock().unwrap().push(child);
    }

    pub fn detach_child(&self, child: FiberId) {
        self.children.lock().unwrap().retain(|&c| c != child);
    }

    #[must_use]
    pub fn children(&self) -> Vec<FiberId> {
        self.children.lock().unwrap().clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled.load(Ordering::Acquire)
    }

    /// Cooperative cancellation: sets a flag observed at the next
    /// suspension point. Does not itself force the
    /// fiber to stop; recursive cancellation of descendants is done by the
    /// owning `AsyncScope` in `sea-runtime`, which holds the fiber table.
    pub fn cancel(&self) {
        self.is_cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn pending_effect(&self) -> Option<Effect> {
        self.pending_effect.lock().unwrap().clone()
    }

    /// Transitions a `BLOCKED` fiber back to `READY`, clearing the
    /// recorded effect. Called by the scheduler's reactor or by a peer
    /// (e.g. the other end of a channel) once the effect it was blocked on
    /// has completed.
    pub fn mark_ready(&self) {
        *self.pending_effect.lock().unwrap() = None;
        self.state.store(FiberState::Ready as u8, Ordering::Release);
    }

    #[must_use]
    pub fn error(&self) -> Option<(i32, String)> {
        self.error.lock().unwrap().clone()
    }

    /// Resumes a `READY` fiber, switching the calling OS thread's stack
    /// onto the fiber's stack until it yields, blocks, or finishes. Must
    /// only ever be called by the one worker thread currently scheduling
    /// this fiber.
    pub fn resume(&self) {
        debug_assert!(matches!(
            self.state(),
            FiberState::Ready | FiberState::New
        ));
        self.state.store(FiberState::Running as u8, Ordering::Release);

        // Wire up `fiber` in the entry data on the very first resume; the
        // pointer's ownership transfers into `sea_fiber_entry_trampoline`
        // via the fabricated stack frame, so this must only touch it once.
        if !self.started.swap(true, Ordering::AcqRel) {
            unsafe {
                (*self.entry_ptr).fiber = self as *const Fiber;
            }
        }

        let mut caller_rsp: usize = 0;
        unsafe {
            *self.resumer_rsp_ptr.get() = &mut caller_rsp as *mut usize;
            let to = *self.saved_rsp.get();
            sea_fiber_switch(&mut caller_rsp, to);
        }
        // Control returns here once the fiber suspends, blocks, or
        // finishes; it has already updated `self.state` before switching
        // away (see `Yielder` and `finish`).
    }

    fn finish(&self, error: Option<(i32, String)>) -> ! {
        if let Some(err) = error {
            *self.error.lock().unwrap() = Some(err);
            self.state.store(FiberState::Error as u8, Ordering::Release);
        } else {
            self.state.store(FiberState::Done as u8, Ordering::Release);
        }
        // One-way switch back to whoever last resumed us. This stack is
        // never resumed again; the scheduler destroys the fiber once it
        // observes `Done`/`Error`.
        let mut discard: usize = 0;
        unsafe {
            let resumer_ptr = *self.resumer_rsp_ptr.get();
            sea_fiber_switch(&mut discard, *resumer_ptr);
        }
        unreachable!("finished fiber was resumed again")
    }
}

/// A handle passed to a fiber's body giving it the ability to suspend
/// itself back to its resumer. Only valid for the lifetime of one
/// `resume()` call.
pub struct Yielder<'a> {
    fiber: &'a Fiber,
}

impl<'a> Yielder<'a> {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.fiber.is_cancelled()
    }

    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.fiber.id
    }

    /// Cooperatively yields control back to the resumer, marking this
    /// fiber `READY` to be resumed again later.
    pub fn suspend(&self) {
        self.fiber.state.store(FiberState::Ready as u8, Ordering::Release);
        self.switch_out();
    }

    /// Suspends with an explicit [`Effect`] recorded, marking this fiber
    /// `BLOCKED` until a peer or the reactor calls `unblock`.
    pub fn block(&self, effect: Effect) {
        *self.fiber.pending_effect.lock().unwrap() = Some(effect);
        self.fiber.state.store(FiberState::Blocked as u8, Ordering::Release);
        self.switch_out();
    }

    fn switch_out(&self) {
        unsafe {
            let resumer_ptr = *self.fiber.resumer_rsp_ptr.get();
            sea_fiber_switch(self.fiber.saved_rsp.get(), *resumer_ptr);
        }
        // When we come back here, `resume()` has already set our state to
        // `Running` again.
    }
}

/// Called from the assembly trampoline on a fiber's very first resume;
/// runs the fiber's body to completion (or panic) and hands control back.
#[no_mangle]
extern "C" fn sea_fiber_entry_trampoline(data: *mut u8) -> ! {
    // Safety: `data` is the `Box<EntryData>` pointer `Fiber::new` leaked
    // via `Box::into_raw`, passed back to us once through the fabricated
    // initial stack frame.
    let entry = unsafe { Box::from_raw(data.cast::<EntryData>()) };
    let fiber = unsafe { &*entry.fiber };
    let yielder = Yielder { fiber };
    let body = entry.body.expect("fiber entry data missing body");

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| body(&yielder)));

    let error = match result {
        Ok(()) => None,
        Err(payload) => {
            let message = panic_message(&payload);
            warn!(fiber = fiber.id().as_u64(), %message, "fiber panicked");
            Some((1, message))
        }
    };
    fiber.finish(error)
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "fiber panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn fiber_runs_to_completion() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let fiber = Fiber::new(stack::DEFAULT_STACK_SIZE, 0, None, move |_y| {
            ran2.store(1, Ordering::SeqCst);
        });
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Done);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fiber_yields_and_resumes() {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let steps2 = steps.clone();
        let fiber = Fiber::new(stack::DEFAULT_STACK_SIZE, 0, None, move |y| {
            steps2.lock().unwrap().push(1);
            y.suspend();
            steps2.lock().unwrap().push(2);
        });
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Ready);
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Done);
        assert_eq!(*steps.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn panicking_fiber_reports_error_state() {
        let fiber = Fiber::new(stack::DEFAULT_STACK_SIZE, 0, None, |_y| {
            panic!("boom");
        });
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Error);
        assert!(fiber.error().unwrap().1.contains("boom"));
    }

    #[test]
    fn cancellation_is_observed_cooperatively() {
        let fiber = Fiber::new(stack::DEFAULT_STACK_SIZE, 0, None, |y| loop {
            if y.is_cancelled() {
                return;
            }
            y.suspend();
        });
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Ready);
        fiber.cancel();
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Done);
    }
}
