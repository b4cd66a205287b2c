//! A CSP-style bounded (or zero-capacity rendezvous) channel with
//! blocked sender/receiver queues and `select`.
//!
//! Grounded on `libs/async-exec/src/sync/oneshot.rs` and
//! `sync/wait_cell.rs`'s single-slot-under-a-lock rendezvous idiom,
//! generalized from one slot to an N-capacity buffer and from one waiter
//! to an N-way `select` (DESIGN.md). One `parking_lot::Mutex` guards the
//! whole channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sea_fiber::{Effect, FiberId};

use crate::context;
use crate::error::{RuntimeError, RuntimeResult};

struct SenderWaiter<T> {
    fiber: FiberId,
    cell: Arc<Mutex<Option<T>>>,
}

struct ReceiverWaiter<T> {
    fiber: FiberId,
    cell: Arc<Mutex<Option<T>>>,
}

struct ChannelState<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    closed: bool,
    waiting_senders: VecDeque<SenderWaiter<T>>,
    waiting_receivers: VecDeque<ReceiverWaiter<T>>,
}

/// A bounded multi-producer multi-consumer channel; `capacity == 0` is a
/// zero-capacity rendezvous channel.
pub struct Channel<T> {
    state: Mutex<ChannelState<T>>,
}

fn unblock(fiber: FiberId) {
    context::current_scheduler(|scheduler| scheduler.unblock(fiber));
}

impl<T: Send + 'static> Channel<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Channel {
            state: Mutex::new(ChannelState {
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
                waiting_senders: VecDeque::new(),
                waiting_receivers: VecDeque::new(),
            }),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Closes the channel, waking every fiber waiting to send or receive
    /// so it observes `CLOSED`.
    pub fn close(&self) {
        let (senders, receivers) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.waiting_senders),
                std::mem::take(&mut state.waiting_receivers),
            )
        };
        for w in senders {
            unblock(w.fiber);
        }
        for w in receivers {
            unblock(w.fiber);
        }
    }

    /// Non-blocking send.
    pub fn try_send(&self, value: T) -> RuntimeResult<()> {
        self.try_send_or_give_back(value).map_err(|(err, _)| err)
    }

    /// Like [`Channel::try_send`], but hands `value` back on `FULL` so a
    /// blocking caller can retry it once queued as a waiter.
    fn try_send_or_give_back(&self, value: T) -> Result<(), (RuntimeError, T)> {
        let mut state = self.state.lock();
        if state.closed {
            return Err((RuntimeError::Closed, value));
        }
        if let Some(receiver) = state.waiting_receivers.pop_front() {
            *receiver.cell.lock() = Some(value);
            drop(state);
            unblock(receiver.fiber);
            return Ok(());
        }
        if state.buffer.len() < state.capacity {
            state.buffer.push_back(value);
            return Ok(());
        }
        Err((RuntimeError::Full, value))
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> RuntimeResult<T> {
        let mut state = self.state.lock();
        if let Some(sender) = state.waiting_senders.pop_front() {
            let value = sender
                .cell
                .lock()
                .take()
                .expect("sender waiter's cell already taken");
            // A buffered slot may have just freed up for this sender's
            // value; pulling it into the buffer keeps FIFO order intact
            // for any receiver that arrives before the sender is resumed.
            drop(state);
            unblock(sender.fiber);
            return Ok(value);
        }
        if let Some(value) = state.buffer.pop_front() {
            if let Some(sender) = state.waiting_senders.pop_front() {
                if let Some(v) = sender.cell.lock().take() {
                    state.buffer.push_back(v);
                }
                drop(state);
                unblock(sender.fiber);
            }
            return Ok(value);
        }
        if state.closed {
            return Err(RuntimeError::Closed);
        }
        Err(RuntimeError::Empty)
    }

    /// Blocking send. Blocks the calling fiber on
    /// the senders queue until a receiver takes the value or the channel
    /// closes.
    pub fn send(&self, value: T) -> RuntimeResult<()> {
        self.send_inner(value, None)
    }

    pub fn send_timeout(&self, value: T, timeout: Duration) -> RuntimeResult<()> {
        self.send_inner(value, Some(Instant::now() + timeout))
    }

    fn send_inner(&self, value: T, deadline: Option<Instant>) -> RuntimeResult<()> {
        let value = match self.try_send_or_give_back(value) {
            Ok(()) => return Ok(()),
            Err((RuntimeError::Full, value)) => value,
            Err((err, _)) => return Err(err),
        };

        let fiber = context::current_fiber().expect("channel send called outside a fiber");
        let cell = match self.register_sender(fiber, value) {
            Ok(cell) => cell,
            Err(_) => return Err(RuntimeError::Closed),
        };
        context::with_current_yielder(|yielder| loop {
            if cell.lock().is_none() {
                return Ok(());
            }
            if self.state.lock().closed {
                self.remove_sender(fiber);
                return Err(RuntimeError::Closed);
            }
            if yielder.is_cancelled() {
                self.remove_sender(fiber);
                return Err(RuntimeError::Cancelled);
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    self.remove_sender(fiber);
                    return Err(RuntimeError::Timeout);
                }
            }
            yielder.block(Effect::Channel);
        })
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Receives a value, blocking the calling fiber on the receivers queue
    /// until a sender provides one or the channel closes.
    pub fn recv(&self) -> RuntimeResult<T> {
        self.recv_inner(None)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> RuntimeResult<T> {
        self.recv_inner(Some(Instant::now() + timeout))
    }

    fn recv_inner(&self, deadline: Option<Instant>) -> RuntimeResult<T> {
        match self.try_recv() {
            Err(RuntimeError::Empty) => {}
            other => return other,
        }
        let fiber = context::current_fiber().expect("channel recv called outside a fiber");
        let Some(cell) = self.register_receiver(fiber) else {
            return Err(RuntimeError::Closed);
        };
        context::with_current_yielder(|yielder| loop {
            if let Some(value) = cell.lock().take() {
                return Ok(value);
            }
            if self.state.lock().closed {
                self.remove_receiver(fiber);
                return Err(RuntimeError::Closed);
            }
            if yielder.is_cancelled() {
                self.remove_receiver(fiber);
                return Err(RuntimeError::Cancelled);
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    self.remove_receiver(fiber);
                    return Err(RuntimeError::Timeout);
                }
            }
            yielder.block(Effect::Channel);
        })
    }

    /// Registers `fiber` as a waiting receiver, unless the channel is
    /// already closed (checked under the same lock acquisition to avoid
    /// racing a concurrent `close`).
    pub(crate) fn register_receiver(&self, fiber: FiberId) -> Option<Arc<Mutex<Option<T>>>> {
        let cell = Arc::new(Mutex::new(None));
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.waiting_receivers.push_back(ReceiverWaiter {
            fiber,
            cell: Arc::clone(&cell),
        });
        Some(cell)
    }

    pub(crate) fn remove_receiver(&self, fiber: FiberId) {
        self.state
            .lock()
            .waiting_receivers
            .retain(|w| w.fiber != fiber);
    }

    /// Registers `fiber` as a waiting sender with `value`, unless the
    /// channel is already closed; returns `value` back in that case.
    pub(crate) fn register_sender(
        &self,
        fiber: FiberId,
        value: T,
    ) -> Result<Arc<Mutex<Option<T>>>, T> {
        let cell = Arc::new(Mutex::new(Some(value)));
        let mut state = self.state.lock();
        if state.closed {
            return Err(cell
                    .lock()
                    .take()
                    .expect("freshly constructed sender cell always holds its value"));
        }
        state.waiting_senders.push_back(SenderWaiter {
            fiber,
            cell: Arc::clone(&cell),
        });
        Ok(cell)
    }

    pub(crate) fn remove_sender(&self, fiber: FiberId) {
        self.state.lock().waiting_senders.retain(|w| w.fiber != fiber);
    }
}

/// One arm of a [`select`] call.
pub enum SelectCase<T> {
    Recv(Arc<Channel<T>>),
    Send(Arc<Channel<T>>, Option<T>),
    Default,
}

/// What a completed [`select`] arm produced.
pub enum SelectOutcome<T> {
    Received(T),
    Sent,
    Defaulted,
}

/// Performs the one-atomic-cycle scan describes: (1) try
/// every case without blocking, in listed order; (2) fall back to
/// `Default` if present; (3) otherwise register on every channel's wait
/// queue, suspend, and unlink from the others once one of them wakes us.
pub fn select<T: Send + 'static>(mut cases: Vec<SelectCase<T>>) -> (usize, RuntimeResult<SelectOutcome<T>>) {
    loop {
        if let Some(result) = try_once(&mut cases) {
            return result;
        }

        let default_idx = cases
            .iter()
            .position(|c| matches!(c, SelectCase::Default));
        if let Some(idx) = default_idx {
            return (idx, Ok(SelectOutcome::Defaulted));
        }

        let fiber = context::current_fiber().expect("select called outside a fiber");
        let mut recv_cells: Vec<Option<Arc<Mutex<Option<T>>>>> = Vec::with_capacity(cases.len());
        let mut send_cells: Vec<Option<Arc<Mutex<Option<T>>>>> = Vec::with_capacity(cases.len());
        // Both vectors are kept one slot per case (even the inapplicable
        // variant gets a `None`) so `scan_woken` can use the case index
        // directly, matching
        for case in &mut cases {
            match case {
                SelectCase::Recv(ch) => {
                    recv_cells.push(ch.register_receiver(fiber));
                    send_cells.push(None);
                }
                SelectCase::Send(ch, value) => {
                    let v = value.take().expect("send case value already taken");
                    match ch.register_sender(fiber, v) {
                        Ok(cell) => send_cells.push(Some(cell)),
                        Err(v) => {
                            *value = Some(v);
                            send_cells.push(None);
                        }
                    }
                    recv_cells.push(None);
                }
                SelectCase::Default => {
                    recv_cells.push(None);
                    send_cells.push(None);
                }
            }
        }

        context::with_current_yielder(|yielder| yielder.block(Effect::Channel));

        for case in &cases {
            match case {
                SelectCase::Recv(ch) => ch.remove_receiver(fiber),
                SelectCase::Send(ch, _) => ch.remove_sender(fiber),
                SelectCase::Default => {}
            }
        }

        if let Some(result) = scan_woken(&recv_cells, &send_cells) {
            return result;
        }
        // Spurious wakeup (e.g. the channel closed without delivering to
        // us): loop back to the top-of-cycle scan.
    }
}

fn try_once<T: Send + 'static>(
    cases: &mut [SelectCase<T>],
) -> Option<(usize, RuntimeResult<SelectOutcome<T>>)> {
    for (idx, case) in cases.iter_mut().enumerate() {
        match case {
            SelectCase::Recv(ch) => match ch.try_recv() {
                Ok(v) => return Some((idx, Ok(SelectOutcome::Received(v)))),
                Err(RuntimeError::Empty) => {}
                Err(e) => return Some((idx, Err(e))),
            },
            SelectCase::Send(ch, value) => {
                let v = value.take().expect("send case value already taken");
                match ch.try_send_or_give_back(v) {
                    Ok(()) => return Some((idx, Ok(SelectOutcome::Sent))),
                    Err((RuntimeError::Full, v)) => *value = Some(v),
                    Err((e, _)) => return Some((idx, Err(e))),
                }
            }
            SelectCase::Default => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::Scheduler;
    use std::sync::mpsc;

    #[test]
    fn buffered_channel_is_fifo() {
        let ch: Arc<Channel<u32>> = Channel::new(4);
        for i in 0..4 {
            ch.try_send(i).unwrap();
        }
        assert_eq!(ch.try_send(4), Err(RuntimeError::Full));
        for i in 0..4 {
            assert_eq!(ch.try_recv(), Ok(i));
        }
        assert_eq!(ch.try_recv(), Err(RuntimeError::Empty));
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let scheduler = Scheduler::new(SchedulerConfig::deterministic(3));
        scheduler.start();
        let ch: Arc<Channel<u32>> = Channel::new(0);
        let ch2 = Arc::clone(&ch);
        let (tx, rx) = mpsc::channel();
        scheduler.spawn(0, move || {
            let result = ch2.recv();
            tx.send(result).unwrap();
        });
        std::thread::sleep(Duration::from_millis(20));
        ch.close();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, Err(RuntimeError::Closed));
        scheduler.stop();
    }

    #[test]
    fn rendezvous_channel_hands_off_directly() {
        let scheduler = Scheduler::new(SchedulerConfig::deterministic(4));
        scheduler.start();
        let ch: Arc<Channel<u32>> = Channel::new(0);
        let ch2 = Arc::clone(&ch);
        let (tx, rx) = mpsc::channel();
        scheduler.spawn(0, move || {
            let value = ch2.recv().unwrap();
            tx.send(value).unwrap();
        });
        // No buffer slot exists, so this send only completes once the
        // receiving fiber above has taken the value directly.
        ch.send(42).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        scheduler.stop();
    }
}

fn scan_woken<T: Send + 'static>(
    recv_cells: &[Option<Arc<Mutex<Option<T>>>>],
    send_cells: &[Option<Arc<Mutex<Option<T>>>>],
) -> Option<(usize, RuntimeResult<SelectOutcome<T>>)> {
    for (idx, cell) in recv_cells.iter().enumerate() {
        if let Some(cell) = cell {
            if let Some(v) = cell.lock().take() {
                return Some((idx, Ok(SelectOutcome::Received(v))));
            }
        }
    }
    for (idx, cell) in send_cells.iter().enumerate() {
        if let Some(cell) = cell {
            if cell.lock().is_none() {
                return Some((idx, Ok(SelectOutcome::Sent)));
            }
        }
    }
    None
}
