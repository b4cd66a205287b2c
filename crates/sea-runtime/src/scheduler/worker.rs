//! One worker thread's run loop, grounded on
//! `kernel/src/executor/scheduler/multi_thread/worker.rs::run`'s
//! pop-local/pop-global/steal/park sequence, adapted so the unit of work
//! is a `FiberId` rather than a task reference.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use sea_fiber::FiberState;
use tracing::trace;

use super::queue::LocalQueue;
use super::Scheduler;
use crate::context;

pub(crate) fn run(scheduler: Arc<Scheduler>, worker_id: usize, local: LocalQueue) {
    let _scheduler_guard = context::enter_scheduler(&scheduler);
    let mut rng = scheduler.rng_for(worker_id);
    let mut seq_local_polls: u32 = 0;
    let park_timeout = Duration::from_millis(scheduler.config.io_poll_timeout_ms);

    loop {
        if scheduler.is_shutdown() && local.is_empty() {
            break;
        }

        seq_local_polls += 1;
        let from_global_first = seq_local_polls >= scheduler.config.global_queue_interval;
        if from_global_first {
            seq_local_polls = 0;
        }

        let id = if from_global_first {
            scheduler.global_pop().or_else(|| local.pop())
        } else {
            local.pop().or_else(|| scheduler.global_pop())
        };

        let id = id.or_else(|| {
            if scheduler.config.enable_stealing {
                steal_one(&scheduler, worker_id, &local, &mut rng)
            } else {
                None
            }
        });

        let Some(id) = id else {
            scheduler.park(worker_id, park_timeout);
            continue;
        };

        let Some(fiber) = scheduler.lookup(id) else {
            // Retired between being popped and looked up (shouldn't
            // normally happen — queues only ever hold live fiber ids —
            // but is harmless to skip defensively).
            continue;
        };

        let _fiber_guard = context::enter_fiber(id);
        scheduler.stats_inner().record_switch();
        trace!(fiber = id.as_u64(), worker_id, "resuming fiber");
        fiber.resume();
        drop(_fiber_guard);

        match fiber.state() {
            FiberState::Ready => local.push(id),
            FiberState::Done | FiberState::Error => scheduler.retire(id),
            FiberState::Blocked => {
                // Left in the fiber table for the reactor or a peer
                // (channel, scope) to `unblock`.
            }
            other => unreachable!("fiber left resume() in state {other:?}"),
        }
    }
}

/// One steal attempt per empty cycle, tried against every other worker in
/// shuffled order starting from a (seeded, in deterministic mode) random
/// offset.
fn steal_one(
    scheduler: &Scheduler,
    worker_id: usize,
    local: &LocalQueue,
    rng: &mut rand_chacha::ChaCha8Rng,
) -> Option<sea_fiber::FiberId> {
    let stealers = scheduler.stealers_snapshot();
    if stealers.len() <= 1 {
        return None;
    }
    let mut order: Vec<usize> = (0..stealers.len()).filter(|&i| i != worker_id).collect();
    order.shuffle(rng);

    for victim in order {
        scheduler.stats_inner().record_steal_attempt();
        if let Some(id) = local.steal_from(&stealers[victim]) {
            scheduler.stats_inner().record_steal_success();
            return Some(id);
        }
    }
    None
}
