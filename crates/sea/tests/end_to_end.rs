use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sea::party::{
    dispatch_parallel, generate_fiber_map, FiberStatsTable, JoinStrategy, PartyContext, RoleSpec,
    SchedulerRegistry,
};
use sea::runtime::{
    select, sleep, AsyncScope, Channel, Scheduler, SchedulerConfig, SelectCase, SelectOutcome,
};
use sea::slot::{SlotManager, INT};

fn init_tracing() {
    use tracing_subscriber::util::SubscriberInitExt;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .set_default();
}

fn run_on_scheduler<F>(scheduler: &Arc<Scheduler>, body: F)
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    scheduler.spawn(0, move || {
        body();
        tx.send(()).unwrap();
    });
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn pipeline_producer_consumer_sums_to_5050() {
    init_tracing();
    let scheduler = Scheduler::new(SchedulerConfig::deterministic(2));
    scheduler.start();

    let total = Arc::new(AtomicU64::new(0));
    let channel: Arc<Channel<i64>> = Channel::new(4);

    run_on_scheduler(&scheduler, {
        let channel = Arc::clone(&channel);
        let scope_scheduler = Arc::clone(&scheduler);
        let total = Arc::clone(&total);
        move || {
            let scope = AsyncScope::create(None, &scope_scheduler);

            let producer_channel = Arc::clone(&channel);
            scope.spawn(0, move || {
                for i in 1..=100i64 {
                    producer_channel.send(i).unwrap();
                }
                producer_channel.close();
            });

            let consumer_channel = Arc::clone(&channel);
            scope.spawn(0, move || loop {
                match consumer_channel.recv() {
                    Ok(v) => {
                        total.fetch_add(v as u64, Ordering::Relaxed);
                    }
                    Err(_) => break,
                }
            });

            scope.wait_all();
        }
    });

    scheduler.stop();
    assert_eq!(total.load(Ordering::Relaxed), 5050);
}

#[test]
fn scope_cancellation_completes_within_200ms() {
    init_tracing();
    let scheduler = Scheduler::new(SchedulerConfig::deterministic(2));
    scheduler.start();

    let elapsed_ms = Arc::new(AtomicU64::new(u64::MAX));

    run_on_scheduler(&scheduler, {
        let scope_scheduler = Arc::clone(&scheduler);
        let elapsed_ms = Arc::clone(&elapsed_ms);
        move || {
            let scope = AsyncScope::create(None, &scope_scheduler);
            scope.spawn(0, || sleep(Duration::from_secs(60)));

            let start = Instant::now();
            scope.cancel();
            scope.wait_all();
            elapsed_ms.store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
        }
    });

    scheduler.stop();
    assert!(elapsed_ms.load(Ordering::Relaxed) < 200);
}

#[test]
fn race_returns_first_winner_and_cancels_losers() {
    init_tracing();
    let scheduler = Scheduler::new(SchedulerConfig::deterministic(4));
    scheduler.start();

    let winner_idx = Arc::new(AtomicU64::new(u64::MAX));
    let total_ms = Arc::new(AtomicU64::new(u64::MAX));

    run_on_scheduler(&scheduler, {
        let scope_scheduler = Arc::clone(&scheduler);
        let winner_idx = Arc::clone(&winner_idx);
        let total_ms = Arc::clone(&total_ms);
        move || {
            let scope = AsyncScope::create(None, &scope_scheduler);
            let start = Instant::now();

            let tasks: Vec<Box<dyn FnOnce() + Send>> = vec![
                Box::new(|| {}),
                Box::new(|| sleep(Duration::from_secs(60))),
                Box::new(|| sleep(Duration::from_secs(60))),
            ];
            let winner = scope.race(0, tasks.into_iter().map(|t| move || t()).collect());

            winner_idx.store(winner as u64, Ordering::Relaxed);
            total_ms.store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
        }
    });

    scheduler.stop();
    assert_eq!(winner_idx.load(Ordering::Relaxed), 0);
    assert!(total_ms.load(Ordering::Relaxed) < 200);
}

#[test]
fn dispatch_majority_strategy_succeeds_with_three_of_five() {
    init_tracing();
    let scheduler = Scheduler::new(SchedulerConfig::deterministic(4));
    scheduler.start();
    let registry = SchedulerRegistry::new(Arc::clone(&scheduler));

    let manager = Arc::new(SlotManager::new(4));
    let context = Arc::new(PartyContext::new(manager));

    let role = |name: &str, succeed: bool| RoleSpec {
        role_id: name.to_string(),
        instance_slot_id: 0,
        parallel_fn: Some(Arc::new(move |_ctx: &PartyContext| {
            if succeed {
                Ok(())
            } else {
                Err("role failed".to_string())
            }
        })),
        scheduler_tag: 0,
        priority: 0,
        interval_ms: 0,
        is_continuous: false,
    };

    let bindings = vec![
        role("a", true),
        role("b", true),
        role("c", true),
        role("d", false),
        role("e", false),
    ];
    let map = generate_fiber_map("quest-party", bindings, false);
    let stats = FiberStatsTable::new();

    let result = dispatch_parallel(&map, context, JoinStrategy::Majority, &registry, &stats);

    scheduler.stop();
    assert_eq!(result.results.len(), 5);
    assert!(result.all_succeeded);
}

#[test]
fn slot_claim_write_read_release_reclaim_bumps_generation() {
    let manager = SlotManager::new(8);
    let handle = manager.claim(INT).unwrap();
    manager.write(handle, &42i64.to_ne_bytes(), None).unwrap();

    let mut buf = [0u8; 8];
    let n = manager.read(handle, &mut buf, None).unwrap();
    assert_eq!(n, 8);
    assert_eq!(i64::from_ne_bytes(buf), 42);

    manager.release(handle, None).unwrap();
    assert!(manager.read(handle, &mut buf, None).is_err());

    let reclaimed = manager.claim(INT).unwrap();
    assert_eq!(reclaimed.slot_id, handle.slot_id);
    assert!(reclaimed.generation > handle.generation);
}

#[test]
fn select_defaults_then_receives_after_send() {
    let channel: Arc<Channel<i64>> = Channel::new(1);

    let (idx, outcome) = select(vec![
        SelectCase::Recv(Arc::clone(&channel)),
        SelectCase::Default,
    ]);
    assert_eq!(idx, 1);
    assert!(matches!(outcome, Ok(SelectOutcome::Defaulted)));

    channel.try_send(99).unwrap();

    let (idx, outcome) = select(vec![
        SelectCase::Recv(Arc::clone(&channel)),
        SelectCase::Default,
    ]);
    assert_eq!(idx, 0);
    match outcome {
        Ok(SelectOutcome::Received(v)) => assert_eq!(v, 99),
        Ok(_) => panic!("expected a received value"),
        Err(_) => panic!("select returned an error"),
    }
}
