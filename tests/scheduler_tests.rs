//! End-to-end coverage of job graph construction, continuations, shutdown,
//! load balance, and arena recycling across frames.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use task_forge::{JobHandle, Scheduler, SchedulerConfig, SchedulerError, MAX_CONTINUATIONS};

fn scheduler(worker_count: usize) -> Arc<Scheduler> {
    let _ = env_logger::try_init();
    Scheduler::new(SchedulerConfig {
        worker_count: Some(worker_count),
        ..Default::default()
    })
    .expect("scheduler construction with a valid config must not fail")
}

/// S1: a root with 4095 direct children, no grandchildren.
#[test]
fn root_with_many_children_completes_and_runs_each_once() {
    let scheduler = scheduler(4);
    const CHILD_COUNT: usize = 4095;

    let counters: Arc<Vec<AtomicI32>> = Arc::new((0..CHILD_COUNT).map(|_| AtomicI32::new(0)).collect());

    struct Payload {
        counters: Arc<Vec<AtomicI32>>,
        index: usize,
    }

    fn child_fn(_job: JobHandle, payload: *mut u8) {
        let payload = unsafe { Box::from_raw(payload as *mut Payload) };
        payload.counters[payload.index].fetch_add(1, Ordering::SeqCst);
    }

    let root = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());

    for i in 0..CHILD_COUNT {
        let payload = Box::new(Payload {
            counters: counters.clone(),
            index: i,
        });
        let child = scheduler.create_child_job(root, child_fn, Box::into_raw(payload) as *mut u8);
        scheduler.run(child);
    }

    scheduler.run(root);
    scheduler.wait(root);

    assert!(root.is_finished());
    for counter in counters.iter() {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    scheduler.shutdown();
}

/// S2: a continuation chain J1 -> J2 -> J3, each recording start/end order.
#[test]
fn continuation_chain_runs_in_order() {
    let scheduler = scheduler(4);

    let order: Arc<std::sync::Mutex<Vec<&'static str>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    struct Payload {
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        label: &'static str,
    }

    fn step(_job: JobHandle, payload: *mut u8) {
        let payload = unsafe { &*(payload as *const Payload) };
        payload.order.lock().unwrap().push(payload.label);
    }

    let p3 = Box::new(Payload {
        order: order.clone(),
        label: "j3",
    });
    let j3 = scheduler.create_job(step, Box::into_raw(p3) as *mut u8);

    let p2 = Box::new(Payload {
        order: order.clone(),
        label: "j2",
    });
    let j2 = scheduler.create_job(step, Box::into_raw(p2) as *mut u8);

    let p1 = Box::new(Payload {
        order: order.clone(),
        label: "j1",
    });
    let j1 = scheduler.create_job(step, Box::into_raw(p1) as *mut u8);

    scheduler.add_continuation(j1, j2).unwrap();
    scheduler.add_continuation(j2, j3).unwrap();

    scheduler.run(j1);
    scheduler.wait(j3);

    let recorded = order.lock().unwrap().clone();
    assert_eq!(recorded, vec!["j1", "j2", "j3"]);

    // leak the two payloads `step` never freed (j2/j3's) - this test only
    // cares about ordering, not payload ownership, so a deliberate leak
    // keeps the job function signature simple (fn, not FnOnce).
    scheduler.shutdown();
}

/// S4: submit work, shut down, and confirm the process doesn't hang.
#[test]
fn shutdown_drains_in_flight_work_without_hanging() {
    let scheduler = scheduler(4);

    let completed = Arc::new(AtomicUsize::new(0));

    struct Payload {
        completed: Arc<AtomicUsize>,
    }

    fn job_fn(_job: JobHandle, payload: *mut u8) {
        let payload = unsafe { Box::from_raw(payload as *mut Payload) };
        payload.completed.fetch_add(1, Ordering::SeqCst);
    }

    let root = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());
    for _ in 0..10 {
        let payload = Box::new(Payload {
            completed: completed.clone(),
        });
        let job = scheduler.create_child_job(root, job_fn, Box::into_raw(payload) as *mut u8);
        scheduler.run(job);
    }
    scheduler.run(root);
    scheduler.wait(root);

    scheduler.shutdown();
    // Idempotent: calling it again must not panic or deadlock.
    scheduler.shutdown();

    assert_eq!(completed.load(Ordering::SeqCst), 10);
}

/// S5: the 11th continuation on a single job is rejected, not silently run.
#[test]
fn continuation_capacity_is_enforced() {
    let scheduler = scheduler(2);
    let ran = Arc::new(AtomicUsize::new(0));

    struct Payload {
        ran: Arc<AtomicUsize>,
    }

    fn job_fn(_job: JobHandle, payload: *mut u8) {
        let payload = unsafe { &*(payload as *const Payload) };
        payload.ran.fetch_add(1, Ordering::SeqCst);
    }

    let source = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());

    let mut payloads = Vec::new();
    let mut accepted = 0;
    let mut rejected = 0;

    for _ in 0..11 {
        let payload = Box::new(Payload { ran: ran.clone() });
        let payload_ptr = Box::into_raw(payload);
        payloads.push(payload_ptr);
        let successor = scheduler.create_job(job_fn, payload_ptr as *mut u8);

        match scheduler.add_continuation(source, successor) {
            Ok(()) => accepted += 1,
            Err(_) => rejected += 1,
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(rejected, 1);

    scheduler.run(source);
    scheduler.wait(source);

    // `wait(source)` only guarantees `source` itself is done; its 10
    // continuations were pushed onto a worker's deque as part of `finish`
    // and may still be in flight on another thread, so poll for the real
    // completion signal instead of assuming it's immediate.
    while ran.load(Ordering::SeqCst) < 10 {
        std::thread::yield_now();
    }

    assert_eq!(ran.load(Ordering::SeqCst), 10);

    for ptr in payloads {
        unsafe {
            drop(Box::from_raw(ptr));
        }
    }

    scheduler.shutdown();
}

/// S6: a single-worker scheduler drains its own deque entirely through `wait`.
#[test]
fn single_worker_scheduler_drains_its_own_queue() {
    let scheduler = scheduler(1);
    const CHILD_COUNT: usize = 200;

    let counters: Arc<Vec<AtomicI32>> = Arc::new((0..CHILD_COUNT).map(|_| AtomicI32::new(0)).collect());

    struct Payload {
        counters: Arc<Vec<AtomicI32>>,
        index: usize,
    }

    fn child_fn(_job: JobHandle, payload: *mut u8) {
        let payload = unsafe { Box::from_raw(payload as *mut Payload) };
        payload.counters[payload.index].fetch_add(1, Ordering::SeqCst);
    }

    let root = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());
    for i in 0..CHILD_COUNT {
        let payload = Box::new(Payload {
            counters: counters.clone(),
            index: i,
        });
        let child = scheduler.create_child_job(root, child_fn, Box::into_raw(payload) as *mut u8);
        scheduler.run(child);
    }
    scheduler.run(root);
    scheduler.wait(root);

    for counter in counters.iter() {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    scheduler.shutdown();
}

/// Property 5 (scaled down): a uniform workload spreads across more than
/// just the creating thread - some of it gets stolen and run elsewhere.
#[test]
fn uniform_workload_is_distributed_across_workers() {
    const WORKER_COUNT: usize = 4;
    const JOB_COUNT: usize = 20_000;

    let scheduler = scheduler(WORKER_COUNT);

    let total = Arc::new(AtomicUsize::new(0));
    let threads_seen = Arc::new(std::sync::Mutex::new(std::collections::HashSet::new()));

    struct Payload {
        total: Arc<AtomicUsize>,
        threads_seen: Arc<std::sync::Mutex<std::collections::HashSet<std::thread::ThreadId>>>,
    }

    fn job_fn(_job: JobHandle, payload: *mut u8) {
        let payload = unsafe { Box::from_raw(payload as *mut Payload) };
        payload
            .threads_seen
            .lock()
            .unwrap()
            .insert(std::thread::current().id());
        payload.total.fetch_add(1, Ordering::SeqCst);
    }

    let root = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());
    for _ in 0..JOB_COUNT {
        let payload = Box::new(Payload {
            total: total.clone(),
            threads_seen: threads_seen.clone(),
        });
        let job = scheduler.create_child_job(root, job_fn, Box::into_raw(payload) as *mut u8);
        scheduler.run(job);
    }
    scheduler.run(root);
    scheduler.wait(root);

    assert_eq!(total.load(Ordering::SeqCst), JOB_COUNT);
    assert!(
        threads_seen.lock().unwrap().len() > 1,
        "expected work-stealing to spread {JOB_COUNT} jobs across more than one OS thread"
    );

    scheduler.shutdown();
}

/// Property 7: two frames' worth of job creation on a small arena must not
/// corrupt a still-live parent's bookkeeping.
#[test]
fn arena_recycling_survives_consecutive_frames() {
    let _ = env_logger::try_init();
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_count: Some(1),
        arena_capacity: 64,
        deque_capacity: 64,
        ..Default::default()
    })
    .unwrap();

    for _frame in 0..4 {
        let total = Arc::new(AtomicUsize::new(0));
        struct Payload {
            total: Arc<AtomicUsize>,
        }
        fn job_fn(_job: JobHandle, payload: *mut u8) {
            let payload = unsafe { Box::from_raw(payload as *mut Payload) };
            payload.total.fetch_add(1, Ordering::SeqCst);
        }

        let root = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());
        for _ in 0..32 {
            let payload = Box::new(Payload { total: total.clone() });
            let job = scheduler.create_child_job(root, job_fn, Box::into_raw(payload) as *mut u8);
            scheduler.run(job);
        }
        scheduler.run(root);
        scheduler.wait(root);

        assert_eq!(total.load(Ordering::SeqCst), 32);
    }

    scheduler.shutdown();
}

/// A job function that panics must not wedge a `wait()` on the rest of the
/// graph - the scheduler logs and treats it as finished.
#[test]
fn a_panicking_job_does_not_wedge_its_siblings() {
    let scheduler = scheduler(2);

    let ran = Arc::new(AtomicBool::new(false));

    fn panics(_job: JobHandle, _payload: *mut u8) {
        panic!("boom");
    }

    struct Payload {
        ran: Arc<AtomicBool>,
    }
    fn marks_ran(_job: JobHandle, payload: *mut u8) {
        let payload = unsafe { Box::from_raw(payload as *mut Payload) };
        payload.ran.store(true, Ordering::SeqCst);
    }

    let root = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());
    let bad = scheduler.create_child_job(root, panics, std::ptr::null_mut());
    let good_payload = Box::new(Payload { ran: ran.clone() });
    let good = scheduler.create_child_job(root, marks_ran, Box::into_raw(good_payload) as *mut u8);

    scheduler.run(bad);
    scheduler.run(good);
    scheduler.run(root);
    scheduler.wait(root);

    assert!(ran.load(Ordering::SeqCst));
    assert!(root.is_finished());

    scheduler.shutdown();
}

/// A3: continuation capacity is a validated, configurable field, not a
/// hardcoded constant.
#[test]
fn continuation_capacity_is_validated_and_configurable() {
    let _ = env_logger::try_init();

    let zero = Scheduler::new(SchedulerConfig {
        worker_count: Some(1),
        continuation_capacity: 0,
        ..Default::default()
    });
    assert!(matches!(
        zero,
        Err(SchedulerError::InvalidContinuationCapacity(0))
    ));

    let too_large = Scheduler::new(SchedulerConfig {
        worker_count: Some(1),
        continuation_capacity: MAX_CONTINUATIONS + 1,
        ..Default::default()
    });
    assert!(matches!(
        too_large,
        Err(SchedulerError::InvalidContinuationCapacity(_))
    ));

    let scheduler = Scheduler::new(SchedulerConfig {
        worker_count: Some(1),
        continuation_capacity: 1,
        ..Default::default()
    })
    .unwrap();

    let job = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());
    let first = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());
    let second = scheduler.create_job(|_job, _payload| {}, std::ptr::null_mut());

    assert!(scheduler.add_continuation(job, first).is_ok());
    assert!(matches!(
        scheduler.add_continuation(job, second),
        Err(task_forge::JobSystemError::ContinuationCapacityExceeded)
    ));

    scheduler.shutdown();
}
