//! Worker thread lifecycle, victim selection, and the parent/continuation
//! completion protocol.
//!
//! There is deliberately no module-level mutable state: every public
//! operation takes `&self` (or `&Arc<Self>`), and the only thread-local is a
//! single `usize` recording which worker a given OS thread is playing -
//! set once, either when [`Scheduler::new`] is called (worker 0, the calling
//! thread) or at the top of a spawned worker's loop.

use crate::arena::Arena;
use crate::deque::Deque;
use crate::error::{JobSystemError, SchedulerError};
use crate::job::{JobFn, JobHandle, MAX_CONTINUATIONS};
use crate::rng;
use crossbeam_utils::CachePadded;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Default per-worker arena capacity: must be a power of two.
pub const DEFAULT_ARENA_CAPACITY: usize = 4096;

thread_local! {
    static WORKER_INDEX: Cell<Option<usize>> = Cell::new(None);
}

/// Configuration accepted by [`Scheduler::new`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of workers, including worker 0 (the thread that calls
    /// [`Scheduler::new`]). Defaults to [`std::thread::available_parallelism`],
    /// falling back to 4 if that cannot be determined.
    pub worker_count: Option<usize>,
    /// Per-worker job arena capacity. Must be a nonzero power of two.
    pub arena_capacity: usize,
    /// Per-worker deque capacity. Must be a nonzero power of two and should
    /// comfortably exceed the number of jobs created per worker per frame.
    pub deque_capacity: usize,
    /// Maximum continuations a single job may register. Must be nonzero and
    /// no greater than [`MAX_CONTINUATIONS`], the fixed number of slots the
    /// `Job` record physically carries - this only ever narrows that bound,
    /// it cannot grow it.
    pub continuation_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            deque_capacity: DEFAULT_ARENA_CAPACITY,
            continuation_capacity: MAX_CONTINUATIONS,
        }
    }
}

struct WorkerContext {
    arena: Arena,
    deque: Deque,
}

/// A stealing job scheduler.
pub struct Scheduler {
    // Each worker's hot deque indices live on their own cache line; without
    // this, adjacent workers' `top`/`bottom` would share a line and every
    // steal attempt on one worker would bounce the line out from under its
    // neighbor's push/pop.
    workers: Vec<CachePadded<WorkerContext>>,
    continuation_capacity: usize,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Build a scheduler and launch its worker pool.
    ///
    /// The thread that calls this becomes worker 0; it must be the thread
    /// that subsequently calls `create_job`/`run`/`wait` on behalf of the
    /// application's main loop (or any of those calls must happen from
    /// inside a job function, which always runs on a registered worker).
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>, SchedulerError> {
        let worker_count = match config.worker_count {
            Some(0) => return Err(SchedulerError::InvalidWorkerCount(0)),
            Some(n) => n,
            None => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or_else(|_| num_cpus::get()),
        };

        if config.arena_capacity == 0 || !config.arena_capacity.is_power_of_two() {
            return Err(SchedulerError::InvalidArenaCapacity(config.arena_capacity));
        }
        if config.deque_capacity == 0 || !config.deque_capacity.is_power_of_two() {
            return Err(SchedulerError::InvalidArenaCapacity(config.deque_capacity));
        }
        if config.continuation_capacity == 0 || config.continuation_capacity > MAX_CONTINUATIONS {
            return Err(SchedulerError::InvalidContinuationCapacity(
                config.continuation_capacity,
            ));
        }

        log::info!(
            "starting job scheduler with {worker_count} workers, arena capacity {}",
            config.arena_capacity
        );

        let workers = (0..worker_count)
            .map(|_| {
                CachePadded::new(WorkerContext {
                    arena: Arena::with_capacity(config.arena_capacity),
                    deque: Deque::with_capacity(config.deque_capacity),
                })
            })
            .collect();

        let scheduler = Arc::new(Self {
            workers,
            continuation_capacity: config.continuation_capacity,
            running: AtomicBool::new(true),
            threads: Mutex::new(Vec::with_capacity(worker_count.saturating_sub(1))),
        });

        WORKER_INDEX.with(|cell| cell.set(Some(0)));
        rng::seed(0);

        let mut threads = Vec::with_capacity(worker_count.saturating_sub(1));
        for index in 1..worker_count {
            let scheduler = scheduler.clone();
            let handle = thread::Builder::new()
                .name(format!("job-worker-{index}"))
                .spawn(move || scheduler.worker_loop(index))
                .map_err(SchedulerError::WorkerSpawnFailed)?;
            threads.push(handle);
        }
        *scheduler.threads.lock().unwrap() = threads;

        Ok(scheduler)
    }

    /// Number of workers in the pool, including worker 0.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn current_index(&self) -> usize {
        WORKER_INDEX.with(|cell| {
            cell.get().expect(
                "scheduler operation called from a thread that is not a registered worker: \
                 call it from the thread that built the Scheduler, or from inside a job",
            )
        })
    }

    fn worker_loop(&self, index: usize) {
        WORKER_INDEX.with(|cell| cell.set(Some(index)));
        rng::seed(index);
        log::debug!("worker {index} started");

        while self.running.load(Ordering::Acquire) {
            if let Some(job) = self.get_job(index) {
                self.execute(job);
            }
        }

        log::debug!("worker {index} exiting");
    }

    /// Pop from the local deque, or steal from a random peer.
    fn get_job(&self, index: usize) -> Option<JobHandle> {
        if let Some(job) = self.workers[index].deque.pop() {
            return Some(job);
        }

        let victim = rng::next_index(self.workers.len());
        if victim == index {
            thread::yield_now();
            return None;
        }

        match self.workers[victim].deque.steal() {
            Some(job) => Some(job),
            None => {
                thread::yield_now();
                None
            }
        }
    }

    /// Create a job with no parent.
    pub fn create_job(&self, func: JobFn, payload: *mut u8) -> JobHandle {
        let job = self.workers[self.current_index()].arena.allocate();
        // SAFETY: freshly allocated slot, not yet published to any deque.
        unsafe {
            (*job.as_mut_ptr()).func = Some(func);
            (*job.as_mut_ptr()).parent = None;
        }
        job.job().unfinished.store(1, Ordering::Release);
        job.set_user_data(payload);
        job
    }

    /// Create a job that must complete before `parent` is considered
    /// finished.
    pub fn create_child_job(&self, parent: JobHandle, func: JobFn, payload: *mut u8) -> JobHandle {
        parent.job().unfinished.fetch_add(1, Ordering::Relaxed);

        let job = self.workers[self.current_index()].arena.allocate();
        // SAFETY: freshly allocated slot, not yet published to any deque.
        unsafe {
            (*job.as_mut_ptr()).func = Some(func);
            (*job.as_mut_ptr()).parent = Some(parent);
        }
        job.job().unfinished.store(1, Ordering::Release);
        job.set_user_data(payload);
        job
    }

    /// Register `successor` to run once `job` finishes.
    ///
    /// Must be called before `job` finishes; adding a continuation to an
    /// already-finished job will never schedule it (silently - see
    /// DESIGN.md for why this is not surfaced as a separate error kind).
    pub fn add_continuation(
        &self,
        job: JobHandle,
        successor: JobHandle,
    ) -> Result<(), JobSystemError> {
        let count: &AtomicU8 = &job.job().continuation_count;
        let reserved = count.fetch_add(1, Ordering::AcqRel) as usize;

        if reserved >= self.continuation_capacity {
            count.fetch_sub(1, Ordering::AcqRel);
            return Err(JobSystemError::ContinuationCapacityExceeded);
        }

        // SAFETY: `reserved` was uniquely handed to this call by the fetch_add
        // above, so no other caller writes this slot concurrently.
        unsafe {
            *job.job().continuations[reserved].get() = Some(successor);
        }

        Ok(())
    }

    /// Submit a job onto the current worker's deque.
    pub fn run(&self, job: JobHandle) {
        self.workers[self.current_index()].deque.push(job);
    }

    /// Run `func(job, payload)`, then propagate completion.
    fn execute(&self, job: JobHandle) {
        let func = job.job().func.expect("job executed with no function set");
        let payload = job.user_data();

        let result = panic::catch_unwind(AssertUnwindSafe(|| func(job, payload)));
        if let Err(panic) = result {
            log::error!(
                "job panicked during execution; treating it as finished so dependents aren't \
                 wedged forever: {}",
                panic_message(&panic)
            );
        }

        self.finish(job);
    }

    /// Decrement `job.unfinished`; on reaching zero, run its continuations
    /// and propagate the decrement to its parent.
    fn finish(&self, job: JobHandle) {
        let mut current = job;
        loop {
            let remaining = current.job().unfinished.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining != 0 {
                return;
            }

            let count = current.job().continuation_count.load(Ordering::Acquire) as usize;
            for slot in &current.job().continuations[..count] {
                // SAFETY: every slot below `count` was written before the job
                // finished, per `add_continuation`'s contract.
                if let Some(successor) = unsafe { *slot.get() } {
                    self.run(successor);
                }
            }

            match current.job().parent {
                Some(parent) => current = parent,
                None => return,
            }
        }
    }

    /// Block the calling thread, executing other jobs, until `job` is
    /// finished. Never blocks on a condition variable: the caller becomes a
    /// worker for the duration of the wait.
    pub fn wait(&self, job: JobHandle) {
        let index = self.current_index();
        while !job.is_finished() {
            if let Some(next) = self.get_job(index) {
                self.execute(next);
            }
        }
    }

    /// No-op hook reserved for future per-frame profiling.
    pub fn frame_start(&self) {}

    /// Synchronization point. The contract is that the caller has already
    /// waited on every root job it cares about; this is the place an
    /// application would flush deferred finalizers. Arenas are not reset
    /// here - slots recycle implicitly as allocation indices keep advancing.
    pub fn frame_end(&self) {
        log::trace!("frame end");
    }

    /// Stop accepting new loop iterations and join every worker thread.
    /// Idempotent; also called from `Drop`.
    pub fn shutdown(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        log::info!("shutting down job scheduler");
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        log::info!("job scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
