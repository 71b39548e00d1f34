//! Range-decomposition helpers built on top of [`Scheduler`].
//!
//! Two flavors, both mirroring the hand-rolled C++ `parallel_for` this
//! crate's core job protocol was ported from:
//!
//! - [`parallel_for`] slices `[0, count)` into fixed-size batches up front
//!   and fires one leaf job per batch - the batch count is known before
//!   any job runs, so there is no recursive splitting.
//! - [`parallel_for_with`] recursively halves the range, consulting a
//!   [`Splitter`] at each level, and only stops subdividing once a batch
//!   is small enough to run as a leaf.
//!
//! Both return the root [`JobHandle`]; the caller must [`Scheduler::wait`]
//! on it before the backing data can be reused or freed. The root job is
//! always enqueued *last*, after every batch job it parents has already
//! been created (and its own `unfinished` count bumped accordingly) -
//! enqueuing it any earlier would let a worker race the root to zero
//! before the batches it is waiting on even exist.
//!
//! [`parallel_for_slice`] wraps the recursive form for the common case of
//! a `&mut [T]` and a `Fn(&mut [T])` closure, waiting internally so the
//! caller never sees a raw pointer.

use crate::job::JobHandle;
use crate::scheduler::Scheduler;

/// Decides whether a range of `count` elements is still too large to run
/// as a single leaf job.
pub trait Splitter {
    fn should_split(&self, count: u32) -> bool;
}

/// Split purely on element count.
#[derive(Debug, Clone, Copy)]
pub struct CountSplitter {
    pub threshold: u32,
}

impl CountSplitter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }
}

impl Default for CountSplitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Splitter for CountSplitter {
    fn should_split(&self, count: u32) -> bool {
        count > self.threshold
    }
}

/// Split on the byte footprint of the range, so a batch of large elements
/// splits sooner than a batch of small ones.
#[derive(Debug, Clone, Copy)]
pub struct DataSizeSplitter {
    pub element_size: usize,
    pub cache_size_threshold: usize,
}

/// 32 KiB: a conservative guess at an L1 data cache's usable size.
const DEFAULT_CACHE_BUDGET: usize = 32 * 1024;

impl DataSizeSplitter {
    pub fn new(element_size: usize) -> Self {
        Self::with_cache_budget(element_size, DEFAULT_CACHE_BUDGET)
    }

    pub fn with_cache_budget(element_size: usize, cache_size_threshold: usize) -> Self {
        Self {
            element_size,
            cache_size_threshold,
        }
    }
}

impl Splitter for DataSizeSplitter {
    fn should_split(&self, count: u32) -> bool {
        (count as usize) * self.element_size > self.cache_size_threshold
    }
}

/// A `parallel_for` leaf callback: `(batch_data, batch_count, user_data)`.
pub type ParallelForFn = fn(*mut u8, u32, *mut u8);

fn empty_job(_job: JobHandle, _payload: *mut u8) {}

struct BatchPayload {
    data: *mut u8,
    count: u32,
    callback: ParallelForFn,
    user_data: *mut u8,
}

fn run_batch(_job: JobHandle, payload: *mut u8) {
    // SAFETY: `payload` was produced by `Box::into_raw` below, right before
    // this job was created, and is read by exactly this one job function.
    let batch = unsafe { Box::from_raw(payload as *mut BatchPayload) };
    (batch.callback)(batch.data, batch.count, batch.user_data);
}

/// Slice `[0, count)` into batches of at most `threshold` elements and run
/// one leaf job per batch as a child of the returned root job.
///
/// # Safety
/// `data` must point at `count * element_size` contiguous, initialized
/// bytes. Those bytes - and `user_data`, if `callback` touches it - must
/// stay validly borrowed by every batch until the caller has called
/// [`Scheduler::wait`] on the returned job.
pub unsafe fn parallel_for(
    scheduler: &Scheduler,
    data: *mut u8,
    count: u32,
    element_size: u32,
    callback: ParallelForFn,
    user_data: *mut u8,
    threshold: u32,
) -> JobHandle {
    assert!(
        element_size != 0,
        "parallel_for: element_size must be nonzero, got {element_size}"
    );

    let threshold = threshold.max(1);
    let root = scheduler.create_job(empty_job, std::ptr::null_mut());

    if count <= threshold {
        callback(data, count, user_data);
        scheduler.run(root);
        return root;
    }

    let mut start = 0u32;
    while start < count {
        let batch = threshold.min(count - start);
        let payload = Box::new(BatchPayload {
            data: data.add((start as usize) * (element_size as usize)),
            count: batch,
            callback,
            user_data,
        });

        let job = scheduler.create_child_job(root, run_batch, Box::into_raw(payload) as *mut u8);
        scheduler.run(job);

        start += batch;
    }

    scheduler.run(root);
    root
}

struct SplitPayload<S> {
    scheduler: *const Scheduler,
    data: *mut u8,
    count: u32,
    element_size: u32,
    callback: ParallelForFn,
    user_data: *mut u8,
    splitter: S,
}

fn split_job<S: Splitter + Clone + Send + 'static>(job: JobHandle, payload: *mut u8) {
    // SAFETY: see `split_job`'s callers - each payload is owned by exactly
    // the job it was created alongside.
    let data = unsafe { Box::from_raw(payload as *mut SplitPayload<S>) };

    if data.count == 0 {
        return;
    }

    if !data.splitter.should_split(data.count) {
        (data.callback)(data.data, data.count, data.user_data);
        return;
    }

    // SAFETY: the scheduler outlives every job it runs, by construction.
    let scheduler = unsafe { &*data.scheduler };

    let left_count = data.count / 2;
    let right_count = data.count - left_count;
    // SAFETY: `right_count` elements starting here are still within the
    // original `[data, data + count * element_size)` range the caller
    // promised us in `parallel_for_with`.
    let right_data = unsafe { data.data.add((left_count as usize) * (data.element_size as usize)) };

    let left_payload = Box::new(SplitPayload {
        scheduler: data.scheduler,
        data: data.data,
        count: left_count,
        element_size: data.element_size,
        callback: data.callback,
        user_data: data.user_data,
        splitter: data.splitter.clone(),
    });
    let left = scheduler.create_child_job(job, split_job::<S>, Box::into_raw(left_payload) as *mut u8);
    scheduler.run(left);

    let right_payload = Box::new(SplitPayload {
        scheduler: data.scheduler,
        data: right_data,
        count: right_count,
        element_size: data.element_size,
        callback: data.callback,
        user_data: data.user_data,
        splitter: data.splitter.clone(),
    });
    let right = scheduler.create_child_job(job, split_job::<S>, Box::into_raw(right_payload) as *mut u8);
    scheduler.run(right);
}

/// Recursively halve `[0, count)`, consulting `splitter` at each level,
/// until every leaf is small enough to run `callback` directly.
///
/// # Safety
/// Same contract as [`parallel_for`].
pub unsafe fn parallel_for_with<S>(
    scheduler: &Scheduler,
    data: *mut u8,
    count: u32,
    element_size: u32,
    callback: ParallelForFn,
    user_data: *mut u8,
    splitter: S,
) -> JobHandle
where
    S: Splitter + Clone + Send + 'static,
{
    assert!(
        element_size != 0,
        "parallel_for_with: element_size must be nonzero, got {element_size}"
    );

    let root = scheduler.create_job(empty_job, std::ptr::null_mut());

    let payload = Box::new(SplitPayload {
        scheduler: scheduler as *const Scheduler,
        data,
        count,
        element_size,
        callback,
        user_data,
        splitter,
    });
    let first = scheduler.create_child_job(root, split_job::<S>, Box::into_raw(payload) as *mut u8);
    scheduler.run(first);

    scheduler.run(root);
    root
}

/// Run `kernel` over disjoint sub-slices of `slice` in parallel, splitting
/// by element count, and block until every sub-slice has been processed.
///
/// A thin, safe convenience layer over [`parallel_for_with`]: it owns the
/// wait, so the caller never has to reason about the lifetime of the
/// borrow past this call.
pub fn parallel_for_slice<T, F>(scheduler: &Scheduler, slice: &mut [T], threshold: u32, kernel: F)
where
    T: Send,
    F: Fn(&mut [T]) + Sync,
{
    fn trampoline<T, F>(data: *mut u8, count: u32, user_data: *mut u8)
    where
        F: Fn(&mut [T]) + Sync,
    {
        // SAFETY: `user_data` points at the `kernel` borrowed by
        // `parallel_for_slice` below, which outlives this call because it
        // waits on the root job before returning.
        let kernel = unsafe { &*(user_data as *const F) };
        // SAFETY: `data`/`count` describe a sub-range of the slice
        // `parallel_for_slice` borrowed mutably; `split_job` only ever
        // hands out disjoint sub-ranges, so this is the sole live
        // reference to these elements.
        let sub_slice = unsafe { std::slice::from_raw_parts_mut(data as *mut T, count as usize) };
        kernel(sub_slice);
    }

    let element_size = std::mem::size_of::<T>() as u32;
    let count = slice.len() as u32;
    let data_ptr = slice.as_mut_ptr() as *mut u8;
    let kernel_ptr = &kernel as *const F as *mut u8;
    let splitter = CountSplitter::new(threshold);

    // SAFETY: `data_ptr` is valid for `count * element_size` bytes for as
    // long as `slice` is borrowed, and we wait on `root` before this
    // function - and therefore the borrow of `slice` and `kernel` - ends.
    let root = unsafe {
        parallel_for_with(
            scheduler,
            data_ptr,
            count,
            element_size,
            trampoline::<T, F>,
            kernel_ptr,
            splitter,
        )
    };
    scheduler.wait(root);
}
