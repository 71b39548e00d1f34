use std::cell::UnsafeCell;
use std::fmt::{Debug, Formatter};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU8, Ordering};

/// Maximum number of continuations a single job may register.
///
/// A fixed cap keeps the `Job` record fixed-size, which is the whole point of
/// the arena allocator below; most jobs have zero or one continuation.
pub const MAX_CONTINUATIONS: usize = 10;

/// Target size, in bytes, of a [`Job`] record.
///
/// Two cache lines: isolates the hot `unfinished` counter from a neighbor
/// job's hot fields, trading memory for fewer false-sharing stalls on the
/// steal path.
pub const JOB_RECORD_SIZE: usize = 128;

/// A job function: receives a handle to itself and the opaque payload
/// pointer it was created with. Plain function pointer, no closures -
/// keeping the record fixed-size means the payload has to live outside it.
pub type JobFn = fn(JobHandle, *mut u8);

#[repr(C)]
struct JobFields {
    func: Option<JobFn>,
    parent: Option<JobHandle>,
    unfinished: AtomicI32,
    continuation_count: AtomicU8,
    continuations: [UnsafeCell<Option<JobHandle>>; MAX_CONTINUATIONS],
    payload: AtomicPtr<u8>,
}

const FIELDS_SIZE: usize = std::mem::size_of::<JobFields>();
const PADDING_LEN: usize = JOB_RECORD_SIZE - FIELDS_SIZE;

const _: () = assert!(
    FIELDS_SIZE <= JOB_RECORD_SIZE,
    "Job no longer fits the 128-byte record budget; shrink a field or raise JOB_RECORD_SIZE"
);

/// A single unit of work.
///
/// `func`, `parent` and each `continuations` slot are written once, by the
/// thread that creates the job, before the job is published to a deque or
/// registered as someone else's continuation; every other thread only ever
/// reads them afterwards. `unfinished` and `continuation_count` are the hot
/// atomics.
#[repr(C, align(64))]
pub struct Job {
    pub(crate) func: Option<JobFn>,
    pub(crate) parent: Option<JobHandle>,
    pub(crate) unfinished: AtomicI32,
    pub(crate) continuation_count: AtomicU8,
    pub(crate) continuations: [UnsafeCell<Option<JobHandle>>; MAX_CONTINUATIONS],
    pub(crate) payload: AtomicPtr<u8>,
    _padding: [u8; PADDING_LEN],
}

impl Debug for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("unfinished", &self.unfinished)
            .field("continuation_count", &self.continuation_count)
            .finish()
    }
}

impl Default for Job {
    fn default() -> Self {
        const EMPTY: UnsafeCell<Option<JobHandle>> = UnsafeCell::new(None);
        Self {
            func: None,
            parent: None,
            unfinished: AtomicI32::new(0),
            continuation_count: AtomicU8::new(0),
            continuations: [EMPTY; MAX_CONTINUATIONS],
            payload: AtomicPtr::new(std::ptr::null_mut()),
            _padding: [0; PADDING_LEN],
        }
    }
}

/// A weak, non-owning reference into a live arena slot.
///
/// `JobHandle` is intentionally `Copy` and carries no refcount: its validity
/// is guaranteed only by the frame-drain invariant enforced by the scheduler
/// (see [`crate::arena::Arena`]), never by reference counting. Dereferencing
/// a handle whose slot has since been recycled, or that outlives the
/// scheduler that owns it, is undefined behavior - the same contract any
/// arena-plus-index model carries.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct JobHandle(pub(crate) NonNull<Job>);

impl Debug for JobHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobHandle({:p})", self.0.as_ptr())
    }
}

// SAFETY: a `JobHandle` is sent between threads whenever a job is pushed to,
// or stolen from, a deque; every subsequent access goes through the atomics
// on `Job`, or relies on the happens-before chain established in `finish`.
unsafe impl Send for JobHandle {}

impl JobHandle {
    #[inline]
    pub(crate) fn from_raw(ptr: *mut Job) -> Self {
        // SAFETY: callers only ever construct a handle from a fresh arena slot.
        Self(unsafe { NonNull::new_unchecked(ptr) })
    }

    #[inline]
    pub(crate) fn job(&self) -> &Job {
        // SAFETY: caller contract - see the struct doc comment.
        unsafe { self.0.as_ref() }
    }

    /// Raw access for the scheduler to initialize the non-atomic fields
    /// (`func`, `parent`) right after allocation, before the job is
    /// published to any deque or continuation list.
    #[inline]
    pub(crate) fn as_mut_ptr(&self) -> *mut Job {
        self.0.as_ptr()
    }

    /// Whether this job (and every one of its live children) has finished.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.job().unfinished.load(Ordering::Acquire) == 0
    }

    /// The opaque user-data pointer this job was created or last set with.
    #[inline]
    pub fn user_data(&self) -> *mut u8 {
        self.job().payload.load(Ordering::Acquire)
    }

    /// Overwrite the opaque user-data pointer. Caller-owned; the scheduler
    /// never frees it.
    #[inline]
    pub fn set_user_data(&self, ptr: *mut u8) {
        self.job().payload.store(ptr, Ordering::Release);
    }
}
