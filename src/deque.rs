//! A bounded, single-owner, multi-thief Chase-Lev work-stealing deque of
//! [`JobHandle`]s.
//!
//! `push` and `pop` may only be called by the deque's owning worker; `steal`
//! may be called by anyone else. The implementation follows the original
//! Chase-Lev paper's ordering discipline as carried through the CPU-intrinsic
//! version this crate was ported from: a release fence between writing a
//! slot and publishing `bottom` in `push`, a full barrier on `pop`'s `bottom`
//! decrement, and an acquire read pair on `steal`'s `top`-then-`bottom` load.

use crate::job::{Job, JobHandle};
use std::sync::atomic::{fence, AtomicIsize, AtomicPtr, Ordering};

pub(crate) struct Deque {
    mask: isize,
    buffer: Box<[AtomicPtr<Job>]>,
    top: AtomicIsize,
    bottom: AtomicIsize,
}

// SAFETY: `buffer` holds raw pointers that are only ever dereferenced through
// a `JobHandle`, which carries its own `Send` justification.
unsafe impl Sync for Deque {}

impl Deque {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "deque capacity must be a nonzero power of two, got {capacity}"
        );

        let buffer = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();

        Self {
            mask: capacity as isize - 1,
            buffer,
            top: AtomicIsize::new(0),
            bottom: AtomicIsize::new(0),
        }
    }

    #[inline]
    fn slot(&self, index: isize) -> &AtomicPtr<Job> {
        &self.buffer[(index & self.mask) as usize]
    }

    /// Push a job onto the bottom of the deque. Owner-only; never call this
    /// from a thread that doesn't own the deque.
    ///
    /// # Panics
    /// If the deque is already at capacity. The caller (the scheduler) is
    /// responsible for sizing the deque so this cannot happen within a
    /// frame - this is a programmer precondition violation, not a runtime
    /// condition to recover from.
    pub(crate) fn push(&self, job: JobHandle) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        assert!(
            b - t < self.mask + 1,
            "work-stealing deque overflowed: more jobs were pushed in one frame than its capacity"
        );

        self.slot(b).store(job.as_mut_ptr(), Ordering::Relaxed);
        // Release fence: the slot write must be visible to a thief before it
        // can observe the incremented `bottom` below.
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
    }

    /// Pop a job from the bottom of the deque. Owner-only.
    pub(crate) fn pop(&self) -> Option<JobHandle> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        // Full barrier: publish the tentative new `bottom` before reading
        // `top`, so a concurrent steal sees it.
        self.bottom.store(b, Ordering::SeqCst);

        let t = self.top.load(Ordering::SeqCst);

        if t > b {
            // Queue was already empty; restore bottom to its true value.
            self.bottom.store(t, Ordering::Relaxed);
            return None;
        }

        let ptr = self.slot(b).load(Ordering::Relaxed);

        if t != b {
            // More than one element left; uncontended.
            return Some(JobHandle::from_raw(ptr));
        }

        // Last element: race a thief for it via CAS on `top`.
        let won = self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        // Either way `top` is now `t + 1` (we advanced it, or a thief did);
        // normalize `bottom` to match so the deque reads as empty.
        self.bottom.store(t + 1, Ordering::Relaxed);

        if won {
            Some(JobHandle::from_raw(ptr))
        } else {
            None
        }
    }

    /// Attempt to steal a job from the top of the deque. Called by any
    /// non-owning worker.
    pub(crate) fn steal(&self) -> Option<JobHandle> {
        let t = self.top.load(Ordering::Acquire);
        // Acquire fence: `top` must be read before `bottom`, otherwise a
        // concurrent pop could shrink the queue out from under us between
        // the two loads and we'd read a slot the owner is also reading.
        fence(Ordering::Acquire);
        let b = self.bottom.load(Ordering::Acquire);

        if t >= b {
            return None;
        }

        let ptr = self.slot(t).load(Ordering::Relaxed);

        match self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Some(JobHandle::from_raw(ptr)),
            // A concurrent steal or the owner's last-element pop got there first.
            Err(_) => None,
        }
    }
}
