use crate::job::{Job, JobHandle};
use std::cell::{Cell, UnsafeCell};

/// Per-worker bump allocator over a power-of-two ring of [`Job`] records.
///
/// There is no `free`: slots are recycled by overwrite once the index laps
/// the ring. The scheduler is responsible for the invariant that a slot is
/// never reallocated while a still-live `parent` or continuation reference
/// points at it - see the module docs on [`crate::scheduler`].
pub(crate) struct Arena {
    mask: usize,
    slots: Box<[UnsafeCell<Job>]>,
    index: Cell<usize>,
}

// SAFETY: an `Arena` is only ever indexed by its owning worker thread; the
// `Vec<WorkerContext>` it lives in is shared across threads only so that
// *other* workers can read `Job` fields through a `JobHandle`, never so they
// can call `allocate` on an arena they don't own.
unsafe impl Sync for Arena {}

impl Arena {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "arena capacity must be a nonzero power of two, got {capacity}"
        );

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(Job::default()))
            .collect();

        Self {
            mask: capacity - 1,
            slots,
            index: Cell::new(0),
        }
    }

    /// Draw the next slot from the ring, overwriting whatever job used to
    /// live there.
    pub(crate) fn allocate(&self) -> JobHandle {
        let slot_index = self.index.get() & self.mask;
        self.index.set(self.index.get().wrapping_add(1));

        let cell = &self.slots[slot_index];

        // Debug-only check for the invariant callers must otherwise uphold
        // themselves: a slot about to be recycled must already be finished.
        // Violating it in release builds is undefined behavior by contract,
        // not a panic - see JobArena's contract in the design notes.
        #[cfg(debug_assertions)]
        {
            use std::sync::atomic::Ordering;
            let job = unsafe { &*cell.get() };
            debug_assert!(
                job.unfinished.load(Ordering::Acquire) == 0,
                "arena slot {slot_index} recycled before its previous job finished; \
                 more than capacity jobs were created on this worker without a drain"
            );
        }

        unsafe {
            *cell.get() = Job::default();
        }

        JobHandle::from_raw(cell.get())
    }
}
