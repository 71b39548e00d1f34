//! A lock-free, work-stealing job scheduler for fine-grained per-frame
//! compute work: the kind of workload a game engine, renderer, or physics
//! step needs to fan out across cores and join back up without per-job
//! heap allocation or syscalls on the hot path.
//!
//! The building blocks, from the bottom up:
//!
//! - [`job`] - the fixed-size, cache-line-aligned job record and the
//!   [`JobHandle`] that points at one.
//! - [`arena`] - the per-worker bump allocator jobs are carved out of.
//! - [`deque`] - the Chase-Lev work-stealing deque workers push to, pop
//!   from, and steal from.
//! - [`rng`] - the thread-local generator workers use to pick a steal
//!   victim.
//! - [`scheduler`] - worker lifecycle, job creation, and the
//!   parent/continuation completion protocol; the type applications embed.
//! - [`parallel_for`] - range-decomposition helpers built on top of
//!   `Scheduler`.
//!
//! There is no global scheduler singleton: an application builds one
//! [`Scheduler`], keeps it in an `Arc`, and shares that handle with
//! whatever owns the main loop.

mod arena;
mod deque;
mod error;
mod job;
pub mod parallel_for;
mod rng;
mod scheduler;

pub use error::{JobSystemError, SchedulerError};
pub use job::{JobFn, JobHandle, JOB_RECORD_SIZE, MAX_CONTINUATIONS};
pub use parallel_for::{parallel_for, parallel_for_slice, parallel_for_with, CountSplitter, DataSizeSplitter, ParallelForFn, Splitter};
pub use scheduler::{Scheduler, SchedulerConfig, DEFAULT_ARENA_CAPACITY};
