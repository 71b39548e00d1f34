use std::io;

/// Failures that can occur while constructing or tearing down a [`crate::Scheduler`].
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("arena capacity must be a nonzero power of two, got {0}")]
    InvalidArenaCapacity(usize),

    #[error("worker count must be nonzero, got {0}")]
    InvalidWorkerCount(usize),

    #[error("continuation capacity must be nonzero and within the job record's fixed slot count, got {0}")]
    InvalidContinuationCapacity(usize),

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawnFailed(#[source] io::Error),
}

/// Failures reported by job-graph operations once a [`crate::Scheduler`] is running.
#[derive(Debug, thiserror::Error)]
pub enum JobSystemError {
    /// A job already has the maximum number of continuations registered
    /// ([`crate::job::MAX_CONTINUATIONS`]); the successor was dropped and will never run.
    #[error("continuation capacity exceeded, successor was dropped")]
    ContinuationCapacityExceeded,
}
