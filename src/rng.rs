//! A tiny per-worker xorshift PRNG for victim selection.
//!
//! Victim selection just needs to be cheap and uniform enough to balance
//! load; it does not need to be cryptographically strong, so a thread-local
//! xorshift64* generator (no external RNG dependency) is sufficient.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static STATE: Cell<u64> = Cell::new(0);
}

/// Seed this thread's generator from its worker index, its OS thread id, and
/// the current time - enough to decorrelate workers without any shared
/// mutable RNG state on the hot path.
pub(crate) fn seed(worker_index: usize) {
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    let tid_hash = hasher.finish();

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let seed = (worker_index as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ tid_hash
        ^ nanos
        | 1; // xorshift requires a nonzero state

    STATE.with(|cell| cell.set(seed));
}

/// A uniformly distributed index in `[0, bound)`.
pub(crate) fn next_index(bound: usize) -> usize {
    STATE.with(|cell| {
        let mut x = cell.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        cell.set(x);
        (x % bound as u64) as usize
    })
}
