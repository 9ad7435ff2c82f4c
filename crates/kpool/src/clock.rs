//! Time source used to stamp returned connections.

use std::time::Instant;

/// Source of monotonic time for idle bookkeeping.
///
/// The pool reads the clock when a connection enters the free list and when
/// `prune` runs. Tests swap in a manually advanced clock.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
