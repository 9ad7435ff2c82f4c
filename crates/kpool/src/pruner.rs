//! Background idle eviction.
//!
//! [`spawn_pruner`] runs [`ConnectionPool::prune`] on a fixed interval from a
//! tokio task. The prune call itself goes through `spawn_blocking` because it
//! takes the pool lock and closes connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::connection::ConnectionFactory;
use crate::pool::{ConnectionPool, ThreadedPool};

/// Shortest accepted pruning interval.
pub const MIN_PRUNE_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running pruner task.
///
/// The task stops on its own once the pool is closed. Dropping the handle
/// detaches the task.
#[derive(Debug)]
pub struct PrunerHandle {
    task: JoinHandle<()>,
}

impl PrunerHandle {
    /// Stop the pruner.
    pub fn shutdown(self) {
        self.task.abort();
    }

    /// Check if the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "pruner task failed");
            }
        }
    }
}

/// Spawn a task that prunes `pool` every `interval`.
///
/// Must be called from within a tokio runtime. Intervals shorter than
/// [`MIN_PRUNE_INTERVAL`] are raised to it.
pub fn spawn_pruner<F>(pool: Arc<ThreadedPool<F>>, interval: Duration) -> PrunerHandle
where
    F: ConnectionFactory + Send + 'static,
    F::Connection: Send + Sync + 'static,
{
    let interval = interval.max(MIN_PRUNE_INTERVAL);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        tracing::debug!(?interval, "pruner started");
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }

            let target = Arc::clone(&pool);
            match tokio::task::spawn_blocking(move || target.prune()).await {
                Ok(report) => {
                    if !report.failures.is_empty() {
                        tracing::warn!(
                            evicted = report.evicted,
                            failures = report.failures.len(),
                            "idle eviction hit close errors"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "prune call failed, stopping pruner");
                    break;
                }
            }
        }
        tracing::debug!("pruner stopped");
    });

    PrunerHandle { task }
}
