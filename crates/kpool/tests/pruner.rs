//! Background pruner tests.

#![cfg(feature = "pruner")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use kpool::{Connection, ConnectionPool, PoolConfig, ThreadedPool, spawn_pruner};
use kpool_testing::{ManualClock, MockFactory};

fn pool_with_clock(clock: Arc<ManualClock>) -> Arc<ThreadedPool<MockFactory>> {
    Arc::new(
        ThreadedPool::with_clock(
            PoolConfig::new()
                .min_connections(0)
                .max_connections(4)
                .idle_timeout(Duration::from_secs(30)),
            MockFactory::new(),
            clock,
        )
        .unwrap(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_pruner_evicts_expired_connections() {
    let clock = ManualClock::new();
    let pool = pool_with_clock(clock.clone());

    let handle = pool.get().unwrap();
    pool.put(handle.clone()).unwrap();

    let pruner = spawn_pruner(Arc::clone(&pool), Duration::from_millis(20));
    clock.advance(Duration::from_secs(31));

    assert!(wait_until(|| pool.status().available == 0).await);
    assert!(handle.is_closed());

    pruner.shutdown();
}

#[tokio::test]
async fn test_pruner_leaves_fresh_connections() {
    let clock = ManualClock::new();
    let pool = pool_with_clock(clock.clone());

    let handle = pool.get().unwrap();
    pool.put(handle.clone()).unwrap();

    let pruner = spawn_pruner(Arc::clone(&pool), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(pool.status().available, 1);
    assert!(!handle.is_closed());

    pruner.shutdown();
}

#[tokio::test]
async fn test_pruner_stops_when_pool_closes() {
    let clock = ManualClock::new();
    let pool = pool_with_clock(clock);

    let pruner = spawn_pruner(Arc::clone(&pool), Duration::from_millis(10));
    pool.close_all();

    assert!(wait_until(|| pruner.is_finished()).await);
    pruner.join().await;
}
