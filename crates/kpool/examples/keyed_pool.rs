//! Keyed connection pool walkthrough.
//!
//! This example drives a pool of in-memory connections through checkout,
//! keyed reuse, rollback-on-return, idle eviction and shutdown, printing the
//! pool status along the way.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=debug cargo run -p kpool --example keyed_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use kpool::{Connection, ConnectionPool, PoolConfig, PoolError, PoolRegistry, ThreadedPool, spawn_pruner};
use kpool_testing::MockFactory;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Keyed Connection Pool Example ===\n");

    let pool_config = PoolConfig::new()
        .min_connections(2)
        .max_connections(4)
        .idle_timeout(Duration::from_millis(200));

    println!("Pool configuration:");
    println!("  Min connections: {}", pool_config.min_connections);
    println!("  Max connections: {}", pool_config.max_connections);
    println!("  Idle timeout: {:?}", pool_config.idle_timeout);
    println!();

    let registry = PoolRegistry::new();
    let factory = MockFactory::new();
    let state = factory.state();
    let pool = registry.get_or_create("mock://primary", pool_config, |_| factory)?;
    print_pool_status(&pool);

    // Example 1: Basic checkout and return
    println!("\n1. Basic pool usage:");
    let conn = pool.get()?;
    println!("  Checked out connection {}", conn.id());
    pool.put(conn)?;
    print_pool_status(&pool);

    // Example 2: Keyed checkout
    println!("\n2. Keyed checkout:");
    let first = pool.get_keyed("nightly-report")?;
    let second = pool.get_keyed("nightly-report")?;
    println!(
        "  Same key, same connection: {} / {} ({})",
        first.id(),
        second.id(),
        first.same_connection(&second)
    );
    pool.put(first)?;

    // Example 3: Leftover transactions are rolled back on return
    println!("\n3. Rollback on return:");
    let conn = pool.get()?;
    conn.begin();
    println!("  Returning connection in state {}", conn.transaction_status());
    pool.put(conn)?;
    println!("  Rollbacks issued so far: {}", state.rollbacks());

    // Example 4: Exhaustion fails fast
    println!("\n4. Exhaustion:");
    let held: Vec<_> = (0..4).map(|_| pool.get()).collect::<Result<_, _>>()?;
    match pool.get() {
        Err(PoolError::PoolExhausted { max }) => println!("  Pool exhausted at {max} connections"),
        other => println!("  Unexpected result: {other:?}"),
    }
    print_pool_status(&pool);
    for conn in held {
        pool.put(conn)?;
    }

    // Example 5: Background idle eviction
    println!("\n5. Idle eviction:");
    let pruner = spawn_pruner(Arc::clone(&pool), Duration::from_millis(50));
    print_pool_status(&pool);
    tokio::time::sleep(Duration::from_millis(400)).await;
    print_pool_status(&pool);
    pruner.shutdown();

    // Example 6: Shutdown
    println!("\n6. Shutdown:");
    for (dsn, report) in registry.close_all() {
        println!(
            "  {dsn}: closed {} connections, {} failures",
            report.closed,
            report.failures.len()
        );
    }
    println!("  Opened {} connections in total.", state.opened());

    Ok(())
}

fn print_pool_status(pool: &ThreadedPool<MockFactory>) {
    let status = pool.status();
    println!(
        "  Status: {} in use, {} idle ({:.1}% utilization)",
        status.in_use,
        status.available,
        status.utilization()
    );
}
