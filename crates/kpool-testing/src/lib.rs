//! # kpool-testing
//!
//! Test infrastructure for the `kpool` connection pool.
//!
//! ## Features
//!
//! - Mock connection with scriptable transaction state and server-side disconnects
//! - Mock factory with scripted connect, close and rollback failures
//! - Explicitly shared counters for assertions across factory and connections
//! - Manually advanced clock for idle timeout tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use kpool::{ConnectionPool, PoolConfig, ThreadedPool};
//! use kpool_testing::{ManualClock, MockFactory};
//!
//! let factory = MockFactory::new();
//! let state = factory.state();
//! let clock = ManualClock::new();
//! let pool = ThreadedPool::with_clock(PoolConfig::new(), factory, clock.clone())?;
//!
//! let conn = pool.get()?;
//! conn.begin();
//! pool.put(conn)?;
//! assert_eq!(state.rollbacks(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod mock;

pub use clock::ManualClock;
pub use mock::{MockConnection, MockError, MockFactory, MockState};
