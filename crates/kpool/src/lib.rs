//! # kpool
//!
//! Keyed connection pool for stateful backend connections.
//!
//! The pool hands out connections to concurrent callers, sanitizes them when
//! they come back, and evicts the ones that sit idle too long. It treats a
//! connection as an opaque handle: the driver supplies a [`Connection`]
//! implementation and a [`ConnectionFactory`] that opens new ones.
//!
//! ## Features
//!
//! - Keyed checkout: acquiring twice under the same key returns the same connection
//! - Rollback of leftover transactions on return, discard of dead connections
//! - Configurable min/max pool sizes with floor replenishment
//! - Idle timeout eviction, on demand or from a background tokio task
//! - Fail-fast exhaustion instead of queued waiting
//! - Thread-safe and single-threaded facades with the same contract
//! - Registry of shared pools keyed by connection string
//!
//! ## Example
//!
//! ```rust,ignore
//! use kpool::{ConnectionPool, PoolConfig, ThreadedPool};
//!
//! let config = PoolConfig::new()
//!     .min_connections(2)
//!     .max_connections(20)
//!     .idle_timeout(Duration::from_secs(300));
//!
//! let pool = ThreadedPool::new(config, move || Backend::connect(&dsn))?;
//! let conn = pool.get()?;
//! // Use connection...
//! pool.put(conn)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod pool_core;
#[cfg(feature = "pruner")]
pub mod pruner;
pub mod registry;

pub use clock::{Clock, SystemClock};
pub use config::PoolConfig;
pub use connection::{
    Connection, ConnectionFactory, DiscardReason, Handle, HandleId, Recycle, TransactionStatus,
};
pub use error::{BoxError, PoolError};
pub use pool::{ConnectionPool, SimplePool, ThreadedPool};
pub use pool_core::{CloseFailure, CloseReport, Key, PoolCore, PoolStatus, PruneReport};
#[cfg(feature = "pruner")]
pub use pruner::{PrunerHandle, spawn_pruner};
pub use registry::PoolRegistry;
