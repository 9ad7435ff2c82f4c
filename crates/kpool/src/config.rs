//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Minimum number of connections to maintain.
    ///
    /// This many connections are opened when the pool is built, and the pool
    /// tops itself back up to this floor after every release.
    pub min_connections: u32,

    /// Maximum number of connections checked out at the same time.
    pub max_connections: u32,

    /// Time a connection can sit in the free list before `prune` evicts it.
    ///
    /// [`Duration::ZERO`] disables idle eviction. In that mode the free list
    /// is capped at `min_connections`: surplus connections are closed on
    /// release instead of being parked.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the idle connection timeout. Zero disables idle eviction.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Whether `prune` evicts idle connections.
    #[must_use]
    pub fn idle_eviction_enabled(&self) -> bool {
        !self.idle_timeout.is_zero()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        Ok(())
    }
}
