//! Pool error types.

use thiserror::Error;

/// Boxed error produced by connection factories and connection operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Every connection is checked out and the pool is at capacity.
    #[error("connection pool exhausted ({max} connections in use)")]
    PoolExhausted {
        /// Maximum allowed connections.
        max: u32,
    },

    /// The handle (or key) being released is not checked out from this pool.
    #[error("trying to release a connection the pool does not track")]
    UnknownHandle,

    /// The connection factory failed to open a connection.
    #[error("failed to create connection: {0}")]
    Factory(#[source] BoxError),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Wrap a factory failure.
    pub fn factory(err: impl Into<BoxError>) -> Self {
        Self::Factory(err.into())
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// Exhaustion clears as soon as another caller releases, and factory
    /// failures are usually network hiccups. Closed pools and protocol misuse
    /// never recover.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::Factory(_))
    }
}
