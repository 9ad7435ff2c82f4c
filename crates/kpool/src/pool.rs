//! Pool facades.
//!
//! Both facades expose the same [`ConnectionPool`] contract over a
//! [`PoolCore`]. [`ThreadedPool`] serializes every call behind one mutex and
//! can be shared across threads. [`SimplePool`] skips the lock for callers that
//! keep a pool per thread.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionFactory, Handle};
use crate::error::PoolError;
use crate::pool_core::{CloseReport, Key, PoolCore, PoolStatus, PruneReport};

/// Operations shared by every pool facade.
pub trait ConnectionPool {
    /// Connection type handed out by the pool.
    type Connection: Connection;

    /// Check out a connection, optionally bound to `key`.
    ///
    /// Fails with [`PoolError::PoolExhausted`] instead of waiting when
    /// `max_connections` are already checked out.
    fn acquire(&self, key: Option<Key>) -> Result<Handle<Self::Connection>, PoolError>;

    /// Return a connection, closing it instead of recycling when `force_close`
    /// is set.
    fn release(
        &self,
        handle: Handle<Self::Connection>,
        key: Option<Key>,
        force_close: bool,
    ) -> Result<(), PoolError>;

    /// Evict connections idle for longer than the idle timeout.
    fn prune(&self) -> PruneReport;

    /// Close every connection and refuse further acquires.
    fn close_all(&self) -> CloseReport;

    /// Get the current pool status.
    fn status(&self) -> PoolStatus;

    /// Check out a connection under a fresh pool-generated key.
    fn get(&self) -> Result<Handle<Self::Connection>, PoolError> {
        self.acquire(None)
    }

    /// Check out the connection bound to `key`, opening one if needed.
    fn get_keyed(&self, key: impl Into<Key>) -> Result<Handle<Self::Connection>, PoolError>
    where
        Self: Sized,
    {
        self.acquire(Some(key.into()))
    }

    /// Return a connection for reuse.
    fn put(&self, handle: Handle<Self::Connection>) -> Result<(), PoolError> {
        self.release(handle, None, false)
    }

    /// Return a connection and close it.
    fn discard(&self, handle: Handle<Self::Connection>) -> Result<(), PoolError> {
        self.release(handle, None, true)
    }
}

/// Thread-safe connection pool.
///
/// Every operation holds the pool lock for its full duration, including calls
/// into the connection factory, so all pool mutations are totally ordered.
pub struct ThreadedPool<F: ConnectionFactory> {
    inner: Mutex<PoolCore<F>>,
}

impl<F: ConnectionFactory> ThreadedPool<F> {
    /// Create a pool and open `min_connections` idle connections.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        Ok(Self::from_core(PoolCore::new(config, factory)?))
    }

    /// Create a pool that reads time from `clock`.
    pub fn with_clock(
        config: PoolConfig,
        factory: F,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoolError> {
        Ok(Self::from_core(PoolCore::with_clock(config, factory, clock)?))
    }

    /// Wrap an existing core.
    #[must_use]
    pub fn from_core(core: PoolCore<F>) -> Self {
        Self {
            inner: Mutex::new(core),
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed()
    }

    /// Get a copy of the pool configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.lock().config().clone()
    }

    /// Run `f` against the pool state while holding the lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&PoolCore<F>) -> R) -> R {
        f(&self.inner.lock())
    }
}

impl<F: ConnectionFactory> ConnectionPool for ThreadedPool<F> {
    type Connection = F::Connection;

    fn acquire(&self, key: Option<Key>) -> Result<Handle<F::Connection>, PoolError> {
        self.inner.lock().acquire(key)
    }

    fn release(
        &self,
        handle: Handle<F::Connection>,
        key: Option<Key>,
        force_close: bool,
    ) -> Result<(), PoolError> {
        self.inner.lock().release(handle, key, force_close)
    }

    fn prune(&self) -> PruneReport {
        self.inner.lock().prune()
    }

    fn close_all(&self) -> CloseReport {
        self.inner.lock().close_all()
    }

    fn status(&self) -> PoolStatus {
        self.inner.lock().status()
    }
}

impl<F: ConnectionFactory> fmt::Debug for ThreadedPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedPool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Single-threaded connection pool.
///
/// Same contract as [`ThreadedPool`] without the lock. The pool is `!Sync`;
/// share it across threads and the compiler refuses.
pub struct SimplePool<F: ConnectionFactory> {
    inner: RefCell<PoolCore<F>>,
}

impl<F: ConnectionFactory> SimplePool<F> {
    /// Create a pool and open `min_connections` idle connections.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        Ok(Self::from_core(PoolCore::new(config, factory)?))
    }

    /// Create a pool that reads time from `clock`.
    pub fn with_clock(
        config: PoolConfig,
        factory: F,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoolError> {
        Ok(Self::from_core(PoolCore::with_clock(config, factory, clock)?))
    }

    /// Wrap an existing core.
    #[must_use]
    pub fn from_core(core: PoolCore<F>) -> Self {
        Self {
            inner: RefCell::new(core),
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().is_closed()
    }

    /// Get a copy of the pool configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.borrow().config().clone()
    }

    /// Run `f` against the pool state.
    pub fn inspect<R>(&self, f: impl FnOnce(&PoolCore<F>) -> R) -> R {
        f(&self.inner.borrow())
    }

    /// Unwrap the pool state.
    pub fn into_core(self) -> PoolCore<F> {
        self.inner.into_inner()
    }
}

impl<F: ConnectionFactory> ConnectionPool for SimplePool<F> {
    type Connection = F::Connection;

    fn acquire(&self, key: Option<Key>) -> Result<Handle<F::Connection>, PoolError> {
        self.inner.borrow_mut().acquire(key)
    }

    fn release(
        &self,
        handle: Handle<F::Connection>,
        key: Option<Key>,
        force_close: bool,
    ) -> Result<(), PoolError> {
        self.inner.borrow_mut().release(handle, key, force_close)
    }

    fn prune(&self) -> PruneReport {
        self.inner.borrow_mut().prune()
    }

    fn close_all(&self) -> CloseReport {
        self.inner.borrow_mut().close_all()
    }

    fn status(&self) -> PoolStatus {
        self.inner.borrow().status()
    }
}

impl<F: ConnectionFactory> fmt::Debug for SimplePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimplePool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
