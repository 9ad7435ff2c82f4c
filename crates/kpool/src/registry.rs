//! Registry of shared pools keyed by connection string.
//!
//! Callers that want one pool per backend across a whole process create a
//! single [`PoolRegistry`] at startup and pass it to whoever needs a pool.
//! There is no global instance: the registry lives exactly as long as its
//! owner keeps it, and is torn down with [`PoolRegistry::close_all`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::connection::ConnectionFactory;
use crate::error::PoolError;
use crate::pool::{ConnectionPool, ThreadedPool};
use crate::pool_core::CloseReport;

/// Lazily built, shared [`ThreadedPool`]s indexed by connection string.
pub struct PoolRegistry<F: ConnectionFactory> {
    pools: Mutex<HashMap<String, Arc<ThreadedPool<F>>>>,
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Get the pool for `dsn`, building it on first request.
    ///
    /// `make_factory` receives the connection string and is only called when
    /// no open pool exists for it. A pool that was closed behind the
    /// registry's back is replaced by a fresh one.
    pub fn get_or_create<M>(
        &self,
        dsn: &str,
        config: PoolConfig,
        make_factory: M,
    ) -> Result<Arc<ThreadedPool<F>>, PoolError>
    where
        M: FnOnce(&str) -> F,
    {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(dsn) {
            if !pool.is_closed() {
                return Ok(Arc::clone(pool));
            }
            tracing::debug!(dsn, "replacing closed pool");
        }

        let pool = Arc::new(ThreadedPool::new(config, make_factory(dsn))?);
        pools.insert(dsn.to_owned(), Arc::clone(&pool));
        tracing::info!(dsn, pools = pools.len(), "registered connection pool");
        Ok(pool)
    }

    /// Get the pool for `dsn` if one has been built.
    #[must_use]
    pub fn get(&self, dsn: &str) -> Option<Arc<ThreadedPool<F>>> {
        self.pools.lock().get(dsn).cloned()
    }

    /// Close the pool for `dsn` and forget it.
    pub fn remove(&self, dsn: &str) -> Option<CloseReport> {
        let pool = self.pools.lock().remove(dsn)?;
        tracing::info!(dsn, "removing connection pool");
        Some(pool.close_all())
    }

    /// Close every pool and empty the registry.
    pub fn close_all(&self) -> Vec<(String, CloseReport)> {
        let pools: Vec<_> = self.pools.lock().drain().collect();
        pools
            .into_iter()
            .map(|(dsn, pool)| {
                let report = pool.close_all();
                (dsn, report)
            })
            .collect()
    }

    /// Connection strings with a registered pool.
    #[must_use]
    pub fn dsns(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    /// Check if no pool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }
}

impl<F: ConnectionFactory> Default for PoolRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ConnectionFactory> fmt::Debug for PoolRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("dsns", &self.dsns())
            .finish()
    }
}
