//! Pool bookkeeping and the acquire/release/prune/close algorithms.
//!
//! [`PoolCore`] assumes exclusive access (`&mut self` everywhere). Wrap it in
//! one of the facades from [`crate::pool`] rather than sharing it directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::PoolConfig;
use crate::connection::{ConnectionFactory, Handle, HandleId, Recycle, close_if_open, recycle};
use crate::error::{BoxError, PoolError};

/// Identifies one borrower of a checked-out connection.
///
/// Acquiring again with a key that is already checked out returns the same
/// connection instead of a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Key synthesized by the pool for anonymous acquires.
    Auto(u64),
    /// Key supplied by the caller.
    Named(Arc<str>),
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Named(Arc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Named(Arc::from(name))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto(n) => write!(f, "auto:{n}"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Configured floor.
    pub min: u32,
    /// Maximum allowed connections.
    pub max: u32,
    /// Whether `close_all` has run.
    pub closed: bool,
}

impl PoolStatus {
    /// Checked-out connections as a percentage of `max`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// A connection that could not be closed cleanly.
#[derive(Debug)]
pub struct CloseFailure {
    /// Connection that failed to close.
    pub id: HandleId,
    /// Error reported by the driver.
    pub error: BoxError,
}

/// Result of closing every connection in a pool.
///
/// Closing is best-effort: one connection failing to close never stops the
/// others, and the failures are collected here instead of being raised.
#[derive(Debug, Default)]
pub struct CloseReport {
    /// Connections closed by this call.
    pub closed: usize,
    /// Connections that raised an error while closing.
    pub failures: Vec<CloseFailure>,
}

impl CloseReport {
    /// Check if every close succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of an idle-eviction pass.
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Connections removed from the free list.
    pub evicted: usize,
    /// Evicted connections that raised an error while closing.
    pub failures: Vec<CloseFailure>,
}

/// Single-threaded pool state.
pub struct PoolCore<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    clock: Arc<dyn Clock>,
    /// Idle connections, most recently returned last.
    free: Vec<Handle<F::Connection>>,
    in_use: HashMap<Key, Handle<F::Connection>>,
    key_of: HashMap<HandleId, Key>,
    /// Entries exist only for connections in `free`.
    returned_at: HashMap<HandleId, Instant>,
    closed: bool,
    next_key: u64,
    next_id: u64,
}

impl<F: ConnectionFactory> PoolCore<F> {
    /// Create a pool and open `min_connections` idle connections.
    ///
    /// A factory failure while opening the initial connections is logged and
    /// leaves the pool below its floor; later releases top it back up.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        Self::with_clock(config, factory, Arc::new(SystemClock))
    }

    /// Create a pool that reads time from `clock`.
    pub fn with_clock(
        config: PoolConfig,
        factory: F,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let mut core = Self {
            config,
            factory,
            clock,
            free: Vec::new(),
            in_use: HashMap::new(),
            key_of: HashMap::new(),
            returned_at: HashMap::new(),
            closed: false,
            next_key: 0,
            next_id: 0,
        };
        core.replenish();

        tracing::info!(
            min = core.config.min_connections,
            max = core.config.max_connections,
            idle_timeout = ?core.config.idle_timeout,
            idle = core.free.len(),
            "connection pool created"
        );
        Ok(core)
    }

    /// Check out a connection.
    ///
    /// A `key` that is already checked out returns the same connection again.
    /// Otherwise the most recently returned idle connection is reused, or a new
    /// one is opened if fewer than `max_connections` are in use.
    pub fn acquire(&mut self, key: Option<Key>) -> Result<Handle<F::Connection>, PoolError> {
        if self.closed {
            return Err(PoolError::PoolClosed);
        }

        if let Some(handle) = key.as_ref().and_then(|k| self.in_use.get(k)) {
            tracing::trace!(handle_id = %handle.id(), "key already holds a connection");
            return Ok(handle.clone());
        }

        let handle = match self.take_idle() {
            Some(handle) => handle,
            None => {
                if self.in_use.len() >= self.max() {
                    tracing::debug!(
                        in_use = self.in_use.len(),
                        max = self.config.max_connections,
                        "connection pool exhausted"
                    );
                    return Err(PoolError::PoolExhausted {
                        max: self.config.max_connections,
                    });
                }
                self.open()?
            }
        };

        let key = key.unwrap_or_else(|| self.synthesize_key());
        tracing::trace!(handle_id = %handle.id(), key = %key, "connection checked out");

        self.key_of.insert(handle.id(), key.clone());
        self.in_use.insert(key, handle.clone());
        Ok(handle)
    }

    /// Return a checked-out connection.
    ///
    /// The connection is closed when `force_close` is set, when the pool is
    /// closed, when idle eviction is disabled and the free list already holds
    /// `min_connections`, or when it fails the recycle check. Otherwise it is
    /// parked in the free list. Afterwards the pool opens new idle
    /// connections until it is back at its floor.
    pub fn release(
        &mut self,
        handle: Handle<F::Connection>,
        key: Option<Key>,
        force_close: bool,
    ) -> Result<(), PoolError> {
        // Ids are only unique per pool, so match the connection itself too.
        let resolved = key
            .or_else(|| self.key_of.get(&handle.id()).cloned())
            .filter(|key| {
                self.in_use
                    .get(key)
                    .is_some_and(|held| held.same_connection(&handle))
            });

        let Some(key) = resolved else {
            if self.closed {
                tracing::trace!(handle_id = %handle.id(), "ignoring release of untracked connection on closed pool");
                return Ok(());
            }
            return Err(PoolError::UnknownHandle);
        };

        self.in_use.remove(&key);
        self.key_of.remove(&handle.id());

        let surplus = !self.config.idle_eviction_enabled() && self.free.len() >= self.min();
        if force_close || self.closed || surplus {
            tracing::debug!(
                handle_id = %handle.id(),
                force_close,
                closed = self.closed,
                surplus,
                "closing returned connection"
            );
            self.discard(&handle);
        } else {
            match recycle(&*handle) {
                Recycle::Discarded(reason) => {
                    tracing::debug!(handle_id = %handle.id(), ?reason, "returned connection discarded");
                }
                _ => {
                    tracing::trace!(handle_id = %handle.id(), key = %key, "connection returned to pool");
                    self.park(handle);
                }
            }
        }

        if !self.closed {
            self.replenish();
        }
        Ok(())
    }

    /// Close idle connections that have sat in the free list for at least
    /// `idle_timeout`.
    ///
    /// Does nothing when idle eviction is disabled or the pool is closed.
    /// Checked-out connections are never touched.
    pub fn prune(&mut self) -> PruneReport {
        let mut report = PruneReport::default();
        if self.closed || !self.config.idle_eviction_enabled() {
            return report;
        }

        let now = self.clock.now();
        let timeout = self.config.idle_timeout;
        let returned_at = &self.returned_at;
        let (expired, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.free).into_iter().partition(|handle| {
                returned_at
                    .get(&handle.id())
                    .is_some_and(|since| now.saturating_duration_since(*since) >= timeout)
            });
        self.free = kept;

        for handle in expired {
            self.returned_at.remove(&handle.id());
            report.evicted += 1;
            if let Err(error) = close_if_open(&*handle) {
                tracing::warn!(handle_id = %handle.id(), error = %error, "failed to close idle connection");
                report.failures.push(CloseFailure {
                    id: handle.id(),
                    error,
                });
            }
        }

        if report.evicted > 0 {
            tracing::debug!(
                evicted = report.evicted,
                idle = self.free.len(),
                "pruned idle connections"
            );
        }
        report
    }

    /// Close every connection, idle or checked out, and mark the pool closed.
    ///
    /// Borrowers still holding a handle see it closed under them. Calling this
    /// again is harmless: connections that are already closed are skipped.
    /// The free list and in-use map are left populated for inspection.
    pub fn close_all(&mut self) -> CloseReport {
        let mut report = CloseReport::default();

        for handle in self.free.iter().chain(self.in_use.values()) {
            match close_if_open(&**handle) {
                Ok(true) => report.closed += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(handle_id = %handle.id(), error = %error, "failed to close connection");
                    report.failures.push(CloseFailure {
                        id: handle.id(),
                        error,
                    });
                }
            }
        }

        if !self.closed {
            self.closed = true;
            tracing::info!(
                closed = report.closed,
                failures = report.failures.len(),
                "connection pool closed"
            );
        }
        report
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let available = count(self.free.len());
        let in_use = count(self.in_use.len());
        PoolStatus {
            available,
            in_use,
            total: available.saturating_add(in_use),
            min: self.config.min_connections,
            max: self.config.max_connections,
            closed: self.closed,
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Ids of the idle connections, oldest return first.
    #[must_use]
    pub fn idle_ids(&self) -> Vec<HandleId> {
        self.free.iter().map(Handle::id).collect()
    }

    /// Ids of the checked-out connections, in no particular order.
    #[must_use]
    pub fn in_use_ids(&self) -> Vec<HandleId> {
        self.in_use.values().map(Handle::id).collect()
    }

    /// When an idle connection was returned to the free list.
    #[must_use]
    pub fn idle_since(&self, id: HandleId) -> Option<Instant> {
        self.returned_at.get(&id).copied()
    }

    /// Key a checked-out connection is held under.
    #[must_use]
    pub fn key_of(&self, id: HandleId) -> Option<&Key> {
        self.key_of.get(&id)
    }

    fn max(&self) -> usize {
        self.config.max_connections as usize
    }

    fn min(&self) -> usize {
        self.config.min_connections as usize
    }

    fn synthesize_key(&mut self) -> Key {
        let key = Key::Auto(self.next_key);
        self.next_key += 1;
        key
    }

    fn open(&mut self) -> Result<Handle<F::Connection>, PoolError> {
        let conn = self.factory.connect().map_err(PoolError::Factory)?;
        let id = HandleId(self.next_id);
        self.next_id += 1;
        tracing::debug!(handle_id = %id, "opened new connection");
        Ok(Handle::new(id, conn, self.clock.now()))
    }

    /// Pop idle connections until one passes the recycle check.
    fn take_idle(&mut self) -> Option<Handle<F::Connection>> {
        while let Some(handle) = self.free.pop() {
            self.returned_at.remove(&handle.id());
            match recycle(&*handle) {
                Recycle::Discarded(reason) => {
                    tracing::debug!(handle_id = %handle.id(), ?reason, "discarded stale idle connection");
                }
                _ => return Some(handle),
            }
        }
        None
    }

    fn park(&mut self, handle: Handle<F::Connection>) {
        self.returned_at.insert(handle.id(), self.clock.now());
        self.free.push(handle);
    }

    fn discard(&self, handle: &Handle<F::Connection>) {
        if let Err(error) = close_if_open(&**handle) {
            tracing::warn!(handle_id = %handle.id(), error = %error, "failed to close connection");
        }
    }

    /// Open idle connections until the pool is back at `min_connections`.
    fn replenish(&mut self) {
        while self.free.len() + self.in_use.len() < self.min() {
            match self.open() {
                Ok(handle) => self.park(handle),
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        idle = self.free.len(),
                        in_use = self.in_use.len(),
                        min = self.config.min_connections,
                        "failed to replenish connection pool"
                    );
                    break;
                }
            }
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PoolCore<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolCore")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::{Connection, TransactionStatus};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    struct StubConn {
        closed: Cell<bool>,
        status: Cell<TransactionStatus>,
    }

    impl Connection for StubConn {
        fn close(&self) -> Result<(), BoxError> {
            self.closed.set(true);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.get()
        }

        fn transaction_status(&self) -> TransactionStatus {
            self.status.get()
        }

        fn rollback(&self) -> Result<(), BoxError> {
            self.status.set(TransactionStatus::Idle);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Counter(Rc<Cell<u32>>);

    fn factory(opened: Counter) -> impl Fn() -> Result<StubConn, std::io::Error> {
        move || {
            opened.0.set(opened.0.get() + 1);
            Ok(StubConn {
                closed: Cell::new(false),
                status: Cell::new(TransactionStatus::Idle),
            })
        }
    }

    struct StepClock {
        origin: Instant,
        offset: std::sync::Mutex<Duration>,
    }

    impl StepClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                origin: Instant::now(),
                offset: std::sync::Mutex::new(Duration::ZERO),
            })
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> Instant {
            self.origin + *self.offset.lock().unwrap()
        }
    }

    fn config(min: u32, max: u32) -> PoolConfig {
        PoolConfig::new()
            .min_connections(min)
            .max_connections(max)
            .idle_timeout(Duration::from_secs(60))
    }

    #[test]
    fn test_new_opens_min_connections() {
        let opened = Counter::default();
        let core = PoolCore::new(config(3, 5), factory(opened.clone())).unwrap();

        assert_eq!(opened.0.get(), 3);
        let status = core.status();
        assert_eq!(status.available, 3);
        assert_eq!(status.in_use, 0);
        assert_eq!(core.idle_ids().len(), 3);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = PoolCore::new(config(4, 2), factory(Counter::default()));
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[test]
    fn test_min_zero_max_one_scenario() {
        let mut core = PoolCore::new(config(0, 1), factory(Counter::default())).unwrap();

        let h1 = core.acquire(None).unwrap();
        assert!(matches!(
            core.acquire(None),
            Err(PoolError::PoolExhausted { max: 1 })
        ));

        core.release(h1.clone(), None, false).unwrap();
        assert_eq!(core.idle_ids(), vec![h1.id()]);

        let again = core.acquire(None).unwrap();
        assert!(again.same_connection(&h1));

        core.close_all();
        assert!(h1.is_closed());
        assert!(matches!(core.acquire(None), Err(PoolError::PoolClosed)));
    }

    #[test]
    fn test_keyed_acquire_is_idempotent() {
        let opened = Counter::default();
        let mut core = PoolCore::new(config(0, 2), factory(opened.clone())).unwrap();

        let a = core.acquire(Some("worker".into())).unwrap();
        let b = core.acquire(Some("worker".into())).unwrap();

        assert!(a.same_connection(&b));
        assert_eq!(opened.0.get(), 1);
        assert_eq!(core.status().in_use, 1);
        assert_eq!(core.key_of(a.id()), Some(&Key::from("worker")));
    }

    #[test]
    fn test_auto_keys_are_not_reused() {
        let mut core = PoolCore::new(config(0, 2), factory(Counter::default())).unwrap();

        let first = core.acquire(None).unwrap();
        let first_key = core.key_of(first.id()).cloned().unwrap();
        core.release(first, None, false).unwrap();

        let second = core.acquire(None).unwrap();
        let second_key = core.key_of(second.id()).cloned().unwrap();

        assert_eq!(first_key, Key::Auto(0));
        assert_eq!(second_key, Key::Auto(1));
    }

    #[test]
    fn test_release_rolls_back_open_transaction() {
        let mut core = PoolCore::new(config(0, 1), factory(Counter::default())).unwrap();

        let handle = core.acquire(None).unwrap();
        handle.status.set(TransactionStatus::InTransaction);
        core.release(handle, None, false).unwrap();

        let handle = core.acquire(None).unwrap();
        assert_eq!(handle.transaction_status(), TransactionStatus::Idle);
        assert!(!handle.is_closed());
    }

    #[test]
    fn test_release_unknown_handle() {
        let mut core = PoolCore::new(config(0, 2), factory(Counter::default())).unwrap();

        let handle = core.acquire(None).unwrap();
        core.release(handle.clone(), None, false).unwrap();

        assert!(matches!(
            core.release(handle, None, false),
            Err(PoolError::UnknownHandle)
        ));
    }

    #[test]
    fn test_release_with_mismatched_key() {
        let mut core = PoolCore::new(config(0, 2), factory(Counter::default())).unwrap();

        let a = core.acquire(Some("a".into())).unwrap();
        let _b = core.acquire(Some("b".into())).unwrap();

        assert!(matches!(
            core.release(a, Some("b".into()), false),
            Err(PoolError::UnknownHandle)
        ));
        assert_eq!(core.status().in_use, 2);
    }

    #[test]
    fn test_release_force_close_replenishes_floor() {
        let opened = Counter::default();
        let mut core = PoolCore::new(config(1, 2), factory(opened.clone())).unwrap();

        let handle = core.acquire(None).unwrap();
        core.release(handle.clone(), None, true).unwrap();

        assert!(handle.is_closed());
        assert_eq!(opened.0.get(), 2);
        assert_eq!(core.status().available, 1);
        assert!(!core.idle_ids().contains(&handle.id()));
    }

    #[test]
    fn test_zero_idle_timeout_caps_free_list() {
        let cfg = config(1, 3).idle_timeout(Duration::ZERO);
        let mut core = PoolCore::new(cfg, factory(Counter::default())).unwrap();

        let a = core.acquire(None).unwrap();
        let b = core.acquire(None).unwrap();
        core.release(a.clone(), None, false).unwrap();
        core.release(b.clone(), None, false).unwrap();

        assert!(!a.is_closed());
        assert!(b.is_closed());
        assert_eq!(core.status().available, 1);
    }

    #[test]
    fn test_prune_boundary() {
        let clock = StepClock::new();
        let mut core =
            PoolCore::with_clock(config(0, 2), factory(Counter::default()), clock.clone())
                .unwrap();

        let handle = core.acquire(None).unwrap();
        core.release(handle.clone(), None, false).unwrap();

        clock.advance(Duration::from_secs(60) - Duration::from_millis(1));
        assert_eq!(core.prune().evicted, 0);
        assert_eq!(core.idle_ids(), vec![handle.id()]);

        clock.advance(Duration::from_millis(1));
        assert_eq!(core.prune().evicted, 1);
        assert!(core.idle_ids().is_empty());
        assert!(core.idle_since(handle.id()).is_none());
        assert!(handle.is_closed());
    }

    #[test]
    fn test_prune_never_touches_in_use() {
        let clock = StepClock::new();
        let mut core =
            PoolCore::with_clock(config(0, 2), factory(Counter::default()), clock.clone())
                .unwrap();

        let held = core.acquire(None).unwrap();
        clock.advance(Duration::from_secs(3600));
        core.prune();

        assert!(!held.is_closed());
        assert_eq!(core.in_use_ids(), vec![held.id()]);
    }

    #[test]
    fn test_close_all_is_idempotent() {
        let mut core = PoolCore::new(config(2, 3), factory(Counter::default())).unwrap();
        let held = core.acquire(None).unwrap();

        let first = core.close_all();
        assert_eq!(first.closed, 2);
        assert!(first.is_clean());
        assert!(held.is_closed());

        let second = core.close_all();
        assert_eq!(second.closed, 0);
        assert!(core.is_closed());
        assert_eq!(core.status().in_use, 1);
    }

    #[test]
    fn test_release_after_close_is_honoured() {
        let mut core = PoolCore::new(config(0, 2), factory(Counter::default())).unwrap();
        let handle = core.acquire(None).unwrap();

        core.close_all();
        core.release(handle.clone(), None, false).unwrap();
        assert_eq!(core.status().in_use, 0);

        // A second release on a closed pool is tolerated.
        core.release(handle, None, false).unwrap();
    }

    #[test]
    fn test_factory_failure_leaves_state_unchanged() {
        let fail = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&fail);
        let mut core = PoolCore::new(config(0, 2), move || {
            if *flag.borrow() {
                Err(std::io::Error::other("refused"))
            } else {
                Ok(StubConn {
                    closed: Cell::new(false),
                    status: Cell::new(TransactionStatus::Idle),
                })
            }
        })
        .unwrap();

        *fail.borrow_mut() = true;
        assert!(matches!(core.acquire(None), Err(PoolError::Factory(_))));
        assert_eq!(core.status().total, 0);

        *fail.borrow_mut() = false;
        let handle = core.acquire(None).unwrap();
        assert_eq!(core.key_of(handle.id()), Some(&Key::Auto(0)));
    }
}
