//! In-memory connection double and its factory.
//!
//! Every connection opened by a [`MockFactory`] reports into one
//! [`MockState`]. The state is an ordinary `Arc` handed to the test, so
//! counters and scripted failures are shared explicitly rather than through
//! hidden globals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use kpool::{BoxError, Connection, ConnectionFactory, TransactionStatus};
use parking_lot::Mutex;
use thiserror::Error;

/// Failures produced by mock connections.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MockError {
    /// The factory was scripted to refuse the connection.
    #[error("mock connection refused (attempt {attempt})")]
    ConnectRefused {
        /// One-based connect attempt number.
        attempt: u64,
    },
    /// Closing was scripted to fail.
    #[error("mock close failed for connection {serial}")]
    CloseFailed {
        /// Serial of the failing connection.
        serial: u64,
    },
    /// Rolling back was scripted to fail.
    #[error("mock rollback failed for connection {serial}")]
    RollbackFailed {
        /// Serial of the failing connection.
        serial: u64,
    },
}

/// Counters and failure switches shared by a factory and its connections.
#[derive(Debug, Default)]
pub struct MockState {
    attempts: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    rollbacks: AtomicU64,
    refuse_next: AtomicU32,
    refuse_all: AtomicBool,
    fail_close: AtomicBool,
    fail_rollback: AtomicBool,
    close_log: Mutex<Vec<u64>>,
}

impl MockState {
    /// Create a fresh shared state.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connections successfully opened.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Calls to `close()` that went through, including repeated ones.
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Successful rollbacks.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Connect attempts, successful or not.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Serials in the order `close()` was called on them.
    #[must_use]
    pub fn close_log(&self) -> Vec<u64> {
        self.close_log.lock().clone()
    }

    /// Refuse the next `count` connect attempts.
    pub fn refuse_next(&self, count: u32) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Refuse every connect attempt until switched off.
    pub fn refuse_all(&self, enabled: bool) {
        self.refuse_all.store(enabled, Ordering::SeqCst);
    }

    /// Make `close()` fail (the connection still ends up closed).
    pub fn fail_close(&self, enabled: bool) {
        self.fail_close.store(enabled, Ordering::SeqCst);
    }

    /// Make `rollback()` fail.
    pub fn fail_rollback(&self, enabled: bool) {
        self.fail_rollback.store(enabled, Ordering::SeqCst);
    }

    fn should_refuse(&self) -> bool {
        if self.refuse_all.load(Ordering::SeqCst) {
            return true;
        }
        self.refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Connection double with scriptable transaction state.
#[derive(Debug)]
pub struct MockConnection {
    serial: u64,
    state: Arc<MockState>,
    closed: AtomicBool,
    status: Mutex<TransactionStatus>,
    closes: AtomicU32,
}

impl MockConnection {
    fn new(serial: u64, state: Arc<MockState>) -> Self {
        Self {
            serial,
            state,
            closed: AtomicBool::new(false),
            status: Mutex::new(TransactionStatus::Idle),
            closes: AtomicU32::new(0),
        }
    }

    /// One-based open order within the factory.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Enter a transaction block, as a query issued by the borrower would.
    pub fn begin(&self) {
        self.set_status(TransactionStatus::InTransaction);
    }

    /// Force a transaction status.
    pub fn set_status(&self, status: TransactionStatus) {
        *self.status.lock() = status;
    }

    /// Simulate the server dropping the connection. No `close()` is recorded.
    pub fn sever(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// How many times `close()` was called on this connection.
    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.close_log.lock().push(self.serial);

        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(MockError::CloseFailed {
                serial: self.serial,
            }
            .into());
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn transaction_status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    fn rollback(&self) -> Result<(), BoxError> {
        if self.state.fail_rollback.load(Ordering::SeqCst) {
            return Err(MockError::RollbackFailed {
                serial: self.serial,
            }
            .into());
        }
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.set_status(TransactionStatus::Idle);
        Ok(())
    }
}

/// Factory producing [`MockConnection`]s that share one [`MockState`].
#[derive(Debug, Clone)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    /// Create a factory with a fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(MockState::new())
    }

    /// Create a factory reporting into an existing state.
    #[must_use]
    pub fn with_state(state: Arc<MockState>) -> Self {
        Self { state }
    }

    /// Shared state of this factory and its connections.
    #[must_use]
    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection, BoxError> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.should_refuse() {
            tracing::trace!(attempt, "mock factory refusing connection");
            return Err(MockError::ConnectRefused { attempt }.into());
        }

        let serial = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConnection::new(serial, Arc::clone(&self.state)))
    }
}
