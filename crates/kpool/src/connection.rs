//! Connection handles and the factory that opens them.
//!
//! The pool never looks inside a connection. It only needs to know whether the
//! connection is still open, what state its transaction is in, and how to
//! roll that transaction back or close the connection outright. Everything
//! else (wire protocol, authentication, queries) belongs to the driver that
//! implements [`Connection`].
//!
//! A checked-out connection is shared between the borrower and the pool, so
//! that [`close_all`](crate::pool_core::PoolCore::close_all) can shut it down even
//! while it is borrowed. [`Connection`] methods therefore take `&self`;
//! drivers use interior mutability where they need it.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use crate::error::BoxError;

/// Transaction state reported by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// No transaction in progress; safe to hand out as-is.
    Idle,
    /// A command is currently executing.
    Active,
    /// Inside a transaction block.
    InTransaction,
    /// Inside a failed transaction block.
    InError,
    /// Connection state cannot be determined; the server link is presumed lost.
    Unknown,
}

impl TransactionStatus {
    /// Check if the connection can be reused without a rollback.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Short lowercase name, used in log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::InTransaction => "in_transaction",
            Self::InError => "in_error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capabilities the pool needs from a backend connection.
pub trait Connection {
    /// Close the connection, releasing its server-side resources.
    fn close(&self) -> Result<(), BoxError>;

    /// Check if the connection has been closed, by either side.
    fn is_closed(&self) -> bool;

    /// Report the current transaction state.
    fn transaction_status(&self) -> TransactionStatus;

    /// Abort any open transaction and return to [`TransactionStatus::Idle`].
    fn rollback(&self) -> Result<(), BoxError>;
}

/// Opens new connections on behalf of the pool.
///
/// The factory owns whatever arguments the driver needs (connection string,
/// credentials, options) and forwards them unchanged on every call. Any
/// closure returning `Result<C, E>` is a factory:
///
/// ```rust,ignore
/// let dsn = String::from("host=db1 dbname=app");
/// let pool = ThreadedPool::new(config, move || MyConnection::open(&dsn))?;
/// ```
pub trait ConnectionFactory {
    /// Connection type produced by this factory.
    type Connection: Connection;

    /// Open a new live connection.
    fn connect(&self) -> Result<Self::Connection, BoxError>;
}

impl<F, C, E> ConnectionFactory for F
where
    F: Fn() -> Result<C, E>,
    C: Connection,
    E: Into<BoxError>,
{
    type Connection = C;

    fn connect(&self) -> Result<C, BoxError> {
        self().map_err(Into::into)
    }
}

/// Pool-assigned identity of a connection.
///
/// Ids are unique within one pool and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pooled connection.
///
/// Cloning a handle is cheap and yields another reference to the same
/// connection. Return it with [`release`](crate::pool::ConnectionPool::release)
/// when done; a handle that is simply dropped stays checked out.
pub struct Handle<C> {
    id: HandleId,
    conn: Arc<C>,
    created_at: Instant,
}

impl<C> Handle<C> {
    pub(crate) fn new(id: HandleId, conn: C, created_at: Instant) -> Self {
        Self {
            id,
            conn: Arc::new(conn),
            created_at,
        }
    }

    /// Identity of this connection within its pool.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// When the pool opened this connection.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Check whether two handles refer to the same connection.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.conn, &other.conn)
    }
}

impl<C> Clone for Handle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            conn: Arc::clone(&self.conn),
            created_at: self.created_at,
        }
    }
}

impl<C> Deref for Handle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Why a connection was dropped by the recycle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The connection was already closed.
    AlreadyClosed,
    /// The transaction state was unknown; the connection was closed.
    StatusUnknown,
    /// Rolling back a leftover transaction failed; the connection was closed.
    RollbackFailed,
}

/// Outcome of the recycle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recycle {
    /// The connection is idle and can be handed out again.
    Reusable,
    /// A leftover transaction was rolled back; the connection is idle again.
    RolledBack,
    /// The connection is unusable and has been closed.
    Discarded(DiscardReason),
}

impl Recycle {
    /// Check if the connection survived the check.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        matches!(self, Self::Reusable | Self::RolledBack)
    }
}

/// Sanitize a connection before it enters or leaves the free list.
///
/// Closed connections are dropped without another `close()`. Connections in an
/// unknown state are closed. Anything else that is not idle is rolled back,
/// and closed if the rollback fails.
pub fn recycle<C: Connection + ?Sized>(conn: &C) -> Recycle {
    if conn.is_closed() {
        return Recycle::Discarded(DiscardReason::AlreadyClosed);
    }

    match conn.transaction_status() {
        TransactionStatus::Idle => Recycle::Reusable,
        TransactionStatus::Unknown => {
            if let Err(e) = conn.close() {
                tracing::warn!(error = %e, "failed to close connection in unknown state");
            }
            Recycle::Discarded(DiscardReason::StatusUnknown)
        }
        status => match conn.rollback() {
            Ok(()) => {
                tracing::debug!(status = %status, "rolled back leftover transaction");
                Recycle::RolledBack
            }
            Err(e) => {
                tracing::warn!(status = %status, error = %e, "rollback failed, closing connection");
                if let Err(e) = conn.close() {
                    tracing::warn!(error = %e, "failed to close connection after rollback failure");
                }
                Recycle::Discarded(DiscardReason::RollbackFailed)
            }
        },
    }
}

/// Close a connection unless it is already closed.
pub(crate) fn close_if_open<C: Connection + ?Sized>(conn: &C) -> Result<bool, BoxError> {
    if conn.is_closed() {
        return Ok(false);
    }
    conn.close()?;
    Ok(true)
}
