//! Database session capability used by the engines.
//!
//! The engines never talk to a driver directly. They open sessions through
//! a [`SessionProvider`] and drive them through [`LockSession`], which keeps
//! SQL execution and connection setup out of the locking state machine.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use innodb_lock_core::error::{BoxError, LockError, LockResult};

use crate::record::LockRecord;

/// `ER_LOCK_WAIT_TIMEOUT`, SQLSTATE `HY000`.
pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;

/// `ER_LOCK_DEADLOCK`, SQLSTATE `40001`.
pub const ER_LOCK_DEADLOCK: u16 = 1213;

/// Error reported by a database session.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct DbError {
    /// Vendor error number, when the server reported one.
    pub number: Option<u16>,
    pub sqlstate: Option<String>,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl DbError {
    pub fn new(number: Option<u16>, sqlstate: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            number,
            sqlstate: sqlstate.map(str::to_string),
            message: message.into(),
            source: None,
        }
    }

    /// Row lock wait exceeded `innodb_lock_wait_timeout`.
    pub fn is_lock_wait_timeout(&self) -> bool {
        self.number == Some(ER_LOCK_WAIT_TIMEOUT)
    }

    /// The server picked this transaction as a deadlock victim.
    pub fn is_deadlock(&self) -> bool {
        self.number == Some(ER_LOCK_DEADLOCK)
    }
}

impl From<DbError> for LockError {
    fn from(error: DbError) -> Self {
        LockError::Backend(Box::new(error))
    }
}

/// Result type for session operations.
pub type DbResult<T> = Result<T, DbError>;

// ============================================================================
// Session Traits
// ============================================================================

/// One open database session.
///
/// Lock sessions run a single long transaction whose uncommitted row writes
/// are the locks. Metadata sessions run in autocommit mode.
pub trait LockSession: Send {
    /// Server-side id of this connection.
    fn connection_id(&self) -> u64;

    /// Idle time after which the server drops this session (`wait_timeout`).
    fn max_session_lifetime(&self) -> Duration;

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn savepoint(&mut self, savepoint: &str) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback_to_savepoint(&mut self, savepoint: &str)
        -> impl Future<Output = DbResult<()>> + Send;

    /// Sets `innodb_lock_wait_timeout`: effectively infinite when
    /// `blocking`, one second otherwise.
    fn set_lock_wait_timeout(&mut self, blocking: bool) -> impl Future<Output = DbResult<()>> + Send;

    fn set_max_heap_table_size(&mut self, bytes: u64) -> impl Future<Output = DbResult<()>> + Send;

    /// Writes the contention row for `name`, taking its row lock.
    fn claim_row(&mut self, name: &str) -> impl Future<Output = DbResult<()>> + Send;

    fn write_metadata(&mut self, record: &LockRecord) -> impl Future<Output = DbResult<()>> + Send;

    fn delete_metadata(&mut self, name: &str) -> impl Future<Output = DbResult<()>> + Send;

    fn read_metadata(&mut self, name: &str)
        -> impl Future<Output = DbResult<Option<LockRecord>>> + Send;

    /// Round trip to the server.
    fn ping(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Closes the session. The server rolls back anything still open.
    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

/// Opens sessions against one database.
pub trait SessionProvider: Send + Sync {
    type Session: LockSession;

    /// Database host, for diagnostics.
    fn host(&self) -> &str;

    /// `max_heap_table_size` applied to savepoint sessions, if configured.
    fn max_heap_table_size(&self) -> Option<u64>;

    /// Opens a session with an open transaction, ready to claim rows.
    fn open_lock_session(&self) -> impl Future<Output = LockResult<Self::Session>> + Send;

    /// Opens an autocommit session for lock metadata.
    fn open_metadata_session(&self) -> impl Future<Output = LockResult<Self::Session>> + Send;
}
