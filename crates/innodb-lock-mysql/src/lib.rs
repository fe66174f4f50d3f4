//! MySQL backend for innodb-lock.
//!
//! A lock is an uncommitted write to a row of the `locks` table. InnoDB
//! keeps the row locked until the writing transaction ends, so holding a
//! lock means keeping a transaction open and releasing it means rolling
//! the transaction back. Nothing is ever committed to `locks`.
//!
//! Two engines are provided:
//!
//! - [`MySqlLockEngine`] opens one session per lock. Locks are released in
//!   any order.
//! - [`MySqlFiloLockEngine`] nests every lock in a savepoint of a single
//!   session. Locks are released first in, last out.
//!
//! Both record who holds each lock in the `locks_metadata` table, through a
//! separate autocommit session, so that contention errors can name the
//! holder.

pub mod connection;
pub mod filo;
mod metadata;
pub mod order;
pub mod plain;
pub mod record;
pub mod schema;
pub mod session;
pub mod stack;
pub mod watchdog;

pub use connection::{MySqlSession, MySqlSessionProvider};
pub use filo::MySqlFiloLockEngine;
pub use order::AcquisitionOrder;
pub use plain::MySqlLockEngine;
pub use record::LockRecord;
pub use session::{DbError, DbResult, LockSession, SessionProvider};
pub use stack::{LockStack, SavepointId};
pub use watchdog::TimeoutWatchdog;
