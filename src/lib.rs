//! Cross-process mutual exclusion on top of InnoDB row locks.
//!
//! A named lock is an uncommitted write to one row of a MySQL table. InnoDB
//! holds the row lock until the writing transaction ends, which gives every
//! process (or host) connected to the same database a shared mutex keyed by
//! name. A file system engine covers the single machine case and can be
//! layered under the database engines.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use innodb_lock::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LockConfig::builder()
//!         .host("db.internal")
//!         .database_name("locks")
//!         .username("locker")
//!         .password("secret")
//!         .build()?;
//!
//!     let provider = MySqlSessionProvider::new(config)?;
//!     provider.ensure_schema().await?;
//!
//!     let mut engine = MySqlLockEngine::new(provider);
//!     engine
//!         .acquire_non_blocking("nightly-report", 3, Duration::from_secs(2))
//!         .await?;
//!
//!     // Critical section
//!
//!     engine.release("nightly-report").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Engines
//!
//! ## MySQL, one session per lock
//!
//! [`MySqlLockEngine`] opens a dedicated session for every lock, so locks
//! are released in any order. A watchdog exits the process before a lock
//! can outlive the server's `wait_timeout`.
//!
//! ## MySQL, savepoints
//!
//! [`MySqlFiloLockEngine`] nests every lock in a savepoint of one session.
//! It needs `maxHeapTableSize` in the configuration and releases locks
//! first in, last out.
//!
//! ## File System
//!
//! [`FileSystemEngine`] holds an exclusive OS file lock per name.
//!
//! ```rust,no_run
//! use innodb_lock::{FileSystemEngine, MySqlLockEngine, MySqlSessionProvider};
//!
//! # fn wire(provider: MySqlSessionProvider) -> Result<(), Box<dyn std::error::Error>> {
//! let files = FileSystemEngine::builder().directory("/var/lock/app").build()?;
//! let engine = MySqlLockEngine::with_inner(provider, files);
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `innodb-lock-core`: engine trait, errors, configuration
//! - `innodb-lock-file`: file system engine
//! - `innodb-lock-mysql`: MySQL engines and the session layer

// Re-export core types and traits
pub use innodb_lock_core::*;

// Re-export file backend
pub use innodb_lock_file::{FileSystemEngine, FileSystemEngineBuilder, HolderInfo};

// Re-export mysql backend
pub use innodb_lock_mysql::{
    DbError, LockRecord, LockSession, MySqlFiloLockEngine, MySqlLockEngine, MySqlSession,
    MySqlSessionProvider, SessionProvider, TimeoutWatchdog,
};
