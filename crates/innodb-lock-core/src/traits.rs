//! Core traits for lock engines.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::LockResult;
use crate::options::AcquireOptions;

// ============================================================================
// Lock Engine Trait
// ============================================================================

/// An engine that grants exclusive use of named locks.
///
/// An engine instance is owned by a single thread of control. Concurrency
/// between holders comes from separate processes (or hosts), each with its
/// own engine instance. Engines can be layered: a database engine wraps an
/// inner engine (for example the file system engine or the
/// [`NullEngine`](crate::NullEngine)), acquires from it first and releases
/// from it last.
///
/// # Example
///
/// ```rust,ignore
/// use innodb_lock_core::{AcquireOptions, LockEngine};
///
/// async fn nightly_report(engine: &mut impl LockEngine) -> LockResult<()> {
///     engine.acquire("nightly-report", AcquireOptions::non_blocking()).await?;
///     let outcome = build_report().await;
///     engine.release("nightly-report").await?;
///     outcome
/// }
/// ```
pub trait LockEngine: Send {
    /// Acquires `name`.
    ///
    /// Acquiring a name this engine already holds is always rejected: with a
    /// non-blocking-lock error when `options` asks for a blocking acquire,
    /// with a deadlock error otherwise.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Lock acquired
    /// * `Err(LockError::NonBlockingLock)` - Contended and out of retries
    /// * `Err(LockError::Deadlock)` - Backend deadlock, or self-deadlock
    /// * `Err(LockError::WaitTimeout)` - Backend wait ceiling exceeded
    fn acquire(
        &mut self,
        name: &str,
        options: AcquireOptions,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Releases `name`.
    ///
    /// Releasing a name that is not held is a caller bug and fails with
    /// [`LockError::NotHeld`](crate::LockError::NotHeld), except for
    /// engines whose artifacts can be removed by concurrent housekeeping.
    fn release(&mut self, name: &str) -> impl Future<Output = LockResult<()>> + Send;

    /// Releases everything this engine holds and disconnects.
    ///
    /// Keeps going when individual releases fail and reports at most one
    /// error at the end. Meant for process recycling paths.
    fn release_all(&mut self) -> impl Future<Output = LockResult<()>> + Send;

    /// Removes stale lock artifacts without touching held locks.
    ///
    /// Meant to be called periodically by a scheduler.
    fn unused_locks_remove(&mut self) -> impl Future<Output = LockResult<()>> + Send;

    /// Fails with an integrity error when the session backing `name` is gone.
    fn assert_connected(&mut self, name: &str) -> impl Future<Output = LockResult<()>> + Send {
        let _ = name;
        async { Ok(()) }
    }

    /// Rolls back open sessions and drops them, releasing the inner locks
    /// taken for the locks those sessions held.
    fn disconnect(&mut self) -> impl Future<Output = LockResult<()>> + Send {
        async { Ok(()) }
    }

    /// Returns whether this engine currently holds `name`.
    fn is_held(&self, name: &str) -> bool;

    /// Returns the names currently held, oldest first.
    fn held_locks(&self) -> Vec<String>;

    /// Directory used for on-disk lock artifacts.
    fn locks_path(&self) -> PathBuf {
        std::env::temp_dir()
    }
}

// ============================================================================
// Convenience Extensions
// ============================================================================

/// Extension trait providing shorthand acquire variants.
pub trait LockEngineExt: LockEngine {
    /// Acquires `name`, waiting for as long as the backend allows.
    fn acquire_blocking(&mut self, name: &str) -> impl Future<Output = LockResult<()>> + Send {
        self.acquire(name, AcquireOptions::blocking())
    }

    /// Attempts `name` once, then `retries` more times `retry_delay` apart.
    fn acquire_non_blocking(
        &mut self,
        name: &str,
        retries: u32,
        retry_delay: Duration,
    ) -> impl Future<Output = LockResult<()>> + Send {
        self.acquire(
            name,
            AcquireOptions::non_blocking()
                .with_retries(retries)
                .with_retry_delay(retry_delay),
        )
    }
}

// Blanket implementation for all LockEngines
impl<T: LockEngine> LockEngineExt for T {}
