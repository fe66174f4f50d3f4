//! Database lock engine with one session per lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;
use tracing::{instrument, warn};

use innodb_lock_core::error::{LockError, LockErrorKind, LockResult};
use innodb_lock_core::null::NullEngine;
use innodb_lock_core::options::{AcquireOptions, RetryBudget};
use innodb_lock_core::traits::LockEngine;

use crate::metadata::MetadataStore;
use crate::order::AcquisitionOrder;
use crate::record::LockRecord;
use crate::schema::validate_lock_name;
use crate::session::{LockSession, SessionProvider};
use crate::watchdog::TimeoutWatchdog;

struct HeldLock<S> {
    session: S,
    connection_id: u64,
}

/// Exclusive named locks on InnoDB row locks, one session per lock.
///
/// Each held lock is an uncommitted `REPLACE` into the `locks` table on a
/// dedicated session; rolling the session back releases it. Locks may be
/// released in any order.
///
/// The engine first takes the lock from its inner engine (for example the
/// file system engine) and releases it from there last. While any lock is
/// held a [`TimeoutWatchdog`] guards against outliving the session.
pub struct MySqlLockEngine<P: SessionProvider, W: LockEngine = NullEngine> {
    provider: P,
    inner: W,
    held: HashMap<String, HeldLock<P::Session>>,
    order: Arc<Mutex<AcquisitionOrder>>,
    metadata: MetadataStore<P::Session>,
    watchdog: TimeoutWatchdog,
}

impl<P: SessionProvider> MySqlLockEngine<P, NullEngine> {
    /// Creates an engine without an inner lock layer.
    pub fn new(provider: P) -> Self {
        Self::with_inner(provider, NullEngine)
    }
}

impl<P: SessionProvider, W: LockEngine> MySqlLockEngine<P, W> {
    /// Creates an engine that locks `inner` first.
    pub fn with_inner(provider: P, inner: W) -> Self {
        Self {
            provider,
            inner,
            held: HashMap::new(),
            order: Arc::new(Mutex::new(AcquisitionOrder::new())),
            metadata: MetadataStore::new(),
            watchdog: TimeoutWatchdog::new(),
        }
    }

    /// Replaces the session lifetime watchdog.
    pub fn with_watchdog(mut self, watchdog: TimeoutWatchdog) -> Self {
        self.watchdog.deactivate();
        self.watchdog = watchdog;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    /// Whether the session lifetime watchdog is running.
    pub fn is_watchdog_active(&self) -> bool {
        self.watchdog.is_active()
    }

    /// Server connection id of the session holding `name`.
    pub fn connection_id(&self, name: &str) -> Option<u64> {
        self.held.get(name).map(|held| held.connection_id)
    }

    fn order(&self) -> std::sync::MutexGuard<'_, AcquisitionOrder> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn process_info(&mut self, name: &str, read_holder: bool) -> String {
        let connection_id = self.connection_id(name);
        self.metadata
            .process_info(&self.provider, name, connection_id, read_holder)
            .await
    }

    /// Opens a session and takes the row lock for `name`.
    async fn claim(
        &mut self,
        name: &str,
        options: AcquireOptions,
    ) -> LockResult<HeldLock<P::Session>> {
        let mut session = self.provider.open_lock_session().await?;
        let connection_id = session.connection_id();

        if let Err(e) = session.set_lock_wait_timeout(options.is_blocking()).await {
            session.close().await;
            return Err(e.into());
        }

        let mut budget = RetryBudget::new(&options);
        loop {
            let error = match session.claim_row(name).await {
                Ok(()) => break,
                Err(e) => e,
            };

            // The failed statement may have left the transaction open.
            if let Err(rollback) = session.rollback().await {
                warn!(lock.name = %name, error = %rollback, "safety rollback after failed lock claim failed");
            }

            if !options.is_blocking() && error.is_lock_wait_timeout() {
                if let Some(delay) = budget.next_delay() {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = session.begin().await {
                        session.close().await;
                        return Err(e.into());
                    }
                    continue;
                }
            }

            session.close().await;
            return Err(self
                .metadata
                .claim_error(&self.provider, name, connection_id, options.is_blocking(), error)
                .await);
        }

        let record = LockRecord::new(name, options.is_blocking(), connection_id);
        if let Err(e) = self.metadata.write(&self.provider, &record).await {
            if let Err(rollback) = session.rollback().await {
                warn!(lock.name = %name, error = %rollback, "rollback after failed metadata write failed");
            }
            session.close().await;
            return Err(e);
        }

        Ok(HeldLock {
            session,
            connection_id,
        })
    }

    /// Rolls back and closes the session of a lock already taken out of
    /// `held`, then forgets the lock.
    ///
    /// Every step runs; the first failure is returned.
    async fn unwind(&mut self, name: &str, held: HeldLock<P::Session>) -> LockResult<()> {
        let HeldLock {
            mut session,
            connection_id,
        } = held;
        let mut first_error = None;

        match session.ping().await {
            Ok(()) => {
                if let Err(e) = session.rollback().await {
                    warn!(lock.name = %name, error = %e, "rollback on release failed");
                    first_error = Some(LockError::from(e));
                }
            }
            Err(e) => {
                let context = self
                    .metadata
                    .process_info(&self.provider, name, Some(connection_id), false)
                    .await;
                warn!(lock.name = %name, error = %e, "lock session lost before release");
                first_error = Some(LockError::integrity(name, e.to_string(), context).with_source(e));
            }
        }

        if let Err(e) = self.metadata.delete(&self.provider, name).await {
            warn!(lock.name = %name, error = %e, "failed to delete lock metadata");
            first_error.get_or_insert(e);
        }

        let now_empty = {
            let mut order = self.order();
            order.remove(name);
            order.is_empty()
        };
        if now_empty {
            self.watchdog.deactivate();
        }

        session.close().await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<P: SessionProvider, W: LockEngine> LockEngine for MySqlLockEngine<P, W> {
    #[instrument(skip(self, options), fields(lock.name = %name, blocking = options.is_blocking(), backend = "mysql"))]
    async fn acquire(&mut self, name: &str, options: AcquireOptions) -> LockResult<()> {
        validate_lock_name(name)?;

        if self.held.contains_key(name) {
            if options.is_blocking() {
                let context = self.process_info(name, true).await;
                return Err(LockError::non_blocking(name, "Non-blocking MySQL lock", context));
            }
            let context = self.process_info(name, false).await;
            return Err(LockError::deadlock(
                name,
                "Deadlock detected. Thread tried to acquire the same MySQL lock without releasing first",
                context,
            ));
        }

        let requested_at = Instant::now();
        self.inner.acquire(name, options).await?;

        match self.claim(name, options).await {
            Ok(held) => {
                let max_lifetime = held.session.max_session_lifetime();
                self.held.insert(name.to_string(), held);
                self.order().push(name, requested_at, max_lifetime);
                self.watchdog.activate(Arc::clone(&self.order));
                Ok(())
            }
            Err(e) => {
                if let Err(inner) = self.inner.release(name).await {
                    warn!(lock.name = %name, error = %inner, "failed to release inner lock after failed acquire");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(lock.name = %name, backend = "mysql"))]
    async fn release(&mut self, name: &str) -> LockResult<()> {
        let result = match self.held.remove(name) {
            Some(held) => self.unwind(name, held).await,
            None => {
                let context = self.process_info(name, false).await;
                Err(LockError::not_held(name, context))
            }
        };

        let inner_release = if result.as_ref().is_err_and(|e| e.kind() == LockErrorKind::NotHeld) {
            Ok(())
        } else {
            self.inner.release(name).await
        };
        let housekeeping = self.inner.unused_locks_remove().await;

        for e in [&inner_release, &housekeeping].into_iter().filter_map(|r| r.as_ref().err()) {
            warn!(lock.name = %name, error = %e, "inner engine failed during release");
        }
        result.and(inner_release).and(housekeeping)
    }

    async fn release_all(&mut self) -> LockResult<()> {
        let result = self.disconnect().await;
        let inner = self.inner.disconnect().await;
        result.and(inner)
    }

    async fn unused_locks_remove(&mut self) -> LockResult<()> {
        // Transactions never commit, so the contention table has nothing to clean.
        self.inner.unused_locks_remove().await
    }

    async fn assert_connected(&mut self, name: &str) -> LockResult<()> {
        let Some(held) = self.held.get_mut(name) else {
            let context = self.process_info(name, false).await;
            return Err(LockError::not_held(name, context));
        };

        if let Err(e) = held.session.ping().await {
            let context = self.process_info(name, false).await;
            return Err(LockError::integrity(name, e.to_string(), context).with_source(e));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "mysql"))]
    async fn disconnect(&mut self) -> LockResult<()> {
        self.watchdog.deactivate();

        let mut first_error = None;
        let names = self.order().names();
        for name in names.iter().rev() {
            let Some(held) = self.held.remove(name) else {
                continue;
            };
            if let Err(e) = self.unwind(name, held).await {
                warn!(lock.name = %name, error = %e, "release failed while disconnecting");
                // Lost sessions are expected here; only report other failures.
                if e.kind() != LockErrorKind::IntegrityFailed {
                    first_error.get_or_insert(e);
                }
            }
            if let Err(e) = self.inner.release(name).await {
                warn!(lock.name = %name, error = %e, "failed to release inner lock while disconnecting");
                first_error.get_or_insert(e);
            }
        }

        self.metadata.close().await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_held(&self, name: &str) -> bool {
        self.held.contains_key(name)
    }

    fn held_locks(&self) -> Vec<String> {
        self.order().names()
    }

    fn locks_path(&self) -> PathBuf {
        self.inner.locks_path()
    }
}
