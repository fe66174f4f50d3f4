//! Database lock engine nesting locks in savepoints of one transaction.

use std::path::PathBuf;

use tracing::{instrument, warn};

use innodb_lock_core::error::{LockError, LockResult};
use innodb_lock_core::null::NullEngine;
use innodb_lock_core::options::{AcquireOptions, RetryBudget};
use innodb_lock_core::traits::LockEngine;

use crate::metadata::MetadataStore;
use crate::record::LockRecord;
use crate::schema::validate_lock_name;
use crate::session::{LockSession, SessionProvider};
use crate::stack::{LockStack, SavepointId, StackEntry};

/// Exclusive named locks on InnoDB row locks, all on one session.
///
/// Every acquire opens a savepoint before claiming its row, and a release
/// rolls back to the savepoint of the released lock. Rolling back to a
/// savepoint also undoes everything claimed after it, so locks must be
/// released first in, last out:
///
/// - In strict mode (the default) releasing a lock that is not the most
///   recent one fails with an integrity error and nothing is released.
/// - In relaxed mode the release also releases every lock acquired after it.
///
/// When the last lock is released the transaction is rolled back and a new
/// one begins on the same session.
pub struct MySqlFiloLockEngine<P: SessionProvider, W: LockEngine = NullEngine> {
    provider: P,
    inner: W,
    strict: bool,
    session: Option<P::Session>,
    stack: LockStack,
    metadata: MetadataStore<P::Session>,
}

impl<P: SessionProvider> MySqlFiloLockEngine<P, NullEngine> {
    /// Creates a strict engine without an inner lock layer.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when the provider has no
    /// `max_heap_table_size`.
    pub fn new(provider: P) -> LockResult<Self> {
        Self::with_inner(provider, NullEngine)
    }
}

impl<P: SessionProvider, W: LockEngine> MySqlFiloLockEngine<P, W> {
    /// Creates a strict engine that locks `inner` first.
    pub fn with_inner(provider: P, inner: W) -> LockResult<Self> {
        if provider.max_heap_table_size().is_none() {
            return Err(LockError::Config(
                "'maxHeapTableSize' property is mandatory in mysql config.".to_string(),
            ));
        }

        Ok(Self {
            provider,
            inner,
            strict: true,
            session: None,
            stack: LockStack::new(),
            metadata: MetadataStore::new(),
        })
    }

    /// Allows out-of-order releases, which release every later lock too.
    pub fn with_strict_order(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    /// Server connection id of the shared session, once opened.
    pub fn connection_id(&self) -> Option<u64> {
        self.session.as_ref().map(LockSession::connection_id)
    }

    async fn process_info(&mut self, name: &str, read_holder: bool) -> String {
        let connection_id = self.connection_id();
        self.metadata
            .process_info(&self.provider, name, connection_id, read_holder)
            .await
    }

    async fn open_session(provider: &P) -> LockResult<P::Session> {
        let mut session = provider.open_lock_session().await?;
        if let Some(bytes) = provider.max_heap_table_size() {
            if let Err(e) = session.set_max_heap_table_size(bytes).await {
                session.close().await;
                return Err(LockError::Connection(Box::new(e)));
            }
        }
        Ok(session)
    }

    /// Takes the row lock for `name` under a fresh savepoint.
    async fn claim(&mut self, name: &str, options: AcquireOptions) -> LockResult<SavepointId> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => Self::open_session(&self.provider).await?,
        };
        let result = self.claim_on(&mut session, name, options).await;
        self.session = Some(session);
        result
    }

    async fn claim_on(
        &mut self,
        session: &mut P::Session,
        name: &str,
        options: AcquireOptions,
    ) -> LockResult<SavepointId> {
        let savepoint = self.stack.next_savepoint();
        let savepoint_name = savepoint.to_string();
        let connection_id = session.connection_id();

        session.savepoint(&savepoint_name).await?;
        session.set_lock_wait_timeout(options.is_blocking()).await?;

        let mut budget = RetryBudget::new(&options);
        loop {
            let error = match session.claim_row(name).await {
                Ok(()) => break,
                Err(e) => e,
            };

            if let Err(rollback) = session.rollback_to_savepoint(&savepoint_name).await {
                warn!(lock.name = %name, error = %rollback, "safety rollback after failed lock claim failed");
            }

            if !options.is_blocking() && error.is_lock_wait_timeout() {
                if let Some(delay) = budget.next_delay() {
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            let lost = if error.is_deadlock() {
                self.reset_after_deadlock(session).await
            } else {
                Vec::new()
            };

            let mut failure = self
                .metadata
                .claim_error(&self.provider, name, connection_id, options.is_blocking(), error)
                .await;
            if let LockError::Deadlock { reason, .. } = &mut failure {
                if !lost.is_empty() {
                    reason.push_str(&format!(" Locks released by the rollback: {lost:?}"));
                }
            }
            return Err(failure);
        }

        let record = LockRecord::new(name, options.is_blocking(), connection_id);
        if let Err(e) = self.metadata.write(&self.provider, &record).await {
            if let Err(rollback) = session.rollback_to_savepoint(&savepoint_name).await {
                warn!(lock.name = %name, error = %rollback, "rollback after failed metadata write failed");
            }
            return Err(e);
        }

        Ok(savepoint)
    }

    /// A deadlock victim's whole transaction is rolled back by the server,
    /// so every lock on the stack is gone. Forgets them, starts over and
    /// returns their names.
    async fn reset_after_deadlock(&mut self, session: &mut P::Session) -> Vec<String> {
        let lost = self.stack.drain();
        let names: Vec<String> = lost.iter().rev().map(|e| e.name.clone()).collect();
        if !names.is_empty() {
            warn!(locks = ?names, "deadlock rolled back the transaction, held locks were released");
        }
        if let Err(e) = self.forget(&lost).await {
            warn!(error = %e, "cleanup of locks lost to a deadlock failed");
        }

        if let Err(e) = session.rollback().await {
            warn!(error = %e, "rollback after deadlock failed");
        }
        if let Err(e) = session.begin().await {
            warn!(error = %e, "begin after deadlock failed");
        }
        names
    }

    /// Deletes the metadata and releases the inner locks of `entries`.
    ///
    /// Every entry is processed; the first failure is returned.
    async fn forget(&mut self, entries: &[StackEntry]) -> LockResult<()> {
        let mut first_error = None;
        for entry in entries {
            if let Err(e) = self.metadata.delete(&self.provider, &entry.name).await {
                warn!(lock.name = %entry.name, error = %e, "failed to delete lock metadata");
                first_error.get_or_insert(e);
            }
        }
        for entry in entries {
            if let Err(e) = self.inner.release(&entry.name).await {
                warn!(lock.name = %entry.name, error = %e, "failed to release inner lock");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Undoes the session work back to `savepoint`, or the whole transaction
    /// when the stack is now empty.
    async fn roll_back_to(&mut self, savepoint: SavepointId) -> LockResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if self.stack.is_empty() {
            session.rollback().await?;
            session.begin().await?;
        } else {
            session.rollback_to_savepoint(&savepoint.to_string()).await?;
        }
        Ok(())
    }
}

impl<P: SessionProvider, W: LockEngine> LockEngine for MySqlFiloLockEngine<P, W> {
    #[instrument(skip(self, options), fields(lock.name = %name, blocking = options.is_blocking(), backend = "mysql-filo"))]
    async fn acquire(&mut self, name: &str, options: AcquireOptions) -> LockResult<()> {
        validate_lock_name(name)?;

        if self.stack.contains(name) {
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

        self.inner.acquire(name, options).await?;

        match self.claim(name, options).await {
            Ok(savepoint) => {
                self.stack.push(name, savepoint);
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

    #[instrument(skip(self), fields(lock.name = %name, backend = "mysql-filo"))]
    async fn release(&mut self, name: &str) -> LockResult<()> {
        let Some(index) = self.stack.position(name) else {
            let context = self.process_info(name, false).await;
            return Err(LockError::not_held(name, context));
        };

        if self.strict && !self.stack.is_top(index) {
            let context = self.process_info(name, false).await;
            return Err(LockError::integrity(
                name,
                format!(
                    "Cannot release the MySQL lock until subsequent acquired locks are intentionally \
                     released before it due to InnoDB SAVEPOINT rollback limitations. \
                     First in (acquire), last out (release). Locks: {:?}",
                    self.stack.names()
                ),
                context,
            ));
        }

        // Top first; the released lock itself comes last.
        let released = self.stack.unwind_to(index);
        let Some(savepoint) = released.last().map(|entry| entry.savepoint) else {
            return Ok(());
        };

        let mut first_error = None;
        for entry in &released {
            if let Err(e) = self.metadata.delete(&self.provider, &entry.name).await {
                warn!(lock.name = %entry.name, error = %e, "failed to delete lock metadata");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.roll_back_to(savepoint).await {
            warn!(lock.name = %name, error = %e, "rollback on release failed");
            first_error.get_or_insert(e);
        }

        for entry in &released {
            if let Err(e) = self.inner.release(&entry.name).await {
                warn!(lock.name = %entry.name, error = %e, "failed to release inner lock");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn release_all(&mut self) -> LockResult<()> {
        let result = self.disconnect().await;
        let inner = self.inner.disconnect().await;
        result.and(inner)
    }

    async fn unused_locks_remove(&mut self) -> LockResult<()> {
        self.inner.unused_locks_remove().await
    }

    async fn assert_connected(&mut self, name: &str) -> LockResult<()> {
        if !self.stack.contains(name) {
            let context = self.process_info(name, false).await;
            return Err(LockError::not_held(name, context));
        }

        let probe = match self.session.as_mut() {
            Some(session) => session.ping().await.map_err(|e| (e.to_string(), Some(e))),
            None => Err(("MySQL session is not open".to_string(), None)),
        };

        if let Err((reason, source)) = probe {
            let context = self.process_info(name, false).await;
            let error = LockError::integrity(name, reason, context);
            return Err(match source {
                Some(source) => error.with_source(source),
                None => error,
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "mysql-filo"))]
    async fn disconnect(&mut self) -> LockResult<()> {
        let mut first_error = None;

        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "rollback on disconnect failed");
                first_error = Some(e.into());
            }
            session.close().await;
        }

        // Inner locks go last, once the rows are released.
        let entries = self.stack.drain();
        if let Err(e) = self.forget(&entries).await {
            first_error.get_or_insert(e);
        }

        self.metadata.close().await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_held(&self, name: &str) -> bool {
        self.stack.contains(name)
    }

    fn held_locks(&self) -> Vec<String> {
        self.stack.names()
    }

    fn locks_path(&self) -> PathBuf {
        self.inner.locks_path()
    }
}
