//! Lazily opened metadata session shared by the locks of one engine.

use tracing::warn;

use innodb_lock_core::error::{LockError, LockResult};
use innodb_lock_core::process;

use crate::record::LockRecord;
use crate::session::{DbError, LockSession, SessionProvider};

pub(crate) struct MetadataStore<S> {
    session: Option<S>,
}

impl<S: LockSession> MetadataStore<S> {
    pub(crate) fn new() -> Self {
        Self { session: None }
    }

    /// Returns a live session, replacing a stale one.
    async fn session<P>(&mut self, provider: &P) -> LockResult<&mut S>
    where
        P: SessionProvider<Session = S>,
    {
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.ping().await {
                warn!(error = %e, "metadata session is gone, reconnecting");
                if let Some(stale) = self.session.take() {
                    stale.close().await;
                }
            }
        }

        if self.session.is_none() {
            self.session = Some(provider.open_metadata_session().await?);
        }

        self.session
            .as_mut()
            .ok_or_else(|| LockError::Config("metadata session unavailable".to_string()))
    }

    pub(crate) async fn write<P>(&mut self, provider: &P, record: &LockRecord) -> LockResult<()>
    where
        P: SessionProvider<Session = S>,
    {
        Ok(self.session(provider).await?.write_metadata(record).await?)
    }

    pub(crate) async fn delete<P>(&mut self, provider: &P, name: &str) -> LockResult<()>
    where
        P: SessionProvider<Session = S>,
    {
        Ok(self.session(provider).await?.delete_metadata(name).await?)
    }

    pub(crate) async fn read<P>(&mut self, provider: &P, name: &str) -> LockResult<Option<LockRecord>>
    where
        P: SessionProvider<Session = S>,
    {
        Ok(self.session(provider).await?.read_metadata(name).await?)
    }

    pub(crate) async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// Diagnostic context for errors about `name`.
    ///
    /// With `read_holder`, appends the current holder's record. Failing to
    /// read it is logged, never reported.
    pub(crate) async fn process_info<P>(
        &mut self,
        provider: &P,
        name: &str,
        connection_id: Option<u64>,
        read_holder: bool,
    ) -> String
    where
        P: SessionProvider<Session = S>,
    {
        let connection_id = connection_id.map_or_else(|| "null".to_string(), |id| id.to_string());
        let mut info = format!(
            "{} MySQL host: {} MySQL connection ID: {}",
            process::describe(),
            provider.host(),
            connection_id
        );

        if read_holder {
            match self.read(provider, name).await {
                Ok(Some(holder)) => {
                    info.push_str("\n***Lock holder***: ");
                    info.push_str(&holder.to_string());
                }
                Ok(None) => {}
                Err(e) => warn!(lock.name = %name, error = %e, "failed to read lock holder"),
            }
        }

        info
    }

    /// Translates a failed row claim into the lock error reported to callers.
    ///
    /// A lock wait timeout under a non-blocking acquire means the lock is
    /// busy; under a blocking one it means the server's own ceiling was hit.
    pub(crate) async fn claim_error<P>(
        &mut self,
        provider: &P,
        name: &str,
        connection_id: u64,
        blocking: bool,
        error: DbError,
    ) -> LockError
    where
        P: SessionProvider<Session = S>,
    {
        if error.is_lock_wait_timeout() {
            let context = self
                .process_info(provider, name, Some(connection_id), true)
                .await;
            if blocking {
                return LockError::WaitTimeout {
                    name: name.to_string(),
                    context,
                    source: Some(Box::new(error)),
                };
            }
            return LockError::non_blocking(name, "Non-blocking MySQL lock", context)
                .with_source(error);
        }

        if error.is_deadlock() {
            let context = self
                .process_info(provider, name, Some(connection_id), false)
                .await;
            return LockError::deadlock(name, format!("MySQL deadlock. {error}"), context)
                .with_source(error);
        }

        error.into()
    }
}
