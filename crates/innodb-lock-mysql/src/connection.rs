//! MySQL sessions over sqlx.

use std::fmt;
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::{Connection, Executor};
use tracing::{debug, instrument, warn};

use innodb_lock_core::config::LockConfig;
use innodb_lock_core::error::{LockError, LockResult};
use innodb_lock_core::process;

use crate::record::LockRecord;
use crate::schema::{CREATE_LOCKS_METADATA_TABLE, CREATE_LOCKS_TABLE, NON_INNODB_LOCKS_TABLE};
use crate::session::{DbError, DbResult, LockSession, SessionProvider};

/// `innodb_lock_wait_timeout` of a blocking acquire (the server maximum).
pub const BLOCKING_LOCK_WAIT_TIMEOUT: u64 = 1_073_741_824;

/// `innodb_lock_wait_timeout` of a non-blocking acquire attempt.
pub const NON_BLOCKING_LOCK_WAIT_TIMEOUT: u64 = 1;

/// Metadata lock wait of lock sessions.
pub const LOCK_SESSION_LOCK_WAIT_TIMEOUT: u64 = 31_536_000;

/// Metadata lock wait of the metadata session.
pub const METADATA_SESSION_LOCK_WAIT_TIMEOUT: u64 = 10;

/// Requested `wait_timeout`, 365 days.
pub const WAIT_TIMEOUT: u64 = 31_536_000;

/// `wait_timeout` cap of servers running on Windows, about 24 days.
pub const FALLBACK_WAIT_TIMEOUT: u64 = 2_147_483;

impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        let (number, sqlstate) = match error.as_database_error() {
            Some(db) => (
                db.try_downcast_ref::<MySqlDatabaseError>()
                    .map(MySqlDatabaseError::number),
                db.code().map(|code| code.into_owned()),
            ),
            None => (None, None),
        };
        DbError {
            number,
            sqlstate,
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

fn connection_error(error: DbError) -> LockError {
    LockError::Connection(Box::new(error))
}

// ============================================================================
// Provider
// ============================================================================

/// Opens MySQL sessions configured for locking.
#[derive(Clone)]
pub struct MySqlSessionProvider {
    config: LockConfig,
    options: MySqlConnectOptions,
    comment: Option<String>,
}

impl MySqlSessionProvider {
    /// Creates a provider for `config`. Does not connect.
    pub fn new(config: LockConfig) -> LockResult<Self> {
        config.validate()?;
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database_name);
        let comment = config
            .query_comment
            .then(|| format!("innodb-lock {}", process::describe()).replace("*/", ""));

        Ok(Self {
            config,
            options,
            comment,
        })
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Creates the `locks` and `locks_metadata` tables if they are missing.
    #[instrument(skip(self), fields(host = %self.config.host, backend = "mysql"))]
    pub async fn ensure_schema(&self) -> LockResult<()> {
        let mut session = self.connect().await?;
        let result = async {
            session.execute(CREATE_LOCKS_TABLE).await?;
            session.execute(CREATE_LOCKS_METADATA_TABLE).await
        }
        .await;
        session.close().await;
        result.map_err(LockError::from)
    }

    async fn connect(&self) -> LockResult<MySqlSession> {
        let conn = MySqlConnection::connect_with(&self.options)
            .await
            .map_err(|e| connection_error(e.into()))?;
        let mut session = MySqlSession {
            conn,
            connection_id: 0,
            max_lifetime: Duration::from_secs(WAIT_TIMEOUT),
            debug: self.config.debug,
            comment: self.comment.clone(),
        };
        session.connection_id = session
            .fetch_u64("SELECT CAST(CONNECTION_ID() AS UNSIGNED)")
            .await
            .map_err(connection_error)?;
        Ok(session)
    }
}

impl fmt::Debug for MySqlSessionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlSessionProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionProvider for MySqlSessionProvider {
    type Session = MySqlSession;

    fn host(&self) -> &str {
        &self.config.host
    }

    fn max_heap_table_size(&self) -> Option<u64> {
        self.config.max_heap_table_size
    }

    async fn open_lock_session(&self) -> LockResult<MySqlSession> {
        let mut session = self.connect().await?;
        if let Err(e) = session.prepare_lock_session(&self.config).await {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn open_metadata_session(&self) -> LockResult<MySqlSession> {
        let mut session = self.connect().await?;
        if let Err(e) = session.prepare_metadata_session().await {
            session.close().await;
            return Err(connection_error(e));
        }
        Ok(session)
    }
}

// ============================================================================
// Session
// ============================================================================

/// One dedicated MySQL connection.
pub struct MySqlSession {
    conn: MySqlConnection,
    connection_id: u64,
    max_lifetime: Duration,
    debug: bool,
    comment: Option<String>,
}

impl MySqlSession {
    fn statement(&self, sql: &str) -> String {
        let sql = match &self.comment {
            Some(comment) => format!("/* {comment} */ {sql}"),
            None => sql.to_string(),
        };
        if self.debug {
            debug!(connection_id = self.connection_id, sql = %sql, "executing statement");
        }
        sql
    }

    async fn execute(&mut self, sql: &str) -> DbResult<()> {
        let sql = self.statement(sql);
        (&mut self.conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn fetch_u64(&mut self, sql: &str) -> DbResult<u64> {
        let sql = self.statement(sql);
        Ok(sqlx::query_scalar::<_, u64>(&sql)
            .fetch_one(&mut self.conn)
            .await?)
    }

    /// Applies the longest idle timeout the server accepts and records it as
    /// this session's lifetime.
    async fn apply_wait_timeout(&mut self) -> DbResult<()> {
        let requested = format!("SET SESSION wait_timeout = {WAIT_TIMEOUT}");
        if let Err(e) = self.execute(&requested).await {
            warn!(error = %e, "wait_timeout refused, using {FALLBACK_WAIT_TIMEOUT}");
            self.execute(&format!("SET SESSION wait_timeout = {FALLBACK_WAIT_TIMEOUT}"))
                .await?;
        }
        let accepted = self
            .fetch_u64("SELECT CAST(@@SESSION.wait_timeout AS UNSIGNED)")
            .await?;
        self.max_lifetime = Duration::from_secs(accepted);
        Ok(())
    }

    async fn prepare_lock_session(&mut self, config: &LockConfig) -> LockResult<()> {
        let setup = async {
            self.execute(&format!(
                "SET SESSION TRANSACTION ISOLATION LEVEL {}",
                config.isolation().as_sql()
            ))
            .await?;
            self.execute("SET sql_mode = 'STRICT_ALL_TABLES'").await?;
            self.execute(&format!(
                "SET SESSION lock_wait_timeout = {LOCK_SESSION_LOCK_WAIT_TIMEOUT}"
            ))
            .await?;
            self.apply_wait_timeout().await
        };
        setup.await.map_err(connection_error)?;

        if !config.production {
            let sql = self.statement(NON_INNODB_LOCKS_TABLE);
            let offending = (&mut self.conn)
                .fetch_optional(sqlx::raw_sql(&sql))
                .await
                .map_err(|e| connection_error(e.into()))?;
            if offending.is_some() {
                return Err(LockError::Config(
                    "Only the InnoDB table engine is supported for the `locks` table.".to_string(),
                ));
            }
        }

        // Clears leftovers before the long transaction starts.
        self.execute("ROLLBACK").await.map_err(connection_error)?;
        self.execute("BEGIN").await.map_err(connection_error)
    }

    async fn prepare_metadata_session(&mut self) -> DbResult<()> {
        self.execute("SET time_zone = '+00:00'").await?;
        self.execute("SET sql_mode = 'STRICT_ALL_TABLES'").await?;
        self.execute(&format!(
            "SET SESSION lock_wait_timeout = {METADATA_SESSION_LOCK_WAIT_TIMEOUT}"
        ))
        .await?;
        self.apply_wait_timeout().await?;
        self.execute("SET autocommit = 1").await
    }
}

impl LockSession for MySqlSession {
    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn max_session_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.execute("BEGIN").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.execute("ROLLBACK").await
    }

    async fn savepoint(&mut self, savepoint: &str) -> DbResult<()> {
        self.execute(&format!("SAVEPOINT `{savepoint}`")).await
    }

    async fn rollback_to_savepoint(&mut self, savepoint: &str) -> DbResult<()> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT `{savepoint}`"))
            .await
    }

    async fn set_lock_wait_timeout(&mut self, blocking: bool) -> DbResult<()> {
        let seconds = if blocking {
            BLOCKING_LOCK_WAIT_TIMEOUT
        } else {
            NON_BLOCKING_LOCK_WAIT_TIMEOUT
        };
        self.execute(&format!("SET SESSION innodb_lock_wait_timeout = {seconds}"))
            .await
    }

    async fn set_max_heap_table_size(&mut self, bytes: u64) -> DbResult<()> {
        self.execute(&format!("SET SESSION max_heap_table_size = {bytes}"))
            .await
    }

    async fn claim_row(&mut self, name: &str) -> DbResult<()> {
        let sql = self.statement("REPLACE INTO `locks` SET `lock_name` = ?");
        sqlx::query(&sql).bind(name).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn write_metadata(&mut self, record: &LockRecord) -> DbResult<()> {
        let sql = self.statement(
            "REPLACE INTO `locks_metadata` SET \
             `lock_name` = ?, \
             `lock_acquire_timestamp` = ?, \
             `lock_is_exclusive` = ?, \
             `lock_mysql_connection_id` = ?, \
             `lock_acquirer_pid` = ?, \
             `lock_acquirer_hostname` = ?, \
             `lock_acquirer_app_trace` = ?",
        );
        sqlx::query(&sql)
            .bind(record.lock_name.as_str())
            .bind(record.acquire_timestamp.as_str())
            .bind(record.is_exclusive)
            .bind(record.connection_id)
            .bind(record.acquirer_pid)
            .bind(record.acquirer_hostname.as_str())
            .bind(record.acquirer_app_trace.as_str())
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn delete_metadata(&mut self, name: &str) -> DbResult<()> {
        let sql = self.statement("DELETE FROM `locks_metadata` WHERE `lock_name` = ?");
        sqlx::query(&sql).bind(name).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn read_metadata(&mut self, name: &str) -> DbResult<Option<LockRecord>> {
        let sql = self.statement(
            "SELECT `lock_acquire_timestamp`, `lock_is_exclusive`, `lock_mysql_connection_id`, \
             `lock_acquirer_pid`, `lock_acquirer_hostname`, `lock_acquirer_app_trace` \
             FROM `locks_metadata` WHERE `lock_name` = ?",
        );
        let row = sqlx::query_as::<_, (String, bool, u64, u32, String, String)>(&sql)
            .bind(name)
            .fetch_optional(&mut self.conn)
            .await?;

        Ok(row.map(
            |(acquire_timestamp, is_exclusive, connection_id, pid, hostname, trace)| LockRecord {
                lock_name: name.to_string(),
                acquire_timestamp,
                is_exclusive,
                connection_id,
                acquirer_pid: pid,
                acquirer_hostname: hostname,
                acquirer_app_trace: trace,
            },
        ))
    }

    async fn ping(&mut self) -> DbResult<()> {
        self.execute("SELECT 1").await
    }

    async fn close(self) {
        let connection_id = self.connection_id;
        if let Err(e) = self.conn.close().await {
            debug!(connection_id, error = %e, "closing MySQL session failed");
        }
    }
}
