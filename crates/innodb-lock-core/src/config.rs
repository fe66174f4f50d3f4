//! Database engine configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LockError, LockResult};

/// Default MySQL port.
pub const DEFAULT_PORT: u16 = 3306;

/// Transaction isolation level applied to lock sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    #[default]
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, as used after `SET TRANSACTION ISOLATION LEVEL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Connection and behavior settings for the database engines.
///
/// Accepted option names (JSON form): `host`, `port`, `databaseName`,
/// `username`, `password`, `maxHeapTableSize`, `debug`, `queryComment`,
/// `transactionIsolation`, `production`. Any other name is rejected.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LockConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password: String,
    /// `max_heap_table_size` for the FILO engine's session. Required there.
    #[serde(default)]
    pub max_heap_table_size: Option<u64>,
    /// Logs every statement at debug level.
    #[serde(default)]
    pub debug: bool,
    /// Prefixes every statement with a comment identifying this process.
    #[serde(default)]
    pub query_comment: bool,
    #[serde(default)]
    pub transaction_isolation: Option<IsolationLevel>,
    /// Skips the startup schema sanity checks.
    #[serde(default)]
    pub production: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl LockConfig {
    /// Returns a new builder.
    pub fn builder() -> LockConfigBuilder {
        LockConfigBuilder::new()
    }

    /// Parses and validates a configuration from a JSON object.
    pub fn from_json(value: serde_json::Value) -> LockResult<Self> {
        let config: LockConfig = serde_json::from_value(value)
            .map_err(|e| LockError::Config(format!("invalid lock configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a configuration from JSON text.
    pub fn from_json_str(text: &str) -> LockResult<Self> {
        let config: LockConfig = serde_json::from_str(text)
            .map_err(|e| LockError::Config(format!("invalid lock configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values serde cannot check.
    pub fn validate(&self) -> LockResult<()> {
        if self.host.trim().is_empty() {
            return Err(LockError::Config("'host' must not be empty".to_string()));
        }
        if self.database_name.trim().is_empty() {
            return Err(LockError::Config(
                "'databaseName' must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(LockError::Config("'port' must not be 0".to_string()));
        }
        if self.max_heap_table_size == Some(0) {
            return Err(LockError::Config(
                "'maxHeapTableSize' must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Isolation level for lock sessions.
    pub fn isolation(&self) -> IsolationLevel {
        self.transaction_isolation.unwrap_or_default()
    }
}

impl fmt::Debug for LockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("max_heap_table_size", &self.max_heap_table_size)
            .field("debug", &self.debug)
            .field("query_comment", &self.query_comment)
            .field("transaction_isolation", &self.transaction_isolation)
            .field("production", &self.production)
            .finish()
    }
}

/// Builder for [`LockConfig`].
#[derive(Debug, Default)]
pub struct LockConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    database_name: Option<String>,
    username: Option<String>,
    password: Option<String>,
    max_heap_table_size: Option<u64>,
    debug: bool,
    query_comment: bool,
    transaction_isolation: Option<IsolationLevel>,
    production: bool,
}

impl LockConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the `max_heap_table_size` hint, required by the FILO engine.
    pub fn max_heap_table_size(mut self, bytes: u64) -> Self {
        self.max_heap_table_size = Some(bytes);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn query_comment(mut self, query_comment: bool) -> Self {
        self.query_comment = query_comment;
        self
    }

    pub fn transaction_isolation(mut self, level: IsolationLevel) -> Self {
        self.transaction_isolation = Some(level);
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required option is missing or
    /// invalid.
    pub fn build(self) -> LockResult<LockConfig> {
        fn required(value: Option<String>, option: &str) -> LockResult<String> {
            value.ok_or_else(|| LockError::Config(format!("'{option}' is required")))
        }

        let config = LockConfig {
            host: required(self.host, "host")?,
            port: self.port.unwrap_or(DEFAULT_PORT),
            database_name: required(self.database_name, "databaseName")?,
            username: required(self.username, "username")?,
            password: required(self.password, "password")?,
            max_heap_table_size: self.max_heap_table_size,
            debug: self.debug,
            query_comment: self.query_comment,
            transaction_isolation: self.transaction_isolation,
            production: self.production,
        };
        config.validate()?;
        Ok(config)
    }
}
