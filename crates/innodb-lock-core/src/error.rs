//! Error types for lock engine operations.

use std::fmt;

use thiserror::Error;

/// Boxed error used as the source of backend failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during lock operations.
///
/// Every variant that concerns a specific lock carries its name and a
/// diagnostic `context` (hostname, pid, backend host, connection id and,
/// when it could be read, the current holder's record).
#[derive(Error, Debug)]
pub enum LockError {
    /// A non-blocking acquire ran out of retries, or a blocking acquire
    /// targeted a lock this engine already holds.
    #[error("non-blocking lock {name:?}: {reason}. {context}")]
    NonBlockingLock {
        name: String,
        reason: String,
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Deadlock reported by the backend, or the same engine tried to
    /// acquire a lock it already holds without releasing it first.
    #[error("deadlock on lock {name:?}: {reason}. {context}")]
    Deadlock {
        name: String,
        reason: String,
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The session backing a held lock is gone, or a release violated the
    /// first-in-last-out order.
    #[error("lock integrity failed for {name:?}: {reason}. {context}")]
    IntegrityFailed {
        name: String,
        reason: String,
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Malformed configuration, or a lock file could not be reopened after
    /// its lock was obtained.
    #[error("lock configuration error: {0}")]
    Config(String),

    /// A blocking acquire exceeded the backend's own wait ceiling.
    #[error("lock wait timeout on {name:?}. {context}")]
    WaitTimeout {
        name: String,
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Released a lock that this engine does not hold.
    #[error("lock {name:?} is not held by this engine. {context}")]
    NotHeld { name: String, context: String },

    /// Invalid lock name.
    #[error("invalid lock name: {0}")]
    InvalidName(String),

    /// Backend connection failed.
    #[error("connection error: {0}")]
    Connection(#[source] BoxError),

    /// Backend-specific error that has no dedicated kind.
    #[error("backend error: {0}")]
    Backend(#[source] BoxError),

    /// Filesystem failure on a lock file.
    #[error("I/O error on lock {name:?}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Stable, inspectable reason of a [`LockError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockErrorKind {
    NonBlockingLock,
    Deadlock,
    IntegrityFailed,
    Config,
    WaitTimeout,
    NotHeld,
    InvalidName,
    Connection,
    Backend,
    Io,
}

impl LockErrorKind {
    /// Returns the stable name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockErrorKind::NonBlockingLock => "non-blocking-lock",
            LockErrorKind::Deadlock => "deadlock",
            LockErrorKind::IntegrityFailed => "lock-integrity-failed",
            LockErrorKind::Config => "lock-config-error",
            LockErrorKind::WaitTimeout => "lock-wait-timeout",
            LockErrorKind::NotHeld => "not-held",
            LockErrorKind::InvalidName => "invalid-name",
            LockErrorKind::Connection => "connection",
            LockErrorKind::Backend => "backend",
            LockErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for LockErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LockError {
    /// Returns the stable reason of this error.
    pub fn kind(&self) -> LockErrorKind {
        match self {
            LockError::NonBlockingLock { .. } => LockErrorKind::NonBlockingLock,
            LockError::Deadlock { .. } => LockErrorKind::Deadlock,
            LockError::IntegrityFailed { .. } => LockErrorKind::IntegrityFailed,
            LockError::Config(_) => LockErrorKind::Config,
            LockError::WaitTimeout { .. } => LockErrorKind::WaitTimeout,
            LockError::NotHeld { .. } => LockErrorKind::NotHeld,
            LockError::InvalidName(_) => LockErrorKind::InvalidName,
            LockError::Connection(_) => LockErrorKind::Connection,
            LockError::Backend(_) => LockErrorKind::Backend,
            LockError::Io { .. } => LockErrorKind::Io,
        }
    }

    pub fn non_blocking(
        name: impl Into<String>,
        reason: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        LockError::NonBlockingLock {
            name: name.into(),
            reason: reason.into(),
            context: context.into(),
            source: None,
        }
    }

    pub fn deadlock(
        name: impl Into<String>,
        reason: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        LockError::Deadlock {
            name: name.into(),
            reason: reason.into(),
            context: context.into(),
            source: None,
        }
    }

    pub fn integrity(
        name: impl Into<String>,
        reason: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        LockError::IntegrityFailed {
            name: name.into(),
            reason: reason.into(),
            context: context.into(),
            source: None,
        }
    }

    pub fn not_held(name: impl Into<String>, context: impl Into<String>) -> Self {
        LockError::NotHeld {
            name: name.into(),
            context: context.into(),
        }
    }

    /// Attaches the underlying cause to variants that carry one.
    ///
    /// Variants without a source slot are returned unchanged.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            LockError::NonBlockingLock { source, .. }
            | LockError::Deadlock { source, .. }
            | LockError::IntegrityFailed { source, .. }
            | LockError::WaitTimeout { source, .. } => *source = Some(cause.into()),
            _ => {}
        }
        self
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(LockErrorKind::NonBlockingLock.as_str(), "non-blocking-lock");
        assert_eq!(LockErrorKind::Deadlock.as_str(), "deadlock");
        assert_eq!(LockErrorKind::IntegrityFailed.as_str(), "lock-integrity-failed");
        assert_eq!(LockErrorKind::Config.as_str(), "lock-config-error");
        assert_eq!(LockErrorKind::WaitTimeout.as_str(), "lock-wait-timeout");
    }

    #[test]
    fn test_with_source_keeps_kind() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "Lock wait timeout exceeded");
        let err = LockError::non_blocking("x", "retries exhausted", "PID: 1").with_source(cause);
        assert_eq!(err.kind(), LockErrorKind::NonBlockingLock);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("retries exhausted"));
    }

    #[test]
    fn test_with_source_ignored_without_slot() {
        let err = LockError::Config("bad port".to_string())
            .with_source(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert_eq!(err.kind(), LockErrorKind::Config);
        assert!(std::error::Error::source(&err).is_none());
    }
}
