//! Lock holder metadata.

use std::fmt;

use innodb_lock_core::process;

/// Row of the `locks_metadata` table: who holds a lock, for diagnostics.
///
/// Written only after the row lock is obtained and deleted on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub lock_name: String,
    /// UTC, ISO-8601 with `Z` suffix.
    pub acquire_timestamp: String,
    pub is_exclusive: bool,
    pub connection_id: u64,
    pub acquirer_pid: u32,
    pub acquirer_hostname: String,
    pub acquirer_app_trace: String,
}

impl LockRecord {
    /// Describes the calling process acquiring `lock_name` now.
    pub fn new(lock_name: &str, is_exclusive: bool, connection_id: u64) -> Self {
        Self {
            lock_name: lock_name.to_string(),
            acquire_timestamp: process::utc_timestamp(),
            is_exclusive,
            connection_id,
            acquirer_pid: process::pid(),
            acquirer_hostname: process::hostname(),
            acquirer_app_trace: process::call_trace(),
        }
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    lock_acquire_timestamp: {},", self.acquire_timestamp)?;
        writeln!(f, "    lock_is_exclusive: {},", u8::from(self.is_exclusive))?;
        writeln!(f, "    lock_mysql_connection_id: {},", self.connection_id)?;
        writeln!(f, "    lock_acquirer_pid: {},", self.acquirer_pid)?;
        writeln!(f, "    lock_acquirer_hostname: {},", self.acquirer_hostname)?;
        writeln!(f, "    lock_acquirer_app_trace: {}", self.acquirer_app_trace)?;
        write!(f, "}}")
    }
}
