//! Holder diagnostics written into a lock file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use innodb_lock_core::process;

/// Who holds a lock file, for operators inspecting contention.
///
/// Advisory only: the lock works without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderInfo {
    pub pid: u32,
    /// UTC acquire time, ISO-8601 with `Z` suffix.
    pub acquire_timestamp: String,
    pub lock_acquirer_app_trace: String,
}

impl HolderInfo {
    /// Describes the calling process at this instant.
    pub fn current() -> Self {
        Self {
            pid: process::pid(),
            acquire_timestamp: process::utc_timestamp(),
            lock_acquirer_app_trace: process::call_trace(),
        }
    }

    /// Reads the record stored in the lock file at `path`.
    ///
    /// Returns `None` if the file is missing, empty or not a holder record.
    pub fn read(path: &Path) -> Option<Self> {
        let contents = std::fs::read(path).ok()?;
        serde_json::from_slice(&contents).ok()
    }
}
