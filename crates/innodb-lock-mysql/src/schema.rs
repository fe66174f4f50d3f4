//! Tables backing the database engines.

use innodb_lock_core::error::{LockError, LockResult};

/// Longest lock name the `lock_name` columns accept, in characters.
pub const MAX_LOCK_NAME_CHARS: usize = 255;

/// Contention table. Its rows only ever exist inside open transactions; the
/// row lock of an uncommitted write is the lock.
pub const CREATE_LOCKS_TABLE: &str = "CREATE TABLE IF NOT EXISTS `locks` (
    `lock_name` VARCHAR(255) NOT NULL,
    PRIMARY KEY (`lock_name`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin";

/// Holder diagnostics, one row per held lock.
pub const CREATE_LOCKS_METADATA_TABLE: &str = "CREATE TABLE IF NOT EXISTS `locks_metadata` (
    `lock_name` VARCHAR(255) NOT NULL,
    `lock_acquire_timestamp` VARCHAR(32) NOT NULL,
    `lock_is_exclusive` TINYINT(1) NOT NULL,
    `lock_mysql_connection_id` BIGINT UNSIGNED NOT NULL,
    `lock_acquirer_pid` INT UNSIGNED NOT NULL,
    `lock_acquirer_hostname` VARCHAR(255) NOT NULL,
    `lock_acquirer_app_trace` TEXT NOT NULL,
    PRIMARY KEY (`lock_name`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin";

/// Returns rows only when the contention table is not InnoDB.
pub const NON_INNODB_LOCKS_TABLE: &str =
    "SHOW TABLE STATUS WHERE `Name` = 'locks' AND `Engine` <> 'InnoDB'";

/// Checks that `name` fits the `lock_name` columns.
pub fn validate_lock_name(name: &str) -> LockResult<()> {
    if name.trim().is_empty() {
        return Err(LockError::InvalidName(
            "lock name cannot be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_LOCK_NAME_CHARS {
        return Err(LockError::InvalidName(format!(
            "lock name exceeds {MAX_LOCK_NAME_CHARS} characters"
        )));
    }
    Ok(())
}
