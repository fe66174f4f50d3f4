//! Lock name to lock file name mapping.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha512};

use innodb_lock_core::error::{LockError, LockResult};

/// Extension of every lock file.
pub const EXTENSION: &str = ".lock";

/// Longest name used verbatim. Keeps the file name under 255 bytes.
const MAX_VERBATIM_LENGTH: usize = 200;

/// Length of a hashed file name, extension excluded.
const HASHED_NAME_LENGTH: usize = 59;

/// Hash length in base32 characters (160 bits / 5 bits per char).
const HASH_LENGTH_IN_CHARS: usize = 32;

/// Base32 alphabet (RFC 4648).
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Returns the file name (without directory) that backs `name`.
///
/// # Rules
///
/// - Names made of lowercase ASCII letters, digits, `.`, `-` and `_` map to
///   `<name>.lock`
/// - Other names are sanitized, truncated and suffixed with a base32 hash of
///   the original name, so distinct names never share a file, even on
///   case-insensitive file systems
/// - Empty and blank names are rejected
pub fn lock_file_name(name: &str) -> LockResult<String> {
    if name.trim().is_empty() {
        return Err(LockError::InvalidName(
            "lock name cannot be empty".to_string(),
        ));
    }

    if is_verbatim(name) {
        return Ok(format!("{name}{EXTENSION}"));
    }

    let hash = compute_hash(name.as_bytes());
    let prefix: String = sanitize(name)
        .chars()
        .take(HASHED_NAME_LENGTH - HASH_LENGTH_IN_CHARS - 1)
        .collect();
    Ok(format!("{prefix}_{hash}{EXTENSION}"))
}

/// Returns the full path of the file that backs `name` inside `directory`.
pub fn lock_file_path(directory: &Path, name: &str) -> LockResult<PathBuf> {
    Ok(directory.join(lock_file_name(name)?))
}

fn is_verbatim(name: &str) -> bool {
    name.len() <= MAX_VERBATIM_LENGTH
        && name != "."
        && name != ".."
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_'))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Base32 of the first 160 bits of the SHA-512 digest.
fn compute_hash(bytes: &[u8]) -> String {
    let digest = Sha512::digest(bytes);

    let mut encoded = String::with_capacity(HASH_LENGTH_IN_CHARS);
    let mut buffer = 0u64;
    let mut bits = 0u32;
    for &byte in &digest[..20] {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = ((buffer >> bits) & 0x1f) as usize;
            encoded.push(char::from(BASE32_ALPHABET[index]));
        }
    }

    encoded
}
