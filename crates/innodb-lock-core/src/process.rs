//! Identification of the current process for lock diagnostics.

use std::backtrace::Backtrace;

use chrono::{SecondsFormat, Utc};

/// Frames kept in a recorded call trace.
const MAX_TRACE_FRAMES: usize = 48;

/// Returns the hostname of this machine, or `"unknown"`.
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "unknown".into())
}

/// Returns the id of this process.
pub fn pid() -> u32 {
    std::process::id()
}

/// Current UTC time as ISO-8601 with a `Z` suffix, second precision.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Captures the call stack of the caller as a compact multi-line string.
///
/// Only symbol names and source locations are kept; the capture is forced
/// regardless of `RUST_BACKTRACE`.
pub fn call_trace() -> String {
    let trace = Backtrace::force_capture().to_string();
    let mut frames = Vec::new();
    let mut lines = trace.lines().map(str::trim).peekable();

    while let Some(line) = lines.next() {
        let Some((_, symbol)) = line.split_once(": ") else {
            continue;
        };
        let location = lines
            .next_if(|next| next.starts_with("at "))
            .map(|at| at.trim_start_matches("at "));
        frames.push(match location {
            Some(location) => format!("#{} {} ({})", frames.len(), symbol, location),
            None => format!("#{} {}", frames.len(), symbol),
        });
        if frames.len() == MAX_TRACE_FRAMES {
            break;
        }
    }

    frames.join("\n")
}

/// Standard diagnostic prefix: `Hostname: h. PID: p.`
pub fn describe() -> String {
    format!("Hostname: {}. PID: {}.", hostname(), pid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utc_timestamp_is_zulu() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'), "{ts}");
        assert_eq!(ts.len(), "2024-01-01T00:00:00Z".len());
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_describe_contains_pid() {
        assert!(describe().contains(&format!("PID: {}", std::process::id())));
    }
}
