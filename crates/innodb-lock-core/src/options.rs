//! Acquire mode helpers.

use std::time::Duration;

/// Default wait between two attempts of a non-blocking acquire.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How an acquire behaves when the lock is contended.
///
/// - Blocking: wait until the backend grants the lock (bounded only by the
///   backend's own ceiling).
/// - Non-blocking: try once, then retry up to `retries` more times with
///   `retry_delay` between attempts, then fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    blocking: bool,
    retries: u32,
    retry_delay: Duration,
}

impl AcquireOptions {
    /// Waits until the lock is available.
    pub const fn blocking() -> Self {
        Self {
            blocking: true,
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Fails immediately when the lock is held elsewhere.
    pub const fn non_blocking() -> Self {
        Self {
            blocking: false,
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Sets the number of extra attempts a non-blocking acquire makes.
    ///
    /// Ignored for blocking acquires.
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the wait between two non-blocking attempts.
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub const fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub const fn retries(&self) -> u32 {
        self.retries
    }

    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Upper bound of the time a non-blocking acquire spends sleeping.
    ///
    /// Returns `None` for blocking acquires.
    pub fn max_wait(&self) -> Option<Duration> {
        if self.blocking {
            None
        } else {
            Some(self.retry_delay.saturating_mul(self.retries))
        }
    }
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self::blocking()
    }
}

/// Countdown of the remaining non-blocking attempts.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: u32,
    delay: Duration,
}

impl RetryBudget {
    pub fn new(options: &AcquireOptions) -> Self {
        Self {
            remaining: options.retries,
            delay: options.retry_delay,
        }
    }

    /// Consumes one retry, returning the delay to sleep before it.
    ///
    /// Returns `None` once the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }
}
