//! Session lifetime watchdog.
//!
//! A lock is only as alive as the session holding it. When the server drops
//! an idle session past its `wait_timeout`, the row lock silently goes away
//! while the process still believes it holds it. The watchdog turns that
//! into a loud exit before it can happen.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::error;

use crate::order::AcquisitionOrder;

/// Default time between two checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Hold time after which the safety margin applies.
pub const EXTENDED_HOLD: Duration = Duration::from_secs(48 * 60 * 60);

/// Margin subtracted from the session lifetime for extended holds.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(60 * 60);

/// Invoked with the name of the expired lock.
pub type ExpiryAction = Arc<dyn Fn(&str) + Send + Sync>;

/// Whether a lock held for `held` has outlived a session lifetime of
/// `max_lifetime`.
pub fn lifetime_exceeded(held: Duration, max_lifetime: Duration) -> bool {
    let margin = if held >= EXTENDED_HOLD {
        SAFETY_MARGIN
    } else {
        Duration::ZERO
    };
    held >= max_lifetime.saturating_sub(margin)
}

/// Name of the oldest lock if it has outlived its session.
pub fn expired_lock(order: &AcquisitionOrder, now: Instant) -> Option<String> {
    order
        .oldest()
        .filter(|oldest| lifetime_exceeded(oldest.held_for(now), oldest.max_lifetime))
        .map(|oldest| oldest.name.clone())
}

fn exit_process(_name: &str) {
    std::process::exit(1)
}

/// Periodic check of the oldest held lock, running as a tokio task.
///
/// Active only while its engine holds locks.
pub struct TimeoutWatchdog {
    interval: Duration,
    on_expiry: ExpiryAction,
    task: Option<JoinHandle<()>>,
}

impl TimeoutWatchdog {
    /// Creates an inactive watchdog that exits the process on expiry.
    pub fn new() -> Self {
        Self {
            interval: DEFAULT_CHECK_INTERVAL,
            on_expiry: Arc::new(exit_process),
            task: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replaces the default process exit.
    pub fn with_expiry_action(mut self, action: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_expiry = Arc::new(action);
        self
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Starts checking `order`. No-op when already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&mut self, order: Arc<Mutex<AcquisitionOrder>>) {
        if self.is_active() {
            return;
        }

        let interval = self.interval;
        let on_expiry = Arc::clone(&self.on_expiry);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = {
                    let order = order.lock().unwrap_or_else(PoisonError::into_inner);
                    expired_lock(&order, Instant::now())
                };
                if let Some(name) = expired {
                    error!(
                        lock.name = %name,
                        "{name} was being held for longer than maximum wait_timeout"
                    );
                    on_expiry(&name);
                    return;
                }
            }
        }));
    }

    /// Stops checking.
    pub fn deactivate(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Default for TimeoutWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimeoutWatchdog {
    fn drop(&mut self) {
        self.deactivate();
    }
}
