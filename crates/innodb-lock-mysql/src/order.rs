//! Acquisition order of the locks held by one engine.

use std::time::Duration;

use tokio::time::Instant;

/// A held lock, as seen by the watchdog.
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub name: String,
    /// When the lock was requested.
    pub requested_at: Instant,
    /// Lifetime of the session backing the lock.
    pub max_lifetime: Duration,
}

impl OrderEntry {
    pub fn held_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.requested_at)
    }
}

/// Held locks, oldest first.
#[derive(Debug, Default)]
pub struct AcquisitionOrder {
    entries: Vec<OrderEntry>,
}

impl AcquisitionOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, requested_at: Instant, max_lifetime: Duration) {
        self.entries.push(OrderEntry {
            name: name.to_string(),
            requested_at,
            max_lifetime,
        });
    }

    /// Removes `name`, keeping the relative order of the others.
    pub fn remove(&mut self, name: &str) -> Option<OrderEntry> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// The lock held the longest.
    pub fn oldest(&self) -> Option<&OrderEntry> {
        self.entries.first()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIFETIME: Duration = Duration::from_secs(60);

    #[test]
    fn test_remove_keeps_relative_order() {
        let now = Instant::now();
        let mut order = AcquisitionOrder::new();
        order.push("a", now, LIFETIME);
        order.push("b", now, LIFETIME);
        order.push("c", now, LIFETIME);

        assert_eq!(order.remove("b").map(|e| e.name), Some("b".to_string()));
        assert_eq!(order.names(), vec!["a", "c"]);
        assert!(order.remove("b").is_none());

        order.remove("a");
        assert_eq!(order.oldest().map(|e| e.name.as_str()), Some("c"));
    }

    #[test]
    fn test_held_for_never_negative() {
        let now = Instant::now();
        let entry = OrderEntry {
            name: "x".to_string(),
            requested_at: now + Duration::from_secs(5),
            max_lifetime: LIFETIME,
        };
        assert_eq!(entry.held_for(now), Duration::ZERO);
    }
}
