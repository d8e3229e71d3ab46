//! Time sources for sentinel inserts

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::storage::types::Timestamp;

/// Resolution of engine timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// Unix seconds
    #[default]
    Seconds,
    /// Unix milliseconds
    Milliseconds,
}

impl Resolution {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "s" | "sec" | "seconds" => Some(Self::Seconds),
            "ms" | "millis" | "milliseconds" => Some(Self::Milliseconds),
            _ => None,
        }
    }
}

/// A source of timestamps for sentinel (`time == 0`) inserts.
pub trait Clock: Send + Sync + 'static {
    /// Current time in engine resolution
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    resolution: Resolution,
}

impl SystemClock {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let now = Utc::now();
        match self.resolution {
            Resolution::Seconds => now.timestamp(),
            Resolution::Milliseconds => now.timestamp_millis(),
        }
    }
}

/// A clock that only moves when told to. Useful for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn test_system_clock_resolution() {
        let secs = SystemClock::new(Resolution::Seconds).now();
        let millis = SystemClock::new(Resolution::Milliseconds).now();
        assert!(millis / 1000 >= secs);
        assert!(secs > 1_500_000_000);
    }
}
