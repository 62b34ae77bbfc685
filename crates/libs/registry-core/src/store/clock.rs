//! The `Clock` port: every place that reads the current time goes through
//! this trait instead of calling `SystemTime::now()` directly, so tests can
//! inject a fixed clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time, seconds since the Unix epoch.
    fn now(&self) -> i64;

    /// Current time, milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// The default adapter: reads the OS clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Fixed clock for deterministic tests, used across the workspace wherever
/// rate-limit or TTL behavior needs a pinned `now()`.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
    fn now_ms(&self) -> i64 {
        self.0 * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn fixed_clock_is_stable() {
        let clock = FixedClock(1_700_000_000);
        assert_eq!(clock.now(), 1_700_000_000);
        assert_eq!(clock.now_ms(), 1_700_000_000_000);
    }
}
