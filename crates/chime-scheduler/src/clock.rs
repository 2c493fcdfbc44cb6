//! Wall-clock sources for the engine.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Provides the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock time derived from tokio's monotonic clock.
///
/// Captures the system time once and advances it by elapsed
/// [`tokio::time::Instant`] time afterwards. Under a paused tokio runtime
/// this follows simulated time, which keeps timer tests deterministic.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall_anchor: DateTime<Utc>,
    instant_anchor: Instant,
}

impl MonotonicClock {
    /// Anchor at the current system time.
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Anchor at an arbitrary wall-clock time.
    pub fn anchored_at(wall_anchor: DateTime<Utc>) -> Self {
        Self {
            wall_anchor,
            instant_anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.instant_anchor.elapsed();
        chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|delta| self.wall_anchor.checked_add_signed(delta))
            .unwrap_or(self.wall_anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_paused_time() {
        let anchor = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let clock = MonotonicClock::anchored_at(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.now(), anchor + chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn test_system_clock_is_close_to_utc_now() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
