//! Wall-clock sources for job dispatch

use chrono::{Duration, NaiveDateTime};
use tokio::time::Instant;

/// Source of the current local wall time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Wall time anchored at a chosen instant and advanced by the tokio clock.
///
/// Follows paused and auto-advanced tokio time, which makes dispatch
/// deterministic under `#[tokio::test(start_paused = true)]` and lets a
/// forecast be replayed from its first slot.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: NaiveDateTime,
    started: Instant,
}

impl MonotonicClock {
    pub fn starting_at(anchor: NaiveDateTime) -> Self {
        Self {
            anchor,
            started: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = Duration::from_std(self.started.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.anchor + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_tokio_time() {
        let anchor = NaiveDate::from_ymd_opt(2023, 10, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let clock = MonotonicClock::starting_at(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::sleep(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now(), anchor + Duration::seconds(90));
    }

    #[test]
    fn test_system_clock_is_close_to_local_time() {
        let before = chrono::Local::now().naive_local();
        let now = SystemClock.now();
        assert!(now >= before);
        assert!(now - before < Duration::seconds(5));
    }
}
