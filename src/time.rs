use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

pub type Timestamp = chrono::DateTime<Utc>;

/// Source of the current time. Services take one of these instead of calling [Utc::now] so that
/// the rearm window can be driven from tests.
pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::max_value());
        let mut now = self.now.lock().unwrap_or_else(|poison| poison.into_inner());
        *now += step;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Whether a view last seen at `last_seen` counts again at `now`.
///
/// A view rearms only once *strictly more* than `window` has elapsed; a repeat exactly at the
/// window boundary is still a duplicate.
pub fn is_rearmed(last_seen: Timestamp, now: Timestamp, window: Duration) -> bool {
    match chrono::Duration::from_std(window) {
        Ok(window) => now - last_seen > window,
        Err(_) => false,
    }
}

/// A view last seen strictly before this instant is rearmed at `now`.
pub fn rearm_cutoff(now: Timestamp, window: Duration) -> Timestamp {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
}

/// The deadline passed before the wrapped call completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    pub after: Duration,
}

impl std::fmt::Display for Elapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timed out after {}", humantime::format_duration(self.after))
    }
}

impl std::error::Error for Elapsed {}

/// Run `future` with an explicit timeout. Every call into the cache, the counter store and the
/// database goes through this.
pub async fn deadline<F: Future>(after: Duration, future: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(after, future)
        .await
        .map_err(|_| Elapsed { after })
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new(start());
        assert_eq!(clock.now(), start());

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(90));
    }

    #[test]
    fn clones_share_the_same_time() {
        let clock = ManualClock::new(start());
        let other = clock.clone();

        other.advance(HOUR);
        assert_eq!(clock.now(), start() + chrono::Duration::hours(1));
    }

    #[test]
    fn view_inside_window_is_not_rearmed() {
        let now = start() + chrono::Duration::minutes(59);
        assert!(!is_rearmed(start(), now, HOUR));
    }

    #[test]
    fn view_exactly_at_window_is_not_rearmed() {
        let now = start() + chrono::Duration::hours(1);
        assert!(
            !is_rearmed(start(), now, HOUR),
            "a repeat exactly at the boundary is still a duplicate"
        );
    }

    #[test]
    fn view_past_window_is_rearmed() {
        let now = start() + chrono::Duration::hours(1) + chrono::Duration::seconds(1);
        assert!(is_rearmed(start(), now, HOUR));
    }

    #[test]
    fn cutoff_is_now_minus_window() {
        let now = start();
        assert_eq!(rearm_cutoff(now, HOUR), start() - chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn deadline_reports_elapsed() {
        let slow = tokio::time::sleep(Duration::from_secs(5));
        let result = deadline(Duration::from_millis(10), slow).await;
        assert_eq!(
            result,
            Err(Elapsed {
                after: Duration::from_millis(10)
            })
        );
    }

    #[tokio::test]
    async fn deadline_passes_output_through() {
        let result = deadline(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }
}
