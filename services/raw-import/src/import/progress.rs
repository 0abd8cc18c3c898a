//! Rate-limited download progress.

use std::time::{Duration, Instant};

/// Elapsed time needed before the remaining time is estimated.
const ESTIMATE_AFTER: Duration = Duration::from_secs(1);

/// One progress line worth logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub percent: u32,
    /// Estimated time left, once enough time has passed to guess.
    pub remaining: Option<Duration>,
}

/// Decides when a transfer's progress is worth reporting.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    interval: Duration,
    started: Instant,
    last_report: Option<Instant>,
    last_percent: Option<u32>,
}

impl ProgressTracker {
    pub fn new(interval: Duration, started: Instant) -> Self {
        Self {
            interval,
            started,
            last_report: None,
            last_percent: None,
        }
    }

    /// Record `received` of `total` bytes at `now`. Returns a report when the
    /// interval has elapsed since the last one and the percentage changed.
    pub fn update(&mut self, now: Instant, received: u64, total: u64) -> Option<ProgressReport> {
        if total == 0 {
            return None;
        }

        let due = self
            .last_report
            .map_or(true, |last| now.saturating_duration_since(last) > self.interval);
        if !due {
            return None;
        }

        let percent = u32::try_from(u128::from(received.min(total)) * 100 / u128::from(total))
            .unwrap_or(100);
        if self.last_percent == Some(percent) {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.started);
        let remaining = (elapsed > ESTIMATE_AFTER && received > 0).then(|| {
            let projected = elapsed.as_secs_f64() * total as f64 / received as f64;
            Duration::from_secs_f64((projected - elapsed.as_secs_f64()).max(0.0))
        });

        self.last_report = Some(now);
        self.last_percent = Some(percent);
        Some(ProgressReport { percent, remaining })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_first_update_reports() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(SECOND, start);
        let report = tracker.update(start, 10, 100).unwrap();
        assert_eq!(report.percent, 10);
        assert_eq!(report.remaining, None);
    }

    #[test]
    fn test_rate_limited() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(SECOND, start);
        assert!(tracker.update(start, 10, 100).is_some());
        assert!(tracker.update(start + SECOND / 2, 50, 100).is_none());
        assert!(tracker.update(start + SECOND * 2, 60, 100).is_some());
    }

    #[test]
    fn test_unchanged_percent_is_skipped() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(SECOND, start);
        assert!(tracker.update(start, 10, 100).is_some());
        assert!(tracker.update(start + SECOND * 3, 10, 100).is_none());
    }

    #[test]
    fn test_remaining_estimate() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(SECOND, start);
        let report = tracker.update(start + SECOND * 4, 25, 100).unwrap();
        let remaining = report.remaining.unwrap();
        assert!((remaining.as_secs_f64() - 12.0).abs() < 0.01);
    }

    #[test]
    fn test_estimate_independent_of_interval() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(SECOND * 5, start);
        let report = tracker.update(start + SECOND * 2, 50, 100).unwrap();
        let remaining = report.remaining.unwrap();
        assert!((remaining.as_secs_f64() - 2.0).abs() < 0.01);

        let mut fast = ProgressTracker::new(Duration::from_millis(100), start);
        let report = fast.update(start + Duration::from_millis(500), 50, 100).unwrap();
        assert_eq!(report.remaining, None);
    }

    #[test]
    fn test_unknown_total() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(SECOND, start);
        assert!(tracker.update(start, 10, 0).is_none());
    }
}
