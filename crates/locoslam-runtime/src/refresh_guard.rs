//! [`RefreshGuard`] – consecutive refresh failure detector.
//!
//! A single failed refresh is routine (the robot dropped a frame, a fetch
//! timed out) and the service keeps serving the previous map.  A long run of
//! failures means the map is going stale, which deserves louder reporting.
//!
//! The guard counts the current run of failures and reports an escalation
//! once the run reaches `threshold`.  The count keeps growing past the
//! threshold so reports show how long the map has been stale.
//!
//! # Example
//!
//! ```rust
//! use locoslam_runtime::refresh_guard::RefreshGuard;
//!
//! let mut guard = RefreshGuard::new(3);
//!
//! assert!(!guard.record_failure());
//! assert!(!guard.record_failure());
//! assert!(guard.record_failure()); // third failure in a row
//!
//! guard.record_success();
//! assert!(!guard.record_failure());
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// RefreshGuard
// ─────────────────────────────────────────────────────────────────────────────

pub struct RefreshGuard {
    threshold: usize,
    streak: usize,
}

impl RefreshGuard {
    /// `threshold` consecutive failures trigger escalation.  Zero is treated
    /// as one.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            streak: 0,
        }
    }

    /// Record a failed refresh.  Returns `true` once the last `threshold`
    /// refreshes have all failed.
    pub fn record_failure(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        self.is_escalated()
    }

    pub fn record_success(&mut self) {
        self.streak = 0;
    }

    pub fn is_escalated(&self) -> bool {
        self.streak >= self.threshold
    }

    /// Length of the current run of failures, uncapped.
    pub fn streak(&self) -> usize {
        self.streak
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_at_threshold() {
        let mut guard = RefreshGuard::new(3);
        assert!(!guard.record_failure());
        assert!(!guard.record_failure());
        assert!(guard.record_failure());
        assert_eq!(guard.streak(), 3);
    }

    #[test]
    fn stays_escalated_while_failures_continue() {
        let mut guard = RefreshGuard::new(2);
        guard.record_failure();
        assert!(guard.record_failure());
        assert!(guard.record_failure());
    }

    #[test]
    fn streak_keeps_counting_past_the_threshold() {
        let mut guard = RefreshGuard::new(2);
        for _ in 0..7 {
            guard.record_failure();
        }
        assert_eq!(guard.streak(), 7);
        assert!(guard.is_escalated());
    }

    #[test]
    fn success_breaks_the_streak() {
        let mut guard = RefreshGuard::new(3);
        guard.record_failure();
        guard.record_failure();
        guard.record_success();
        assert!(!guard.is_escalated());
        assert_eq!(guard.streak(), 0);
        assert!(!guard.record_failure());
        assert_eq!(guard.streak(), 1);
    }

    #[test]
    fn zero_threshold_escalates_on_first_failure() {
        let mut guard = RefreshGuard::new(0);
        assert_eq!(guard.threshold(), 1);
        assert!(guard.record_failure());
    }
}
