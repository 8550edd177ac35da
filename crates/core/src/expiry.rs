use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

/// Returns the instant at which coverage for the given end date lapses.
///
/// End dates are inclusive calendar days, so the policy stops covering the
/// car at the first moment of `end_date` in UTC. The store and the scanner
/// share this definition; mixing time references here would make the
/// eligibility test below disagree with what the store persisted.
pub fn expiry_instant(end_date: NaiveDate) -> DateTime<Utc> {
    end_date.and_time(NaiveTime::MIN).and_utc()
}

/// Eligibility policy for expiry notifications.
///
/// A policy becomes eligible the instant its end date begins and stays
/// eligible for `grace_span` afterwards. Eligibility is a property of each
/// record relative to `now` rather than a fixed global window: the scan
/// cadence is coarser than the grace span, and a record whose grace span
/// already lapsed between two scans must not be flagged late.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryWindow {
    grace_span: Duration,
}

impl ExpiryWindow {
    /// Creates a window with the provided grace span.
    pub fn new(grace_span: Duration) -> Self {
        Self { grace_span }
    }

    /// Grace span currently in effect.
    pub fn grace_span(&self) -> Duration {
        self.grace_span
    }

    /// Per-record eligibility test: `expiry <= now < expiry + grace_span`.
    ///
    /// Records older than one grace span are permanently skipped. They keep
    /// their unprocessed flag and are never notified; the scanner reacts
    /// only to records entering the window, not to stale backlog.
    pub fn is_due(&self, end_date: NaiveDate, now: DateTime<Utc>) -> bool {
        let expiry = expiry_instant(end_date);
        expiry <= now && expiry + self.grace_span > now
    }

    /// Earliest end date that can still satisfy [`ExpiryWindow::is_due`] at
    /// `now`. Used by the store query as a date-granular lower bound.
    pub fn earliest_candidate_date(&self, now: DateTime<Utc>) -> NaiveDate {
        (now - self.grace_span).date_naive()
    }

    /// Latest end date that can satisfy [`ExpiryWindow::is_due`] at `now`.
    /// A later end date means the policy has not expired yet.
    pub fn latest_candidate_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.date_naive()
    }
}

impl Default for ExpiryWindow {
    fn default() -> Self {
        Self {
            grace_span: Duration::hours(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        value.parse().expect("valid test date")
    }

    fn instant(value: &str) -> DateTime<Utc> {
        value.parse().expect("valid test instant")
    }

    #[test]
    fn expiry_instant_is_midnight_utc() {
        assert_eq!(
            expiry_instant(date("2024-06-15")),
            instant("2024-06-15T00:00:00Z")
        );
    }

    #[test]
    fn due_half_an_hour_after_expiry() {
        let window = ExpiryWindow::default();
        assert!(window.is_due(date("2024-06-15"), instant("2024-06-15T00:30:00Z")));
    }

    #[test]
    fn not_due_before_expiry() {
        let window = ExpiryWindow::default();
        assert!(!window.is_due(date("2024-06-15"), instant("2024-06-14T23:30:00Z")));
    }

    #[test]
    fn not_due_once_grace_span_elapsed() {
        let window = ExpiryWindow::default();
        assert!(!window.is_due(date("2024-06-15"), instant("2024-06-15T01:30:00Z")));
    }

    #[test]
    fn due_exactly_at_expiry_instant() {
        let window = ExpiryWindow::default();
        assert!(window.is_due(date("2024-06-15"), instant("2024-06-15T00:00:00Z")));
    }

    #[test]
    fn not_due_exactly_at_end_of_grace_span() {
        let window = ExpiryWindow::default();
        assert!(!window.is_due(date("2024-06-15"), instant("2024-06-15T01:00:00Z")));
    }

    #[test]
    fn grace_span_is_configurable() {
        let window = ExpiryWindow::new(Duration::hours(6));
        assert!(window.is_due(date("2024-06-15"), instant("2024-06-15T05:59:59Z")));
        assert!(!window.is_due(date("2024-06-15"), instant("2024-06-15T06:00:00Z")));
    }

    #[test]
    fn stale_backlog_is_never_due() {
        let window = ExpiryWindow::default();
        assert!(!window.is_due(date("2019-01-01"), instant("2024-06-15T00:30:00Z")));
    }

    #[test]
    fn candidate_date_bounds_cover_the_eligible_range() {
        let window = ExpiryWindow::default();
        let now = instant("2024-06-15T00:30:00Z");
        assert_eq!(window.earliest_candidate_date(now), date("2024-06-14"));
        assert_eq!(window.latest_candidate_date(now), date("2024-06-15"));
    }
}
