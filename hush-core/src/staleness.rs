//! Trust record staleness policy.
//!
//! A record is refreshed when the last check failed and is older than the
//! failure expiry, or when any check is older than the success expiry.
//! Failed checks therefore retry sooner than successful ones go stale.

use hush_types::TrustRecord;
use std::time::Duration;

/// Default age after which a successful check is redone (24 hours).
pub const DEFAULT_SUCCESS_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Default age after which a failed check is retried (1 hour).
pub const DEFAULT_FAILURE_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Dual-expiry staleness rule for cached trust records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    success_expiry: Duration,
    failure_expiry: Duration,
}

impl StalenessPolicy {
    /// Create a policy with the given expiries.
    pub fn new(success_expiry: Duration, failure_expiry: Duration) -> Self {
        Self {
            success_expiry,
            failure_expiry,
        }
    }

    /// Age after which a successful check goes stale.
    pub fn success_expiry(&self) -> Duration {
        self.success_expiry
    }

    /// Age after which a failed check is retried.
    pub fn failure_expiry(&self) -> Duration {
        self.failure_expiry
    }

    /// Decide whether `record` must be re-verified at `now` (unix seconds).
    ///
    /// A record checked in the future (clock skew) counts as fresh.
    pub fn needs_refresh(&self, record: &TrustRecord, now: u64) -> bool {
        let age = now.saturating_sub(record.last_checked_at);
        let failed_and_expired = !record.is_ok() && age > self.failure_expiry.as_secs();
        failed_and_expired || age > self.success_expiry.as_secs()
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SUCCESS_EXPIRY, DEFAULT_FAILURE_EXPIRY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_types::{IdentityId, TrustStatus};

    const NOW: u64 = 1_700_000_000;
    const HOUR: u64 = 3600;

    fn record(status: TrustStatus, checked_secs_ago: u64) -> TrustRecord {
        TrustRecord {
            identity: IdentityId::random(),
            status,
            last_checked_at: NOW - checked_secs_ago,
            last_success_at: None,
        }
    }

    #[test]
    fn failed_two_hours_ago_is_refreshed() {
        let policy = StalenessPolicy::default();
        assert!(policy.needs_refresh(&record(TrustStatus::Failed, 2 * HOUR), NOW));
    }

    #[test]
    fn ok_two_hours_ago_is_fresh() {
        let policy = StalenessPolicy::default();
        assert!(!policy.needs_refresh(&record(TrustStatus::Ok, 2 * HOUR), NOW));
    }

    #[test]
    fn ok_past_success_expiry_is_refreshed() {
        let policy = StalenessPolicy::default();
        assert!(policy.needs_refresh(&record(TrustStatus::Ok, 25 * HOUR), NOW));
    }

    #[test]
    fn unknown_is_treated_as_failure() {
        let policy = StalenessPolicy::default();
        assert!(policy.needs_refresh(&record(TrustStatus::Unknown, 2 * HOUR), NOW));
        assert!(!policy.needs_refresh(&record(TrustStatus::Unknown, 30 * 60), NOW));
    }

    #[test]
    fn boundary_is_exclusive() {
        let policy = StalenessPolicy::default();
        assert!(!policy.needs_refresh(&record(TrustStatus::Failed, HOUR), NOW));
        assert!(policy.needs_refresh(&record(TrustStatus::Failed, HOUR + 1), NOW));
    }

    #[test]
    fn future_check_is_fresh() {
        let policy = StalenessPolicy::default();
        let mut r = record(TrustStatus::Failed, 0);
        r.last_checked_at = NOW + 10 * HOUR;
        assert!(!policy.needs_refresh(&r, NOW));
    }

    #[test]
    fn success_expiry_applies_to_failures_too() {
        // Misconfigured: failure expiry longer than success expiry.
        let policy = StalenessPolicy::new(
            Duration::from_secs(HOUR),
            Duration::from_secs(10 * HOUR),
        );
        assert!(policy.needs_refresh(&record(TrustStatus::Failed, 2 * HOUR), NOW));
    }
}
