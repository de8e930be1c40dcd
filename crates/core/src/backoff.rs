//! Webhook retry backoff policy.
//!
//! The schedule length caps total attempts and entry `k - 1` is the delay
//! scheduled after the k-th failed attempt: a default-policy delivery
//! retries 1m, 5m, 25m, and 2h after its first four failures and the
//! fifth failure finalizes it as permanently failed, so a sixth attempt
//! never runs. The schedule is a configuration list; these values are the
//! fixed default.

use std::time::Duration;

/// Default delays between successive failed attempts, in seconds.
const DEFAULT_SCHEDULE_SECS: [u64; 5] = [60, 300, 1_500, 7_200, 36_000];

/// Retry timing policy for webhook deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
}

impl RetryPolicy {
    /// Build a policy from an explicit schedule.
    ///
    /// An empty schedule means every delivery fails permanently on its
    /// first unsuccessful attempt.
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    /// Maximum number of attempts before a delivery is finalized as failed.
    pub fn max_attempts(&self) -> u32 {
        self.schedule.len() as u32
    }

    /// Delay before the next attempt, given the number of attempts already
    /// made (post-increment: the first failure passes `retry_count = 1`).
    ///
    /// Returns `None` once `retry_count` reaches [`max_attempts`], at
    /// which point the budget is spent and the delivery must be finalized
    /// as failed.
    ///
    /// [`max_attempts`]: RetryPolicy::max_attempts
    pub fn delay_after(&self, retry_count: u32) -> Option<Duration> {
        if retry_count == 0 || retry_count >= self.max_attempts() {
            return None;
        }
        self.schedule.get(retry_count as usize - 1).copied()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_SCHEDULE_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(60)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(300)));
        assert_eq!(policy.delay_after(3), Some(Duration::from_secs(1_500)));
        assert_eq!(policy.delay_after(4), Some(Duration::from_secs(7_200)));
    }

    #[test]
    fn fifth_failure_exhausts_the_budget() {
        // The count reaching the cutoff finalizes; no fifth delay is
        // handed out even though the schedule has a fifth entry.
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(5), None);
        assert_eq!(policy.delay_after(6), None);
    }

    #[test]
    fn zero_retries_has_no_delay() {
        // delay_after is indexed by attempts already made; 0 is not a
        // failed attempt.
        assert_eq!(RetryPolicy::default().delay_after(0), None);
    }

    #[test]
    fn custom_schedule_respected() {
        let policy = RetryPolicy::new(vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(2), None);
    }

    #[test]
    fn empty_schedule_fails_immediately() {
        let policy = RetryPolicy::new(Vec::new());
        assert_eq!(policy.max_attempts(), 0);
        assert_eq!(policy.delay_after(1), None);
    }
}
