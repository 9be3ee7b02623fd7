//! Retry backoff curve shared by the Outbox and Inbox dispatchers (spec
//! §4.1: "default `min(cap, 2^retryCount)` seconds, cap configurable").

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub cap_seconds: u64,
    pub max_attempts: i32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            cap_seconds: 3600,
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the retry count the row will
    /// carry after this reschedule (i.e. `retryCount + 1` from spec §4.9
    /// step 4).
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exp = retry_count.clamp(0, 62) as u32;
        let seconds = 2u64.saturating_pow(exp).min(self.cap_seconds);
        Duration::from_secs(seconds)
    }

    pub fn exhausted(&self, retry_count: i32) -> bool {
        retry_count + 1 >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let policy = BackoffPolicy {
            cap_seconds: 30,
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(20), Duration::from_secs(30));
    }

    #[test]
    fn exhausted_at_max_attempts() {
        let policy = BackoffPolicy {
            cap_seconds: 30,
            max_attempts: 3,
        };
        assert!(!policy.exhausted(0));
        assert!(!policy.exhausted(1));
        assert!(policy.exhausted(2));
    }
}
