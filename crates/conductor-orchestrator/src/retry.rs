use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry ceiling and exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt, unless a submission overrides it.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue as retry number `retry_count` after `delay`.
    Retry {
        /// Retry count the entry will carry.
        retry_count: u32,
        /// How long to wait before requeueing.
        delay: Duration,
    },
    /// Give up and mark the task failed.
    GiveUp,
}

impl RetryPolicy {
    /// Delay before retry number `retry_count`: `min(base * 2^retry_count, max)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let ms = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(retry_count))
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    /// Decides the fate of an attempt that failed with `retry_count` earlier failures.
    pub fn decide(&self, retry_count: u32, override_max: Option<u32>) -> RetryDecision {
        let max_retries = override_max.unwrap_or(self.max_retries);
        if retry_count < max_retries {
            let next = retry_count + 1;
            RetryDecision::Retry {
                retry_count: next,
                delay: self.backoff(next),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn one_second_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }

    #[test]
    fn test_three_failures_back_off_2_4_8_then_give_up() {
        let policy = one_second_policy();
        let mut retry_count = 0;
        let mut delays = Vec::new();
        while let RetryDecision::Retry { retry_count: next, delay } = policy.decide(retry_count, None) {
            delays.push(delay.as_secs());
            retry_count = next;
        }
        assert_eq!(delays, vec![2, 4, 8]);
        assert_eq!(retry_count, 3);
        assert_eq!(policy.decide(3, None), RetryDecision::GiveUp);
    }

    #[test]
    fn test_backoff_is_capped_and_monotonic() {
        let policy = one_second_policy();
        let delays: Vec<Duration> = (0..12).map(|k| policy.backoff(k)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(policy.backoff(5), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_override_zero_means_no_retries() {
        let policy = one_second_policy();
        assert_eq!(policy.decide(0, Some(0)), RetryDecision::GiveUp);
        assert!(matches!(policy.decide(4, Some(5)), RetryDecision::Retry { retry_count: 5, .. }));
    }

    #[test]
    fn test_defaults_from_empty_config() {
        let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, RetryPolicy::default());
    }
}
