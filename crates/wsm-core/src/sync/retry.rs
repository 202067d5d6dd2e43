//! Retry schedule for the head of the sync queue

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
const DEFAULT_MAX_DELAY_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_STUCK_AFTER_ATTEMPTS: u32 = 5;

/// Exponential backoff with a cap, plus the attempt count after which the
/// head operation is reported as stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub stuck_after_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            stuck_after_attempts: DEFAULT_STUCK_AFTER_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt after `attempts` consecutive failures.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempts - 1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub const fn is_stuck(&self, attempts: u32) -> bool {
        attempts >= self.stuck_after_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(9), Duration::from_secs(300));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn stuck_threshold() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_stuck(4));
        assert!(policy.is_stuck(5));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"base_delay_ms": 500}"#).unwrap();
        assert_eq!(policy.base_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, DEFAULT_MAX_DELAY_MS);
        assert_eq!(policy.stuck_after_attempts, DEFAULT_STUCK_AFTER_ATTEMPTS);
    }
}
