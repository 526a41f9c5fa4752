use super::BackoffPolicy;
use std::time::Duration;

/// 指数退避策略
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }
}

impl BackoffPolicy for ExponentialBackoffPolicy {
    fn backoff_duration(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(10);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy =
            ExponentialBackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(5), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(500), Duration::from_secs(1));
    }

    #[test]
    fn huge_base_delay_saturates_at_max() {
        let policy = ExponentialBackoffPolicy::new(
            Duration::from_millis(u64::MAX / 2),
            Duration::from_secs(30),
        );
        assert_eq!(policy.backoff_duration(10), Duration::from_secs(30));

        let uncapped = ExponentialBackoffPolicy::new(Duration::from_secs(u64::MAX / 4), Duration::MAX);
        assert_eq!(uncapped.backoff_duration(10), Duration::MAX);
    }
}
