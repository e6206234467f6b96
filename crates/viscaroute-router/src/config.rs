use std::time::Duration;

use viscaroute_frame::Address;

/// How long to pause after a destination reports a hangup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay after every hangup.
    Fixed(Duration),
    /// `initial * 2^attempt`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Delay before the `attempt`-th retry (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed(Duration::from_millis(100))
    }
}

/// Delivery settings shared by every send.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Bound on waiting for a destination to accept a write.
    pub write_timeout: Duration,
    /// Pause applied after a destination hangs up.
    pub hangup_backoff: BackoffPolicy,
    /// Device that controller-originated frames go to.
    pub target: Address,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(1000),
            hangup_backoff: BackoffPolicy::default(),
            target: Address::FIRST_DEVICE,
        }
    }
}

/// Execution-unit settings.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Bound on each readiness wait; also the cancellation latency.
    pub poll_timeout: Duration,
    /// Largest single read from a channel.
    pub read_chunk: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            read_chunk: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(50));
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn defaults() {
        let router = RouterConfig::default();
        assert_eq!(router.write_timeout, Duration::from_secs(1));
        assert_eq!(router.target.get(), 1);

        let harness = HarnessConfig::default();
        assert_eq!(harness.poll_timeout, Duration::from_secs(1));
        assert_eq!(harness.read_chunk, 1024);
    }
}
