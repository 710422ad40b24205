//! Exponential backoff state

use std::time::Duration;

/// Backoff parameters for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Penalty after the first throttle signal
    pub initial: Duration,
    /// Upper bound on the penalty
    pub ceiling: Duration,
    /// Consecutive successes that clear the penalty
    pub reset_after: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            reset_after: 5,
        }
    }
}

impl BackoffPolicy {
    /// Set the initial penalty
    pub fn initial(mut self, d: Duration) -> Self {
        self.initial = d;
        self
    }

    /// Set the maximum penalty
    pub fn ceiling(mut self, d: Duration) -> Self {
        self.ceiling = d;
        self
    }

    /// Set how many consecutive successes clear the penalty
    pub fn reset_after(mut self, n: u32) -> Self {
        self.reset_after = n;
        self
    }

    /// Delay before retry `attempt` (1-based), doubling from `initial`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..attempt {
            delay = (delay * 2).min(self.ceiling);
        }
        delay.min(self.ceiling)
    }
}

/// Penalty tracker driven by throttle and success reports
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    penalty: Duration,
    successes: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            penalty: Duration::ZERO,
            successes: 0,
        }
    }

    /// Current minimum spacing between requests
    pub fn penalty(&self) -> Duration {
        self.penalty
    }

    /// Record a throttle signal, returning the new penalty
    pub fn on_throttled(&mut self) -> Duration {
        self.successes = 0;
        self.penalty = if self.penalty.is_zero() {
            self.policy.initial
        } else {
            (self.penalty * 2).min(self.policy.ceiling)
        };
        self.penalty
    }

    /// Record a successful request
    pub fn on_success(&mut self) {
        if self.penalty.is_zero() {
            return;
        }
        self.successes += 1;
        if self.successes >= self.policy.reset_after {
            self.penalty = Duration::ZERO;
            self.successes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default()
            .initial(Duration::from_millis(100))
            .ceiling(Duration::from_millis(350))
            .reset_after(2)
    }

    #[test]
    fn test_penalty_doubles_up_to_ceiling() {
        let mut b = Backoff::new(policy());
        assert_eq!(b.penalty(), Duration::ZERO);
        assert_eq!(b.on_throttled(), Duration::from_millis(100));
        assert_eq!(b.on_throttled(), Duration::from_millis(200));
        assert_eq!(b.on_throttled(), Duration::from_millis(350));
        assert_eq!(b.on_throttled(), Duration::from_millis(350));
    }

    #[test]
    fn test_successes_clear_penalty() {
        let mut b = Backoff::new(policy());
        b.on_throttled();
        b.on_success();
        assert_eq!(b.penalty(), Duration::from_millis(100));
        b.on_success();
        assert_eq!(b.penalty(), Duration::ZERO);
    }

    #[test]
    fn test_throttle_resets_success_streak() {
        let mut b = Backoff::new(policy());
        b.on_throttled();
        b.on_success();
        b.on_throttled();
        b.on_success();
        assert_eq!(b.penalty(), Duration::from_millis(200));
    }

    #[test]
    fn test_delay_for_attempt() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(5), Duration::from_millis(350));
    }
}
