use std::time::Duration;

/// How many times to try connecting and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until cancelled.
    pub max_attempts: Option<u32>,
    pub delay: Duration,
    /// Upper bound for the doubled delay. Equal to `delay` for a fixed backoff.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
            max_delay: delay,
        }
    }

    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
            max_delay: delay,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.delay);
        self
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_another(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(5, Duration::from_secs(5))
    }
}
