use std::time::Duration;

/// Delay schedule for caller-initiated reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub max: Duration,
    /// Total connection attempts, including the first
    pub max_attempts: u32,
}

impl Backoff {
    pub const fn new(initial: Duration, factor: u32, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            factor,
            max,
            max_attempts,
        }
    }

    /// A single attempt, no retries
    pub const fn none() -> Self {
        Self::new(Duration::ZERO, 1, Duration::ZERO, 1)
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 0..retry {
            delay = delay.saturating_mul(self.factor);
            if delay >= self.max {
                return self.max;
            }
        }
        delay.min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), 2, Duration::from_secs(8), 5)
    }
}
