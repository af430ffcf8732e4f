use std::time::Duration;

use rand::Rng;

/// Extra backoff applied when the endpoint said it was rate limiting us.
pub const RATE_LIMIT_MULTIPLIER: f64 = 1.5;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay
    pub max_delay: Duration,
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Jitter as a fraction of the delay, applied symmetrically
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            max_attempts: 5,
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Delay after the failed 0-indexed `attempt`.
    ///
    /// `sample` is a jitter draw in `[-1, 1]`; see [`jitter_sample`].
    pub fn delay_for_attempt(&self, attempt: u32, rate_limited: bool, sample: f64) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(62) as i32);
        let mut delay = exponential.min(self.max_delay.as_secs_f64());
        if rate_limited {
            delay *= RATE_LIMIT_MULTIPLIER;
        }
        delay *= 1.0 + self.jitter_fraction * sample.clamp(-1.0, 1.0);
        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// Uniform draw in `[-1, 1]`.
pub fn jitter_sample() -> f64 {
    rand::thread_rng().gen_range(-1.0..=1.0)
}
