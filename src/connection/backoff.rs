//! Reconnect delay calculation
//!
//! `delay(attempt) = min(max_delay, base_delay * 2^(attempt-1))`, and the
//! actual wait is `delay / 2 + random * delay * jitter_factor`. With the
//! defaults (500ms, 30s, 0.3) the first three waits fall in `[250, 400)`,
//! `[500, 800)` and `[1000, 1600)` milliseconds.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl Backoff {
    /// Create a backoff policy
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Un-jittered delay for a 1-based attempt number
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Wait before the given attempt, using `random` in `[0, 1)` as jitter
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let delay = self.base_delay_for(attempt);
        let jitter = delay.mul_f64(random.clamp(0.0, 1.0) * self.jitter_factor);
        delay / 2 + jitter
    }

    /// Wait before the given attempt, with fresh randomness
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_random(attempt, rand::random::<f64>())
    }
}

impl From<&ReconnectConfig> for Backoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.jitter_factor)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}
