//! Exponential backoff between attempts on the same endpoint
//!
//! The number of attempts is not decided here; it comes from the node's
//! `FT-Retries` constraint. This only spaces the attempts out.

use std::time::Duration;

use crate::config::EngineConfig;

/// Delay schedule between retries
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt (2.0 doubles the delay each time)
    pub multiplier: f64,
    /// Randomness factor (0.0 to 1.0) applied around the computed delay
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl Backoff {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            multiplier: config.retry_backoff_multiplier,
            ..Self::default()
        }
    }

    /// No waiting at all (tests, simulations)
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay after the given failed attempt (0-indexed)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::random::<f64>() * range * 2.0 - range;
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(jittered as u64)
    }
}
