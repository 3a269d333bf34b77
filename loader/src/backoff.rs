//! Exponential backoff with jitter
//!
//! Used by the bulk indexer to space out resubmission of documents that
//! failed with a transient error.

use rand::Rng;
use std::time::Duration;

/// Retry schedule for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Maximum retry attempts after the initial submission (0 = no retries)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive retries
    pub multiplier: f64,
    /// Fraction of the delay randomized in both directions (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Whether a document that has already been retried `retries_so_far`
    /// times may be retried again.
    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before retry number `retry` (1-based), with jitter applied
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.delay_with_rng(retry, &mut rand::thread_rng())
    }

    /// Same as [`delay_for`](Self::delay_for) with a caller-supplied RNG
    pub fn delay_with_rng<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let factor = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
        let jittered = (base * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(jittered)
    }
}
