//! Retry policy for provider attempts.
//!
//! Keeps the retry configuration and the backoff arithmetic in one place so it
//! can be reasoned about independently of the engine that sleeps on it.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// How many times a single provider is tried, and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per provider before rotating to the next one.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt (milliseconds).
    ///
    /// The delay after attempt `k` is `base * multiplier^(k - 1)`.
    ///
    /// Default: 1000
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor between consecutive delays.
    ///
    /// Default: 2.0
    #[serde(default = "defaults::backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay (milliseconds). `None` means uncapped.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,

    /// Randomizes each delay within ±`jitter_factor`.
    ///
    /// Default: 0.0 (exact delays)
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            backoff_multiplier: defaults::backoff_multiplier(),
            max_delay_ms: None,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Reject configurations the engine cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Configuration`] when `max_attempts` is zero,
    /// the multiplier is below 1 or not finite, or the jitter factor is
    /// outside `0.0..=1.0`.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_attempts == 0 {
            return Err(DispatchError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(DispatchError::Configuration(format!(
                "retry.backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(DispatchError::Configuration(format!(
                "retry.jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            )));
        }

        Ok(())
    }

    /// Whether another attempt is allowed after `attempt_count` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Attempts left after `attempt_count` attempts.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt_count)
    }

    /// Whether the next attempt would be the last one.
    #[must_use]
    pub const fn is_final_attempt(&self, attempt_count: u32) -> bool {
        attempt_count + 1 >= self.max_attempts
    }

    /// Exact backoff after the failed attempt `attempt` (1-indexed), before
    /// jitter.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = (self.base_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        let cap = self.max_delay_ms.unwrap_or(u64::MAX);

        let millis = if millis.is_finite() && millis < cap as f64 {
            millis as u64
        } else {
            cap
        };

        Duration::from_millis(millis)
    }

    /// Backoff after the failed attempt `attempt`, with jitter applied.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter_factor <= 0.0 {
            return delay;
        }

        let millis = delay.as_millis() as f64;
        let jitter_range = millis * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        Duration::from_millis((millis + jitter).max(0.0) as u64)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        1000
    }

    pub const fn backoff_multiplier() -> f64 {
        2.0
    }
}
