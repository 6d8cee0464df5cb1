//! Dispatch rate limiting
//!
//! Two strategies are available:
//!
//! - **Fixed window** (default): at most `limit` dispatches per window. The
//!   counter resets on a fixed cadence measured from the limiter's creation,
//!   whether or not anything was dispatched. Up to `2 × limit` dispatches can
//!   therefore land in a short span straddling a reset.
//! - **Token bucket**: tokens refill continuously at `messages_per_second` up
//!   to `burst_size`; each dispatch consumes one.
//!
//! # Example
//!
//! ```text
//! Fixed window: limit 2, window 60s
//! t=0s:   consume -> ok (1/2)
//! t=1s:   consume -> ok (2/2)
//! t=2s:   consume -> rejected
//! t=60s:  window rolls over, counter = 0
//! t=61s:  consume -> ok (1/2)
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::DispatchError;

/// Rate limiting configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RateLimitStrategy {
    FixedWindow {
        /// Dispatches allowed per window
        #[serde(default = "default_limit")]
        limit: u32,
        /// Window length (milliseconds)
        #[serde(default = "default_window_ms")]
        window_ms: u64,
    },
    TokenBucket {
        /// Sustained rate
        messages_per_second: f64,
        /// Maximum tokens in the bucket
        burst_size: u32,
    },
}

impl Default for RateLimitStrategy {
    fn default() -> Self {
        Self::FixedWindow {
            limit: default_limit(),
            window_ms: default_window_ms(),
        }
    }
}

const fn default_limit() -> u32 {
    10
}

const fn default_window_ms() -> u64 {
    60_000
}

impl RateLimitStrategy {
    /// # Errors
    ///
    /// Returns [`DispatchError::Configuration`] for a zero-length window or a
    /// non-positive refill rate.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match *self {
            Self::FixedWindow { window_ms: 0, .. } => Err(DispatchError::Configuration(
                "rate_limit.window_ms must be greater than 0".to_string(),
            )),
            Self::TokenBucket {
                messages_per_second,
                ..
            } if !messages_per_second.is_finite() || messages_per_second <= 0.0 => {
                Err(DispatchError::Configuration(format!(
                    "rate_limit.messages_per_second must be positive, got {messages_per_second}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Counter reset on a fixed cadence
#[derive(Debug)]
struct FixedWindow {
    limit: u32,
    window: Duration,
    count: u32,
    window_start: Instant,
}

impl FixedWindow {
    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Move `window_start` to the boundary of the window containing `now`,
    /// clearing the counter if at least one boundary was crossed.
    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return;
        }

        let periods = elapsed.as_nanos() / self.window.as_nanos().max(1);
        let periods = u32::try_from(periods).unwrap_or(u32::MAX);
        self.window_start += self.window.saturating_mul(periods);
        self.count = 0;
    }

    fn try_consume(&mut self) -> bool {
        self.roll(Instant::now());

        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        let now = Instant::now();
        self.roll(now);

        if self.count < self.limit {
            Duration::ZERO
        } else {
            (self.window_start + self.window).saturating_duration_since(now)
        }
    }
}

/// Continuously refilling token bucket
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(messages_per_second: f64, burst_size: u32) -> Self {
        let capacity = f64::from(burst_size);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: messages_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        let tokens_needed = 1.0 - self.tokens;
        Duration::from_secs_f64(tokens_needed / self.refill_rate)
    }
}

#[derive(Debug)]
enum Limiter {
    FixedWindow(FixedWindow),
    TokenBucket(TokenBucket),
}

/// Process-wide dispatch throttle.
///
/// Consuming and window resets happen under the same lock, so concurrent
/// dispatches can never push the counter past the limit.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<Limiter>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(strategy: RateLimitStrategy) -> Self {
        let limiter = match strategy {
            RateLimitStrategy::FixedWindow { limit, window_ms } => {
                Limiter::FixedWindow(FixedWindow::new(limit, Duration::from_millis(window_ms)))
            }
            RateLimitStrategy::TokenBucket {
                messages_per_second,
                burst_size,
            } => Limiter::TokenBucket(TokenBucket::new(messages_per_second, burst_size)),
        };

        Self {
            state: Mutex::new(limiter),
        }
    }

    /// Take one dispatch slot. Returns `false`, leaving the state untouched,
    /// when none is available.
    pub fn try_consume(&self) -> bool {
        match &mut *self.state.lock() {
            Limiter::FixedWindow(window) => window.try_consume(),
            Limiter::TokenBucket(bucket) => bucket.try_consume(),
        }
    }

    /// How long until [`Self::try_consume`] could next succeed.
    pub fn time_until_available(&self) -> Duration {
        match &mut *self.state.lock() {
            Limiter::FixedWindow(window) => window.time_until_available(),
            Limiter::TokenBucket(bucket) => bucket.time_until_available(),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn stats(&self) -> RateLimitStats {
        match &mut *self.state.lock() {
            Limiter::FixedWindow(window) => {
                window.roll(Instant::now());
                RateLimitStats {
                    available: window.limit - window.count.min(window.limit),
                    capacity: window.limit,
                }
            }
            Limiter::TokenBucket(bucket) => {
                bucket.refill();
                RateLimitStats {
                    available: bucket.tokens.floor() as u32,
                    capacity: bucket.capacity as u32,
                }
            }
        }
    }
}

/// Snapshot of the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStats {
    /// Dispatches that would currently be allowed
    pub available: u32,
    /// Dispatches allowed per window (or burst size)
    pub capacity: u32,
}
