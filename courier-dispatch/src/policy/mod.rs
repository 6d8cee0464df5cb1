//! Policy abstractions for dispatch.
//!
//! Each policy is plain configuration plus pure helpers. Runtime state lives in
//! the component that applies the policy.
//!
//! - [`RetryPolicy`]: attempts per provider and backoff timing
//! - [`RateLimitStrategy`]: how dispatches are throttled
//! - [`IdempotencyPolicy`]: how long fingerprints are remembered

pub mod retry;

pub use retry::RetryPolicy;

pub use crate::{idempotency::IdempotencyPolicy, rate_limiter::RateLimitStrategy};
