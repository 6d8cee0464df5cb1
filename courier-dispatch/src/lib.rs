//! Reliable message dispatch
//!
//! This crate takes a message and a roster of interchangeable providers and:
//! - Suppresses duplicate messages by content fingerprint
//! - Throttles dispatches to a configured rate
//! - Retries a failing provider with exponential backoff
//! - Fails over to the next provider once retries are exhausted
//!
//! Everything observable is reported as a [`DispatchEvent`] to an
//! [`EventSink`]; nothing is rendered here.

mod dispatcher;
mod error;
mod events;
mod idempotency;
pub mod policy;
pub mod provider;
mod rate_limiter;
mod retry;
mod rotator;
mod stats;

// Re-export core types
pub use dispatcher::{DispatchConfig, DispatchOutcome, Dispatcher};
// Re-export error types
pub use error::{DeliveryError, DispatchError, PermanentError, TemporaryError};
// Re-export event types
pub use events::{BroadcastSink, DispatchEvent, EventKind, EventSink, FanoutSink, Status, TracingSink};
pub use idempotency::{IdempotencyCache, IdempotencyPolicy};
pub use policy::RetryPolicy;
pub use provider::{Provider, ProviderConfig};
pub use rate_limiter::{RateLimitStats, RateLimitStrategy, RateLimiter};
pub use retry::{Delivered, Exhausted, RetryEngine};
pub use rotator::ProviderRotator;
pub use stats::{DispatchStats, OutcomeStats, ProviderStats};

pub use courier_common::{Fingerprint, Message};
