//! Typed error handling for dispatch operations.
//!
//! Two layers are distinguished:
//! - [`DeliveryError`] is what a single provider call returns. It is split into
//!   temporary failures (retried with backoff) and permanent failures (the
//!   provider's attempt cycle ends immediately).
//! - [`DispatchError`] covers the dispatcher itself: construction problems and
//!   the terminal "every provider failed" outcome.

use thiserror::Error;

/// Failure of one provider `send` call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Failure that may succeed on a later attempt.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// Failure that no amount of retrying against this provider will fix.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),
}

/// Failures worth retrying against the same provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemporaryError {
    /// The provider could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The provider is up but refused to take work right now.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The provider throttled us.
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// The call did not finish within the configured attempt timeout.
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

/// Failures that end the attempt cycle for the current provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermanentError {
    /// The provider will never accept this recipient.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The provider rejected the content (policy, size, ...).
    #[error("Message rejected: {0}")]
    MessageRejected(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Errors raised by the dispatcher itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// A dispatcher needs at least one provider to rotate through.
    #[error("Provider roster is empty")]
    EmptyRoster,

    /// One full circuit of the roster ended without a successful delivery.
    #[error("All {providers} providers exhausted after {attempts} attempts")]
    AllProvidersExhausted { providers: usize, attempts: u32 },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}
