//! Bounded, sequential attempts against one provider with exponential backoff.

use std::time::Duration;

use courier_common::{Message, internal};
use ulid::Ulid;

use crate::{
    error::{DeliveryError, TemporaryError},
    events::{DispatchEvent, EventKind, EventSink},
    policy::RetryPolicy,
    provider::Provider,
    stats::DispatchStats,
};

/// The provider accepted the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub attempts: u32,
}

/// The provider's attempt cycle ended without success.
///
/// This is an expected outcome; the dispatcher answers it by rotating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    pub attempts: u32,
    pub last_error: DeliveryError,
}

pub struct RetryEngine<'a> {
    policy: &'a RetryPolicy,
    attempt_timeout: Option<Duration>,
    sink: &'a dyn EventSink,
    stats: &'a DispatchStats,
}

impl<'a> RetryEngine<'a> {
    pub fn new(
        policy: &'a RetryPolicy,
        attempt_timeout: Option<Duration>,
        sink: &'a dyn EventSink,
        stats: &'a DispatchStats,
    ) -> Self {
        Self {
            policy,
            attempt_timeout,
            sink,
            stats,
        }
    }

    /// Try `provider` up to `max_attempts` times.
    ///
    /// Every failure is reported to the sink and followed by the backoff for
    /// that attempt, the last one included. A permanent failure ends the cycle
    /// at once, without backing off.
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] when no attempt succeeded.
    pub async fn attempt(
        &self,
        dispatch_id: Ulid,
        message: &Message,
        provider: &dyn Provider,
    ) -> Result<Delivered, Exhausted> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = self.call(provider, message).await;
            self.stats.record_attempt(provider.name(), result.is_ok());

            let error = match result {
                Ok(()) => return Ok(Delivered { attempts: attempt }),
                Err(error) => error,
            };

            let retry_in = error
                .is_temporary()
                .then(|| self.policy.jittered_delay(attempt));

            self.sink.on_event(&DispatchEvent::new(
                dispatch_id,
                message,
                EventKind::AttemptFailed {
                    provider: provider.name().to_string(),
                    attempt,
                    max_attempts: self.policy.max_attempts,
                    error: error.clone(),
                    retry_in,
                },
            ));

            let Some(delay) = retry_in else {
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            };

            internal!(
                level = DEBUG,
                dispatch_id = %dispatch_id,
                provider = %provider.name(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Backing off"
            );
            tokio::time::sleep(delay).await;

            if !self.policy.should_retry(attempt) {
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
        }
    }

    async fn call(&self, provider: &dyn Provider, message: &Message) -> Result<(), DeliveryError> {
        let Some(timeout) = self.attempt_timeout else {
            return provider.send(message).await;
        };

        tokio::time::timeout(timeout, provider.send(message))
            .await
            .unwrap_or_else(|_| {
                Err(TemporaryError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                )
                .into())
            })
    }
}
