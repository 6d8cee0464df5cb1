use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use courier_common::{Message, outgoing};
use rand::Rng;

use super::Provider;
use crate::error::{DeliveryError, PermanentError, TemporaryError};

/// Stand-in for a real transport with scripted failures.
///
/// The first `fail_first` calls fail; after that each call fails with
/// probability `failure_rate`. Failures are temporary unless
/// `permanent` is set.
#[derive(Debug)]
pub struct SimulatedProvider {
    name: String,
    fail_first: u32,
    failure_rate: f64,
    permanent: bool,
    latency: Duration,
    calls: AtomicU32,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_first: 0,
            failure_rate: 0.0,
            permanent: false,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// A provider whose every call fails.
    pub fn failing(name: impl Into<String>) -> Self {
        Self::new(name).with_failure_rate(1.0)
    }

    #[must_use]
    pub const fn with_fail_first(mut self, fail_first: u32) -> Self {
        self.fail_first = fail_first;
        self
    }

    /// Clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub const fn with_permanent_failures(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }

    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of `send` calls made so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn should_fail(&self, call: u32) -> bool {
        if call <= self.fail_first {
            return true;
        }

        self.failure_rate >= 1.0
            || (self.failure_rate > 0.0 && rand::rng().random_bool(self.failure_rate))
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.should_fail(call) {
            outgoing!(
                level = DEBUG,
                provider = %self.name,
                recipient = %message.recipient(),
                call,
                "Simulated failure"
            );

            return Err(if self.permanent {
                PermanentError::MessageRejected(format!("{} rejected the message", self.name))
                    .into()
            } else {
                TemporaryError::Unavailable(format!("{} is unavailable", self.name)).into()
            });
        }

        outgoing!(
            level = DEBUG,
            provider = %self.name,
            recipient = %message.recipient(),
            call,
            "Simulated delivery"
        );
        Ok(())
    }
}
