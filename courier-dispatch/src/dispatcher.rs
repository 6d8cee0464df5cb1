//! Dispatch orchestration
//!
//! Ties the idempotency cache, the rate limiter, the retry engine and the
//! provider rotator together into a single `dispatch` operation.
//!
//! ## Stages
//!
//! 1. **Duplicate check**: the fingerprint is checked and recorded in one step
//! 2. **Rate limit**: one unit of the dispatch budget is consumed
//! 3. **Send cycle**: the retry engine drives the active provider
//! 4. **Rotation**: an exhausted cycle advances the roster and starts over on
//!    the next provider, at most once per provider
//!
//! A message whose fingerprint is recorded stays recorded even if every
//! provider fails; suppression is based on attempted delivery.

use std::{sync::Arc, time::Duration};

use courier_common::{Message, Signal, internal, tracing};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinSet,
};
use ulid::Ulid;

use crate::{
    error::DispatchError,
    events::{DispatchEvent, EventKind, EventSink, TracingSink},
    idempotency::{IdempotencyCache, IdempotencyPolicy},
    policy::RetryPolicy,
    provider::Provider,
    rate_limiter::{RateLimitStats, RateLimitStrategy, RateLimiter},
    retry::RetryEngine,
    rotator::ProviderRotator,
    stats::{DispatchStats, ProviderStats},
};

/// How long `serve` waits for in-flight dispatches after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatcher configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Attempts and backoff per provider
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Throttling of accepted messages
    #[serde(default)]
    pub rate_limit: RateLimitStrategy,

    /// Retention of fingerprints for duplicate suppression
    #[serde(default)]
    pub idempotency: IdempotencyPolicy,

    /// Upper bound for a single provider call (milliseconds).
    ///
    /// Default: None (wait for the provider indefinitely)
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

impl DispatchConfig {
    /// # Errors
    ///
    /// Returns the first [`DispatchError::Configuration`] found.
    pub fn validate(&self) -> Result<(), DispatchError> {
        self.retry.validate()?;
        self.rate_limit.validate()?;
        self.idempotency.validate()?;

        if self.attempt_timeout_ms == Some(0) {
            return Err(DispatchError::Configuration(
                "attempt_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Final result of one `dispatch` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Already dispatched earlier; nothing was sent.
    Duplicate,
    /// Dispatch budget exhausted; nothing was sent.
    RateLimited,
    Delivered {
        provider: String,
        /// Attempts across all providers, the successful one included
        attempts: u32,
        /// Providers given up on before `provider` succeeded
        rotations: u32,
    },
    Failed(DispatchError),
}

impl DispatchOutcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

struct Inner {
    config: DispatchConfig,
    cache: IdempotencyCache,
    limiter: RateLimiter,
    rotator: ProviderRotator,
    sink: Arc<dyn EventSink>,
    stats: DispatchStats,
}

/// Reliable dispatcher handle. Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("providers", &self.inner.rotator.names().collect::<Vec<_>>())
            .field("active", &self.inner.rotator.active_index())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher that reports to `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyRoster`] without providers, or
    /// [`DispatchError::Configuration`] for an invalid `config`.
    pub fn new(
        config: DispatchConfig,
        providers: Vec<Arc<dyn Provider>>,
    ) -> Result<Self, DispatchError> {
        Self::with_sink(config, providers, Arc::new(TracingSink))
    }

    /// Create a dispatcher that reports to `sink`.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::new`].
    pub fn with_sink(
        config: DispatchConfig,
        providers: Vec<Arc<dyn Provider>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let rotator = ProviderRotator::new(providers)?;

        internal!(
            level = INFO,
            providers = ?rotator.names().collect::<Vec<_>>(),
            max_attempts = config.retry.max_attempts,
            rate_limit = ?config.rate_limit,
            idempotency = ?config.idempotency,
            "Dispatcher initialised"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                cache: IdempotencyCache::new(config.idempotency),
                limiter: RateLimiter::new(config.rate_limit),
                rotator,
                sink,
                stats: DispatchStats::default(),
                config,
            }),
        })
    }

    /// Fire-and-forget dispatch.
    ///
    /// The outcome is only observable through the event sink. Must be called
    /// from within a Tokio runtime.
    pub fn send_email(
        &self,
        recipient: impl Into<Arc<str>>,
        subject: impl Into<Arc<str>>,
        body: impl Into<Arc<str>>,
    ) {
        let dispatcher = self.clone();
        let message = Message::new(recipient, subject, body);
        tokio::spawn(async move {
            dispatcher.dispatch(message).await;
        });
    }

    /// Dispatch `message` and wait for the final outcome.
    ///
    /// Never fails: every error is reported through the event sink and
    /// reflected in the returned [`DispatchOutcome`].
    #[tracing::instrument(level = "debug", skip_all, fields(recipient = %message.recipient()))]
    pub async fn dispatch(&self, message: Message) -> DispatchOutcome {
        let inner = &self.inner;
        let dispatch_id = Ulid::new();
        let fingerprint = message.fingerprint();

        if !inner.cache.check_and_record(fingerprint.clone()) {
            internal!(
                level = DEBUG,
                dispatch_id = %dispatch_id,
                fingerprint = %fingerprint,
                "Duplicate suppressed"
            );
            inner.stats.record_duplicate();
            self.emit(dispatch_id, &message, EventKind::Duplicate);
            return DispatchOutcome::Duplicate;
        }

        if !inner.limiter.try_consume() {
            inner.stats.record_rate_limited();
            self.emit(
                dispatch_id,
                &message,
                EventKind::RateLimited {
                    retry_after: inner.limiter.time_until_available(),
                },
            );
            return DispatchOutcome::RateLimited;
        }

        let engine = RetryEngine::new(
            &inner.config.retry,
            inner.config.attempt_timeout_ms.map(Duration::from_millis),
            inner.sink.as_ref(),
            &inner.stats,
        );

        let providers = inner.rotator.len();
        let mut total_attempts = 0;
        let mut tried = vec![false; providers];
        let (mut index, mut provider) = inner.rotator.current();

        // One cycle per provider. Concurrent dispatches move the shared roster
        // too, so the next provider is the first untried one from wherever the
        // roster now points.
        for cycle in 1..=providers {
            tried[index] = true;

            let exhausted = match engine.attempt(dispatch_id, &message, provider.as_ref()).await {
                Ok(delivered) => {
                    total_attempts += delivered.attempts;
                    inner.stats.record_delivered();
                    self.emit(
                        dispatch_id,
                        &message,
                        EventKind::Delivered {
                            provider: provider.name().to_string(),
                            attempts: total_attempts,
                        },
                    );

                    return DispatchOutcome::Delivered {
                        provider: provider.name().to_string(),
                        attempts: total_attempts,
                        rotations: u32::try_from(cycle - 1).unwrap_or(u32::MAX),
                    };
                }
                Err(exhausted) => exhausted,
            };

            total_attempts += exhausted.attempts;
            let (active, _) = inner.rotator.advance_past(index);

            tracing::warn!(
                dispatch_id = %dispatch_id,
                provider = %provider.name(),
                error = %exhausted.last_error,
                "Provider exhausted"
            );

            let Some(next_index) = (0..providers)
                .map(|step| (active + step) % providers)
                .find(|candidate| !tried[*candidate])
            else {
                break;
            };
            let next = inner.rotator.get(next_index);

            self.emit(
                dispatch_id,
                &message,
                EventKind::ProviderSwitched {
                    from: provider.name().to_string(),
                    to: next.name().to_string(),
                },
            );

            index = next_index;
            provider = next;
        }

        inner.stats.record_exhausted();
        self.emit(
            dispatch_id,
            &message,
            EventKind::AllProvidersExhausted {
                providers,
                attempts: total_attempts,
            },
        );

        DispatchOutcome::Failed(DispatchError::AllProvidersExhausted {
            providers,
            attempts: total_attempts,
        })
    }

    /// Dispatch everything arriving on `queue` until it closes or a shutdown
    /// signal is received.
    ///
    /// A closed `shutdown` channel is not a shutdown signal: serving then
    /// continues until `queue` closes. Each message runs in its own task. On shutdown, in-flight dispatches
    /// get up to 30 seconds to finish before they are aborted.
    pub async fn serve(
        &self,
        mut queue: mpsc::Receiver<Message>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) {
        internal!(level = INFO, "Dispatcher serving");

        let mut in_flight = JoinSet::new();
        let mut shutdown_open = true;

        loop {
            tokio::select! {
                message = queue.recv() => {
                    let Some(message) = message else {
                        internal!("Dispatch queue closed");
                        break;
                    };

                    let dispatcher = self.clone();
                    in_flight.spawn(async move { dispatcher.dispatch(message).await });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Dispatch task failed: {e}");
                    }
                }
                sig = shutdown.recv(), if shutdown_open => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Dispatcher received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Dispatcher shutdown channel lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // Nobody can signal shutdown any more; serve until the queue closes
                            internal!(level = DEBUG, "Dispatcher shutdown channel closed");
                            shutdown_open = false;
                        }
                    }
                }
            }
        }

        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("Dispatch task failed: {e}");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = in_flight.len(),
                "Shutdown timeout exceeded, aborting in-flight dispatches"
            );
            in_flight.abort_all();
        }

        internal!(level = INFO, "Dispatcher shutdown complete");
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.inner.stats
    }

    /// Per-provider counters, in roster order.
    pub fn provider_stats(&self) -> Vec<(String, ProviderStats)> {
        self.inner
            .rotator
            .names()
            .map(|name| {
                (
                    name.to_string(),
                    self.inner.stats.provider(name).unwrap_or_default(),
                )
            })
            .collect()
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.inner.limiter.stats()
    }

    /// Name of the provider the next dispatch will start with.
    pub fn active_provider(&self) -> String {
        self.inner.rotator.current().1.name().to_string()
    }

    pub fn active_index(&self) -> usize {
        self.inner.rotator.active_index()
    }

    /// Number of fingerprints currently remembered.
    pub fn remembered(&self) -> usize {
        self.inner.cache.len()
    }

    fn emit(&self, dispatch_id: Ulid, message: &Message, kind: EventKind) {
        self.inner
            .sink
            .on_event(&DispatchEvent::new(dispatch_id, message, kind));
    }
}
