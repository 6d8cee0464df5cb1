//! Structured dispatch events and the sinks that consume them.
//!
//! The dispatcher never renders anything itself. Every state change becomes a
//! [`DispatchEvent`], which a sink turns into whatever the presentation layer
//! needs: a short [`Status`] line plus a timestamped log line, a `tracing`
//! event, or a broadcast to subscribers.

use std::{fmt::Write, sync::Arc, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use courier_common::{Message, tracing};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::error::DeliveryError;

/// How long a presentation layer should show each kind of status.
const SUCCESS_DISPLAY_MS: u64 = 3_000;
const ATTEMPT_DISPLAY_MS: u64 = 2_000;
const ERROR_DISPLAY_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The message was already dispatched; nothing was sent.
    Duplicate,
    /// The dispatch budget for the current window is spent.
    RateLimited { retry_after: Duration },
    /// One provider call failed.
    AttemptFailed {
        provider: String,
        attempt: u32,
        max_attempts: u32,
        error: DeliveryError,
        /// Backoff before the next step, if any
        retry_in: Option<Duration>,
    },
    /// Retries on `from` were exhausted; the next cycle uses `to`.
    ProviderSwitched { from: String, to: String },
    /// A provider accepted the message.
    Delivered { provider: String, attempts: u32 },
    /// Every provider in the roster failed.
    AllProvidersExhausted { providers: usize, attempts: u32 },
}

/// A single observable step of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEvent {
    /// Correlates all events of one `dispatch` call
    pub dispatch_id: Ulid,
    pub recipient: Arc<str>,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

/// What a presentation layer shows to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub text: String,
    pub is_error: bool,
    pub display_duration_ms: u64,
}

impl DispatchEvent {
    pub fn new(dispatch_id: Ulid, message: &Message, kind: EventKind) -> Self {
        Self {
            dispatch_id,
            recipient: Arc::from(message.recipient()),
            at: Utc::now(),
            kind,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        !matches!(
            self.kind,
            EventKind::Delivered { .. } | EventKind::ProviderSwitched { .. }
        )
    }

    /// Short, user facing summary.
    #[must_use]
    pub fn status(&self) -> Status {
        let recipient = &self.recipient;
        let (text, display_duration_ms) = match &self.kind {
            EventKind::Duplicate => (
                format!("Message to {recipient} was already sent"),
                ERROR_DISPLAY_MS,
            ),
            EventKind::RateLimited { .. } => (
                format!("Rate limit reached, message to {recipient} was not sent"),
                ERROR_DISPLAY_MS,
            ),
            EventKind::AttemptFailed {
                provider,
                attempt,
                max_attempts,
                error,
                ..
            } => (
                format!("Attempt {attempt}/{max_attempts} via {provider} failed: {error}"),
                ATTEMPT_DISPLAY_MS,
            ),
            EventKind::ProviderSwitched { from, to } => (
                format!("{from} unavailable, switching to {to}"),
                ATTEMPT_DISPLAY_MS,
            ),
            EventKind::Delivered { provider, .. } => (
                format!("Message to {recipient} sent via {provider}"),
                SUCCESS_DISPLAY_MS,
            ),
            EventKind::AllProvidersExhausted { providers, .. } => (
                format!("Message to {recipient} could not be sent: all {providers} providers failed"),
                ERROR_DISPLAY_MS,
            ),
        };

        Status {
            text,
            is_error: self.is_error(),
            display_duration_ms,
        }
    }

    /// Detailed, timestamped line for an activity log.
    #[must_use]
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} {}: ",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.dispatch_id,
            self.recipient
        );

        // Writing to a String cannot fail
        let _ = match &self.kind {
            EventKind::Duplicate => write!(line, "duplicate message suppressed"),
            EventKind::RateLimited { retry_after } => write!(
                line,
                "rate limited, capacity frees up in {}ms",
                retry_after.as_millis()
            ),
            EventKind::AttemptFailed {
                provider,
                attempt,
                max_attempts,
                error,
                retry_in,
            } => {
                let _ = write!(
                    line,
                    "attempt {attempt}/{max_attempts} via {provider} failed: {error}"
                );
                match retry_in {
                    Some(delay) => write!(line, " (backing off {}ms)", delay.as_millis()),
                    None => write!(line, " (not retrying this provider)"),
                }
            }
            EventKind::ProviderSwitched { from, to } => {
                write!(line, "retries exhausted on {from}, switching to {to}")
            }
            EventKind::Delivered { provider, attempts } => {
                write!(line, "delivered via {provider} after {attempts} attempt(s)")
            }
            EventKind::AllProvidersExhausted {
                providers,
                attempts,
            } => write!(
                line,
                "all {providers} providers exhausted after {attempts} attempt(s)"
            ),
        };

        line
    }
}

/// Consumer of dispatch events.
///
/// Implement [`EventSink::on_status`] and [`EventSink::on_log`] for the two
/// callbacks a presentation layer usually wants, or override
/// [`EventSink::on_event`] to receive the structured event directly.
pub trait EventSink: Send + Sync {
    fn on_status(&self, _status: &Status) {}

    fn on_log(&self, _line: &str) {}

    fn on_event(&self, event: &DispatchEvent) {
        self.on_status(&event.status());
        self.on_log(&event.log_line());
    }
}

/// Forwards events into `tracing`. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &DispatchEvent) {
        let status = event.status();
        if status.is_error {
            tracing::warn!(dispatch_id = %event.dispatch_id, "{}", status.text);
        } else {
            tracing::info!(dispatch_id = %event.dispatch_id, "{}", status.text);
        }
        tracing::debug!("{}", event.log_line());
    }
}

/// Publishes events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<DispatchEvent>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn on_event(&self, event: &DispatchEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
    }
}

/// Hands every event to several sinks, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn on_event(&self, event: &DispatchEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }
}
