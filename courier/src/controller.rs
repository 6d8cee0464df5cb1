use std::{path::Path, sync::LazyLock};

use courier_common::{Message, Signal, internal, logging, tracing};
use courier_dispatch::{DispatchConfig, DispatchError, Dispatcher, ProviderConfig};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};

/// Messages queued ahead of the dispatcher before the feeder waits.
const QUEUE_CAPACITY: usize = 128;

#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(alias = "provider", default)]
    providers: Vec<ProviderConfig>,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

/// Read a batch of messages from a RON file.
///
/// The file holds a list of `(recipient: "..", subject: "..", body: "..")`
/// entries.
///
/// # Errors
///
/// Fails if the file cannot be read or is not a valid message list.
pub fn read_batch(path: &Path) -> anyhow::Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read batch from {}: {e}", path.display()))?;

    ron::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid batch file {}: {e}", path.display()))
}

impl Courier {
    pub const fn dispatch_config(&self) -> &DispatchConfig {
        &self.dispatch
    }

    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    /// Build a dispatcher for the configured roster.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyRoster`] if no providers are configured,
    /// or [`DispatchError::Configuration`] if the dispatch settings are
    /// invalid.
    pub fn dispatcher(&self) -> Result<Dispatcher, DispatchError> {
        Dispatcher::new(
            self.dispatch.clone(),
            self.providers.iter().map(ProviderConfig::build).collect(),
        )
    }

    /// Dispatch `messages` and wait until every one of them has finished,
    /// or until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Fails if the dispatcher cannot be built.
    pub async fn deliver(
        &self,
        messages: Vec<Message>,
        shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<Dispatcher> {
        let dispatcher = self.dispatcher()?;
        let (sender, queue) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(async move {
            for message in messages {
                // The dispatcher stopped listening, so there is nobody to feed
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        dispatcher.serve(queue, shutdown).await;
        report(&dispatcher);

        Ok(dispatcher)
    }

    /// Run this controller until every message is dispatched or a shutdown
    /// signal arrives.
    ///
    /// # Errors
    ///
    /// This function will return an error if the dispatcher cannot be built
    /// or the signal handlers cannot be installed.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self, messages: Vec<Message>) -> anyhow::Result<()> {
        logging::init();

        internal!(level = INFO, messages = messages.len(), "Controller running");

        let ret = tokio::select! {
            r = self.deliver(messages, SHUTDOWN_BROADCAST.subscribe()) => {
                r.map(|_| ())
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}

fn report(dispatcher: &Dispatcher) {
    let outcomes = dispatcher.stats().outcomes();
    internal!(
        level = INFO,
        delivered = outcomes.delivered,
        duplicates = outcomes.duplicates,
        rate_limited = outcomes.rate_limited,
        exhausted = outcomes.exhausted,
        rate_limit = ?dispatcher.rate_limit_stats(),
        "Dispatch summary"
    );

    for (provider, stats) in dispatcher.provider_stats() {
        internal!(
            level = INFO,
            provider = %provider,
            attempts = stats.attempts,
            successes = stats.successes,
            failures = stats.failures,
            "Provider summary"
        );
    }
}
