//! Delivery providers.
//!
//! A provider is anything that can take a [`Message`] and attempt to deliver
//! it. Providers are interchangeable: the dispatcher only knows their name and
//! the [`Provider::send`] capability.
//!
//! | Provider | Description |
//! |----------|-------------|
//! | [`LoggerProvider`] | Logs the message and reports success |
//! | [`LocalProvider`] | Keeps delivered messages in memory |
//! | [`SimulatedProvider`] | Fails on a configurable schedule |

mod local;
mod logger;
mod simulated;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use courier_common::Message;
use serde::Deserialize;

pub use local::LocalProvider;
pub use logger::LoggerProvider;
pub use simulated::SimulatedProvider;

use crate::error::DeliveryError;

/// A delivery backend.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Human readable name, used in status events and statistics.
    fn name(&self) -> &str;

    /// Attempt to deliver `message`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] describing whether a retry could help.
    async fn send(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// Declarative provider definition, as found in configuration files.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub enum ProviderConfig {
    Logger {
        name: String,
    },
    Local {
        name: String,
    },
    Simulated {
        name: String,
        #[serde(default)]
        fail_first: u32,
        #[serde(default)]
        failure_rate: f64,
        #[serde(default)]
        permanent: bool,
        #[serde(default)]
        latency_ms: u64,
    },
}

impl ProviderConfig {
    /// Build the provider this entry describes.
    #[must_use]
    pub fn build(&self) -> Arc<dyn Provider> {
        match self {
            Self::Logger { name } => Arc::new(LoggerProvider::new(name.clone())),
            Self::Local { name } => Arc::new(LocalProvider::new(name.clone())),
            Self::Simulated {
                name,
                fail_first,
                failure_rate,
                permanent,
                latency_ms,
            } => Arc::new(
                SimulatedProvider::new(name.clone())
                    .with_fail_first(*fail_first)
                    .with_failure_rate(*failure_rate)
                    .with_permanent_failures(*permanent)
                    .with_latency(std::time::Duration::from_millis(*latency_ms)),
            ),
        }
    }
}
