use async_trait::async_trait;
use courier_common::{Message, outgoing};

use super::Provider;
use crate::error::DeliveryError;

/// Logs every message instead of delivering it. Always succeeds.
#[derive(Debug, Clone)]
pub struct LoggerProvider {
    name: String,
}

impl LoggerProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Provider for LoggerProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        outgoing!(
            level = INFO,
            provider = %self.name,
            recipient = %message.recipient(),
            subject = %message.subject(),
            body_len = message.body().len(),
            "Delivered"
        );
        Ok(())
    }
}
