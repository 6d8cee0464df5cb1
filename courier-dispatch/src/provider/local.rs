use std::sync::Arc;

use async_trait::async_trait;
use courier_common::Message;
use parking_lot::Mutex;

use super::Provider;
use crate::error::DeliveryError;

/// In-memory provider
///
/// Accepts every message and keeps it in a shared mailbox. Clones share the
/// same mailbox, so a test can hand one clone to the dispatcher and inspect
/// deliveries through another.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    name: String,
    mailbox: Arc<Mutex<Vec<Message>>>,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mailbox: Arc::default(),
        }
    }

    /// Messages delivered so far, oldest first.
    #[must_use]
    pub fn delivered(&self) -> Vec<Message> {
        self.mailbox.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mailbox.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.mailbox.lock().clear();
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        self.mailbox.lock().push(message.clone());
        Ok(())
    }
}
