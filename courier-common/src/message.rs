//! The logical message handed to the dispatcher, and its content fingerprint.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A message awaiting dispatch.
///
/// Fields are reference counted so the same message can be shared between the
/// dispatcher, its retry cycles and any number of providers without copying
/// the body around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    recipient: Arc<str>,
    subject: Arc<str>,
    body: Arc<str>,
}

impl Message {
    pub fn new(
        recipient: impl Into<Arc<str>>,
        subject: impl Into<Arc<str>>,
        body: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    #[inline]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    #[inline]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[inline]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Deterministic identity over all three fields.
    ///
    /// Each field is length-prefixed before hashing, so no choice of field
    /// contents can make two different messages collide by shifting text
    /// across a separator.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        for field in [&self.recipient, &self.subject, &self.body] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()).into())
    }
}

/// Opaque key derived from a [`Message`], used for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The full digest is noise in log lines
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}
