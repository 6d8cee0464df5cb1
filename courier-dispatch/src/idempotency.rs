//! Duplicate suppression keyed by message fingerprint.
//!
//! A fingerprint is recorded before the first delivery attempt, so a message
//! counts as "seen" even if no provider ever accepts it. How long fingerprints
//! are remembered is governed by [`IdempotencyPolicy`].

use std::{collections::VecDeque, time::Duration};

use ahash::AHashMap;
use courier_common::Fingerprint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::DispatchError;

/// Retention policy for recorded fingerprints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyPolicy {
    /// Remember every fingerprint for the lifetime of the process.
    #[default]
    Unbounded,
    /// Remember at most `max_entries`, forgetting the oldest first.
    Capacity { max_entries: usize },
    /// Forget a fingerprint `ttl_ms` after it was recorded.
    Ttl { ttl_ms: u64 },
}

impl IdempotencyPolicy {
    /// # Errors
    ///
    /// Returns [`DispatchError::Configuration`] for a zero capacity or TTL.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            Self::Capacity { max_entries: 0 } => Err(DispatchError::Configuration(
                "idempotency.max_entries must be greater than 0".to_string(),
            )),
            Self::Ttl { ttl_ms: 0 } => Err(DispatchError::Configuration(
                "idempotency.ttl_ms must be greater than 0".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    seen: AHashMap<Fingerprint, Instant>,
    /// Insertion order; only maintained when something can be evicted
    order: VecDeque<Fingerprint>,
}

#[derive(Debug)]
pub struct IdempotencyCache {
    policy: IdempotencyPolicy,
    entries: Mutex<Entries>,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new(policy: IdempotencyPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::default(),
        }
    }

    pub fn has(&self, fingerprint: &Fingerprint) -> bool {
        let mut entries = self.entries.lock();
        self.expire(&mut entries, Instant::now());
        entries.seen.contains_key(fingerprint)
    }

    /// Recording an already present fingerprint is a no-op.
    pub fn record(&self, fingerprint: Fingerprint) {
        self.check_and_record(fingerprint);
    }

    /// Record `fingerprint`, returning `true` if it was not already present.
    ///
    /// The check and the insert happen under one lock, so two concurrent
    /// dispatches of the same message cannot both pass.
    pub fn check_and_record(&self, fingerprint: Fingerprint) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.expire(&mut entries, now);

        if entries.seen.contains_key(&fingerprint) {
            return false;
        }

        if self.policy != IdempotencyPolicy::Unbounded {
            entries.order.push_back(fingerprint.clone());
        }
        entries.seen.insert(fingerprint, now);

        if let IdempotencyPolicy::Capacity { max_entries } = self.policy {
            while entries.seen.len() > max_entries {
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                entries.seen.remove(&oldest);
            }
        }

        true
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.expire(&mut entries, Instant::now());
        entries.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(&self, entries: &mut Entries, now: Instant) {
        let IdempotencyPolicy::Ttl { ttl_ms } = self.policy else {
            return;
        };
        let ttl = Duration::from_millis(ttl_ms);

        // Entries are never refreshed, so insertion order is expiry order
        while let Some(oldest) = entries.order.front() {
            let expired = entries
                .seen
                .get(oldest)
                .is_none_or(|recorded| now.saturating_duration_since(*recorded) >= ttl);
            if !expired {
                break;
            }

            if let Some(oldest) = entries.order.pop_front() {
                entries.seen.remove(&oldest);
            }
        }
    }
}
