//! Counters for monitoring dispatch activity.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Per-provider call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Outcome counters across all dispatches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub rate_limited: u64,
    pub exhausted: u64,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    providers: DashMap<String, ProviderStats>,
    delivered: AtomicU64,
    duplicates: AtomicU64,
    rate_limited: AtomicU64,
    exhausted: AtomicU64,
}

impl DispatchStats {
    pub(crate) fn record_attempt(&self, provider: &str, succeeded: bool) {
        let mut entry = self.providers.entry(provider.to_string()).or_default();
        entry.attempts += 1;
        if succeeded {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters for `provider`; `None` if it was never called.
    pub fn provider(&self, provider: &str) -> Option<ProviderStats> {
        self.providers.get(provider).map(|entry| *entry)
    }

    pub fn outcomes(&self) -> OutcomeStats {
        OutcomeStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}
