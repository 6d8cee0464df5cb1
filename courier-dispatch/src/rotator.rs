//! Circular selection over the provider roster.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{error::DispatchError, provider::Provider};

/// Ordered, non-empty list of providers plus the index of the active one.
#[derive(Debug)]
pub struct ProviderRotator {
    providers: Vec<Arc<dyn Provider>>,
    active: Mutex<usize>,
}

impl ProviderRotator {
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyRoster`] if `providers` is empty.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Result<Self, DispatchError> {
        if providers.is_empty() {
            return Err(DispatchError::EmptyRoster);
        }

        Ok(Self {
            providers,
            active: Mutex::new(0),
        })
    }

    /// The active provider and its index.
    pub fn current(&self) -> (usize, Arc<dyn Provider>) {
        let index = *self.active.lock();
        (index, Arc::clone(&self.providers[index]))
    }

    pub fn active_index(&self) -> usize {
        *self.active.lock()
    }

    /// Unconditionally move to the next provider, wrapping around.
    pub fn advance(&self) -> (usize, Arc<dyn Provider>) {
        let mut active = self.active.lock();
        *active = (*active + 1) % self.providers.len();
        (*active, Arc::clone(&self.providers[*active]))
    }

    /// Move past the provider at `exhausted`, unless another dispatch already
    /// did so, and return whichever provider is active afterwards.
    ///
    /// Two dispatches failing on the same provider at the same time therefore
    /// advance the roster once, not twice.
    pub fn advance_past(&self, exhausted: usize) -> (usize, Arc<dyn Provider>) {
        let mut active = self.active.lock();
        if *active == exhausted {
            *active = (exhausted + 1) % self.providers.len();
        }
        (*active, Arc::clone(&self.providers[*active]))
    }

    /// Provider at `index`, wrapping around the roster.
    pub fn get(&self, index: usize) -> Arc<dyn Provider> {
        Arc::clone(&self.providers[index % self.providers.len()])
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub const fn is_empty(&self) -> bool {
        false
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|provider| provider.name())
    }
}
