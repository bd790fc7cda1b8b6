//! Persisted visitor identifier.
//!
//! Coveo Usage Analytics correlates events from one browser through an
//! opaque visitor id. The server hands one back on every analytics
//! response; it is stored under [`VISITOR_ID_KEY`] and replayed as the
//! `visitor` query parameter on subsequent events.

use tracing::warn;

use crate::store::SharedStore;

/// Storage key for the visitor id.
pub const VISITOR_ID_KEY: &str = "coveo_visitorId";

/// Read/write access to the persisted visitor id.
#[derive(Clone)]
pub struct VisitorIdentity {
    store: SharedStore,
}

impl VisitorIdentity {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Returns the persisted visitor id, if any.
    ///
    /// A storage failure reads as "no visitor id".
    pub fn get(&self) -> Option<String> {
        match self.store.get(VISITOR_ID_KEY) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "failed to read visitor id");
                None
            }
        }
    }

    /// Persists `value` unconditionally.
    pub fn set(&self, value: &str) -> anyhow::Result<()> {
        self.store.set(VISITOR_ID_KEY, value)
    }

    /// Removes the persisted visitor id.
    pub fn clear(&self) -> anyhow::Result<()> {
        self.store.remove(VISITOR_ID_KEY)
    }

    /// Picks the visitor id to send: a non-empty `override_id` first, then
    /// the persisted value, then nothing.
    pub fn resolve(&self, override_id: Option<&str>) -> Option<String> {
        if let Some(id) = override_id.filter(|id| !id.is_empty()) {
            return Some(id.to_string());
        }
        self.get().filter(|id| !id.is_empty())
    }
}
