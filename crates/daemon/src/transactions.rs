//! Transaction visibility registry.
//!
//! Writes hit the filesystem immediately. A transaction only decides whether
//! caching validators may be shown: a request inside an open transaction, or about a
//! resource written by a still-open transaction, gets no `ETag` or `Last-Modified`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use common::node::ResourceId;

#[derive(Debug, Clone, Default)]
pub struct Transactions {
    open: Arc<RwLock<HashMap<Uuid, HashSet<ResourceId>>>>,
}

impl Transactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.open.write().insert(id, HashSet::new());
        tracing::debug!(tx = %id, "transaction opened");
        id
    }

    pub fn is_open(&self, tx: &Uuid) -> bool {
        self.open.read().contains_key(tx)
    }

    /// Close `tx`. Returns false if it was not open.
    pub fn commit(&self, tx: &Uuid) -> bool {
        let closed = self.open.write().remove(tx);
        if let Some(written) = &closed {
            tracing::debug!(tx = %tx, resources = written.len(), "transaction committed");
        }
        closed.is_some()
    }

    /// Record that `tx` wrote `id`. Ignored for unknown transactions.
    pub fn record_write(&self, tx: &Uuid, id: &ResourceId) {
        if let Some(written) = self.open.write().get_mut(tx) {
            written.insert(id.owner());
        }
    }

    /// Whether any open transaction has written `id` (or its owner).
    pub fn is_provisional(&self, id: &ResourceId) -> bool {
        let owner = id.owner();
        self.open.read().values().any(|written| written.contains(&owner))
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }
}
