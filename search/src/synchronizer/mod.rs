//! Keeps the index in step with the durable store.

use crate::index::PrefixFrequencyIndex;
use parking_lot::{Mutex, RwLock};
use qhist_core::store::error::StoreError;
use qhist_core::store::{ChangeEvent, DurableStore, EventType};
use qhist_core::types::{EntityId, EntityKind, SyncConfig};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// Outcome of trying to fold one selection into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Applied,
    /// The selection exists but no query links to it yet.
    Unlinked,
    Malformed,
}

pub struct HistorySynchronizer {
    index: Arc<RwLock<PrefixFrequencyIndex>>,
    store: Weak<dyn DurableStore>,
    /// Last commit covered by the bulk load. Held for the whole load, so events
    /// delivered meanwhile wait and are then filtered against it.
    loaded_through: Mutex<Option<u64>>,
    /// Selections seen before their owning query linked them, oldest first.
    pending: Mutex<VecDeque<EntityId>>,
    pending_capacity: usize,
}

impl HistorySynchronizer {
    pub fn new(
        store: &Arc<dyn DurableStore>,
        index: Arc<RwLock<PrefixFrequencyIndex>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            index,
            store: Arc::downgrade(store),
            loaded_through: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            pending_capacity: config.pending_link_capacity,
        }
    }

    /// Loads every (query, hash, count) aggregate into the index.
    ///
    /// Change events for commits the snapshot already covers are skipped from
    /// then on, and selections still waiting for their query are parked.
    /// Returns the number of rows applied.
    pub fn bulk_load(&self) -> Result<usize, StoreError> {
        let store = self
            .store
            .upgrade()
            .ok_or_else(|| StoreError::Unavailable("store was dropped".to_string()))?;

        let mut loaded_through = self.loaded_through.lock();
        let snapshot = store.snapshot()?;

        {
            let mut index = self.index.write();
            for row in &snapshot.rows {
                index.insert_or_merge(row.query.as_str(), row.hash.as_str(), row.count);
            }
        }
        for &id in &snapshot.unlinked {
            self.park(id);
        }
        *loaded_through = snapshot.sequence;

        tracing::debug!(
            sequence = ?snapshot.sequence,
            unlinked = snapshot.unlinked.len(),
            "Bulk load finished."
        );
        Ok(snapshot.rows.len())
    }

    /// Applies one batch of change events. Never fails.
    pub fn on_change_event(&self, events: &[ChangeEvent]) {
        let Some(store) = self.store.upgrade() else {
            return;
        };

        let loaded_through = *self.loaded_through.lock();
        let fresh = events
            .iter()
            .filter(|event| loaded_through.is_none_or(|through| event.sequence > through));

        let mut query_changed = false;
        for event in fresh {
            match (event.event_type, event.kind) {
                (EventType::Created, EntityKind::Selection) => {
                    self.apply_selection(store.as_ref(), event.id);
                }
                (EventType::Created | EventType::Updated, EntityKind::Query) => {
                    query_changed = true;
                }
                _ => {}
            }
        }

        if query_changed {
            self.retry_pending(store.as_ref());
        }
    }

    /// Number of selections waiting for their query link.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn apply_selection(&self, store: &dyn DurableStore, id: EntityId) {
        match self.resolve(store, id) {
            Resolution::Applied => {}
            Resolution::Unlinked => self.park(id),
            Resolution::Malformed => {
                tracing::debug!(selection = %id, "Dropping malformed selection event.");
            }
        }
    }

    fn resolve(&self, store: &dyn DurableStore, id: EntityId) -> Resolution {
        let links = match store.selection_links(id) {
            Ok(Some(links)) => links,
            Ok(None) => return Resolution::Malformed,
            Err(err) => {
                tracing::warn!(error = %err, selection = %id, "Failed to resolve selection.");
                return Resolution::Malformed;
            }
        };

        let Some(hash) = links.hash else {
            return Resolution::Malformed;
        };
        let Some(query) = links.query else {
            return Resolution::Unlinked;
        };

        self.index
            .write()
            .insert_or_merge(query.as_str(), hash.as_str(), 1);
        Resolution::Applied
    }

    fn park(&self, id: EntityId) {
        if self.pending_capacity == 0 {
            tracing::debug!(selection = %id, "Dropping unlinked selection.");
            return;
        }

        let mut pending = self.pending.lock();
        if pending.contains(&id) {
            return;
        }
        if pending.len() >= self.pending_capacity {
            if let Some(dropped) = pending.pop_front() {
                tracing::warn!(
                    selection = %dropped,
                    capacity = self.pending_capacity,
                    "Pending selection queue full; dropping oldest."
                );
            }
        }
        pending.push_back(id);
    }

    fn retry_pending(&self, store: &dyn DurableStore) {
        let parked: Vec<EntityId> = self.pending.lock().drain(..).collect();

        for id in parked {
            match self.resolve(store, id) {
                Resolution::Applied => {}
                Resolution::Unlinked => self.park(id),
                Resolution::Malformed => {
                    tracing::debug!(selection = %id, "Dropping malformed pending selection.");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
