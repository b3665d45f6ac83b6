//! Durable store gateway.
//!
//! The history core never talks to a concrete database directly. It reads
//! aggregates, looks up entities by their unique keys, upserts resources and
//! listens for change events through [`DurableStore`]. [`RedbStore`] is the
//! embedded implementation used by default.

use crate::types::{EntityId, EntityKind, MatchHash, QueryString};
use error::StoreError;
use std::sync::Arc;

mod database;
mod notifier;

pub use database::{RedbStore, StoreStats};
pub use notifier::{Notifier, Subscription};

pub mod error {
    use crate::types::{EntityId, EntityKind};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum StoreError {
        #[error("Database error: {0}")]
        Redb(#[from] redb::DatabaseError),

        #[error("Table error: {0}")]
        TableError(#[from] redb::TableError),

        #[error("Storage error: {0}")]
        StorageError(#[from] redb::StorageError),

        #[error("Transaction error: {0}")]
        TransactionError(#[from] redb::TransactionError),

        #[error("Commit error: {0}")]
        CommitError(#[from] redb::CommitError),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Entity not found: {0}")]
        DanglingRelation(EntityId),

        #[error("Entity {id} is a {found}, expected a {expected}")]
        KindMismatch {
            id: EntityId,
            expected: EntityKind,
            found: EntityKind,
        },

        #[error("Selection {selection} is already linked to query {query}")]
        SelectionAlreadyLinked { selection: EntityId, query: EntityId },

        #[error("Corrupted entity {id}: {reason}")]
        Corrupted { id: EntityId, reason: String },

        #[error("Store unavailable: {0}")]
        Unavailable(String),
    }
}

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

/// One change reported by the store after a committed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub id: EntityId,
    pub kind: EntityKind,
    pub event_type: EventType,
    /// Commit that produced the event. Every event of one commit shares it.
    /// Stores that do not number their commits leave it at 0.
    pub sequence: u64,
}

impl ChangeEvent {
    pub fn created(id: EntityId, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            event_type: EventType::Created,
            sequence: 0,
        }
    }

    pub fn updated(id: EntityId, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            event_type: EventType::Updated,
            sequence: 0,
        }
    }

    pub fn at_sequence(self, sequence: u64) -> Self {
        Self { sequence, ..self }
    }
}

/// Callback invoked with each batch of change events, in commit order.
pub type ChangeCallback = Arc<dyn Fn(&[ChangeEvent]) + Send + Sync>;

/// One row of the bulk-load aggregate: how many selections link `query` to `hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCount {
    pub query: QueryString,
    pub hash: MatchHash,
    pub count: u32,
}

/// Everything the initial load needs, read from one consistent view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySnapshot {
    pub rows: Vec<SelectionCount>,
    /// Selections that have a match but no owning query yet.
    pub unlinked: Vec<EntityId>,
    /// Last commit reflected in `rows`. Change events with a sequence at or
    /// below it are already counted. `None` if the store does not number commits.
    pub sequence: Option<u64>,
}

/// What a selection currently points at.
///
/// `query` is `None` until the owning query has been linked to the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionLinks {
    pub selection_date: String,
    pub query: Option<QueryString>,
    pub hash: Option<MatchHash>,
}

/// An entity to upsert, with its attributes and outgoing relations.
///
/// `id: None` asks the store to create the entity, or to reuse the one already
/// carrying the same unique key (query string or match hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Query(QueryResource),
    Selection(SelectionResource),
    Match(MatchResource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResource {
    pub id: Option<EntityId>,
    pub query_string: QueryString,
    /// Selections to link to this query. Links are only ever added.
    pub selections: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResource {
    pub id: Option<EntityId>,
    /// ISO-8601 timestamp of the selection.
    pub selection_date: String,
    pub matched: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResource {
    pub id: Option<EntityId>,
    pub hash: MatchHash,
}

impl Resource {
    pub fn kind(&self) -> EntityKind {
        match self {
            Resource::Query(_) => EntityKind::Query,
            Resource::Selection(_) => EntityKind::Selection,
            Resource::Match(_) => EntityKind::Match,
        }
    }
}

/// Capability the history core consumes from persistent storage.
pub trait DurableStore: Send + Sync {
    /// Number of selections per (query string, match hash) pair.
    fn selection_counts(&self) -> Result<Vec<SelectionCount>, StoreError>;

    /// The aggregate together with the commit it was read at.
    fn snapshot(&self) -> Result<HistorySnapshot, StoreError> {
        Ok(HistorySnapshot {
            rows: self.selection_counts()?,
            unlinked: Vec::new(),
            sequence: None,
        })
    }

    /// Looks up the query entity carrying exactly this string.
    fn find_query(&self, query: &QueryString) -> Result<Option<EntityId>, StoreError>;

    /// Looks up the match entity carrying exactly this hash.
    fn find_match(&self, hash: &MatchHash) -> Result<Option<EntityId>, StoreError>;

    /// Resolves a selection's owning query and its match.
    ///
    /// Returns `Ok(None)` if `selection` does not exist or is not a selection.
    fn selection_links(&self, selection: EntityId) -> Result<Option<SelectionLinks>, StoreError>;

    /// Persists one resource and returns its identifier.
    fn update_resource(&self, resource: &Resource) -> Result<EntityId, StoreError>;

    /// Registers `callback` for change events until the returned guard is dropped.
    fn subscribe(&self, callback: ChangeCallback) -> Subscription;
}
