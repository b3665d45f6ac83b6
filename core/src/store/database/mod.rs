//! redb-backed durable store.
//!
//! Tables:
//! - `entities`: EntityId → VersionedEntity
//! - `query_by_string` / `match_by_hash`: unique keys → EntityId
//! - `query_selections`: (query, selection) → () for aggregate scans
//! - `selection_query`: selection → owning query
//! - `metadata`: id allocation counter and commit sequence

use self::entity::VersionedEntity;
use self::entity::latest_entity::{Entity, MatchEntity, QueryEntity, SelectionEntity};
use super::error::StoreError;
use super::notifier::{Notifier, Subscription};
use super::{
    ChangeCallback, ChangeEvent, DurableStore, HistorySnapshot, MatchResource, QueryResource,
    Resource, SelectionCount, SelectionLinks, SelectionResource,
};
use crate::types::{Config, EntityId, EntityKind, MatchHash, QueryString};
use redb::{ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use std::collections::BTreeMap;

mod entity;

const ENTITIES: TableDefinition<u64, VersionedEntity> = TableDefinition::new("entities");

const QUERY_BY_STRING: TableDefinition<&str, u64> = TableDefinition::new("query_by_string");

const MATCH_BY_HASH: TableDefinition<&str, u64> = TableDefinition::new("match_by_hash");

const QUERY_SELECTIONS: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("query_selections");

const SELECTION_QUERY: TableDefinition<u64, u64> = TableDefinition::new("selection_query");

const METADATA_TABLE: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Metadata key holding the next unallocated entity id.
const METADATA_KEY_NEXT_ID: &str = "next_entity_id";

/// Metadata key holding the sequence of the last commit that published events.
const METADATA_KEY_COMMIT_SEQUENCE: &str = "commit_sequence";

/// Durable store on a single redb file.
pub struct RedbStore {
    db: redb::Database,
    notifier: Notifier,
}

/// Entity counts by kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub queries: usize,
    pub selections: usize,
    pub matches: usize,
}

impl RedbStore {
    /// Creates or opens the store at `config.db_path()`.
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.base_path)?;

        let db = redb::Database::create(config.db_path())?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTITIES)?;
            let _ = write_txn.open_table(QUERY_BY_STRING)?;
            let _ = write_txn.open_table(MATCH_BY_HASH)?;
            let _ = write_txn.open_table(QUERY_SELECTIONS)?;
            let _ = write_txn.open_table(SELECTION_QUERY)?;
            let _ = write_txn.open_table(METADATA_TABLE)?;
        }
        write_txn.commit()?;

        let notifier = Notifier::new()?;
        tracing::info!(path = %config.db_path().display(), "Opened history store.");

        Ok(Self { db, notifier })
    }

    /// Number of registered change callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.notifier.subscriber_count()
    }
}

/// Read operations.
impl RedbStore {
    pub fn selection_counts(&self) -> Result<Vec<SelectionCount>, StoreError> {
        Ok(self.snapshot()?.rows)
    }

    /// Reads the aggregate, the unlinked selections and the commit sequence in
    /// one read transaction.
    pub fn snapshot(&self) -> Result<HistorySnapshot, StoreError> {
        let read_txn = self.db.begin_read()?;
        let entities = read_txn.open_table(ENTITIES)?;
        let query_selections = read_txn.open_table(QUERY_SELECTIONS)?;
        let selection_query = read_txn.open_table(SELECTION_QUERY)?;
        let metadata = read_txn.open_table(METADATA_TABLE)?;

        let mut counts: BTreeMap<(u64, u64), u32> = BTreeMap::new();
        for entry in query_selections.iter()? {
            let (link, _) = entry?;
            let (query_id, selection_id) = link.value();

            let Some(Entity::Selection(selection)) =
                Self::load(&entities, EntityId::new(selection_id))?
            else {
                continue;
            };
            let Some(matched) = selection.matched else {
                continue;
            };

            let count = counts.entry((query_id, matched.get())).or_insert(0);
            *count = count.saturating_add(1);
        }

        let mut rows = Vec::with_capacity(counts.len());
        for ((query_id, match_id), count) in counts {
            rows.push(SelectionCount {
                query: Self::query_string(&entities, EntityId::new(query_id))?,
                hash: Self::match_hash(&entities, EntityId::new(match_id))?,
                count,
            });
        }
        rows.sort_by(|a, b| (&a.query, &a.hash).cmp(&(&b.query, &b.hash)));

        let mut unlinked = Vec::new();
        for entry in entities.iter()? {
            let (id, value) = entry?;
            let id = id.value();
            let Entity::Selection(selection) = value.value().into_latest() else {
                continue;
            };
            if selection.matched.is_some() && selection_query.get(id)?.is_none() {
                unlinked.push(EntityId::new(id));
            }
        }

        let sequence = metadata
            .get(METADATA_KEY_COMMIT_SEQUENCE)?
            .map(|g| g.value())
            .unwrap_or(0);

        Ok(HistorySnapshot {
            rows,
            unlinked,
            sequence: Some(sequence),
        })
    }

    pub fn find_query(&self, query: &QueryString) -> Result<Option<EntityId>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(QUERY_BY_STRING)?;

        let id = table.get(query.as_str())?.map(|g| EntityId::new(g.value()));
        Ok(id)
    }

    pub fn find_match(&self, hash: &MatchHash) -> Result<Option<EntityId>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MATCH_BY_HASH)?;

        let id = table.get(hash.as_str())?.map(|g| EntityId::new(g.value()));
        Ok(id)
    }

    pub fn selection_links(&self, id: EntityId) -> Result<Option<SelectionLinks>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let entities = read_txn.open_table(ENTITIES)?;
        let selection_query = read_txn.open_table(SELECTION_QUERY)?;

        let Some(Entity::Selection(selection)) = Self::load(&entities, id)? else {
            return Ok(None);
        };

        let owner = selection_query.get(id.get())?.map(|g| g.value());
        let query = owner
            .map(|owner| Self::query_string(&entities, EntityId::new(owner)))
            .transpose()?;
        let hash = selection
            .matched
            .map(|matched| Self::match_hash(&entities, matched))
            .transpose()?;

        Ok(Some(SelectionLinks {
            selection_date: selection.selection_date,
            query,
            hash,
        }))
    }

    /// Counts stored entities by kind.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let read_txn = self.db.begin_read()?;
        let entities = read_txn.open_table(ENTITIES)?;

        let mut stats = StoreStats::default();
        for entry in entities.iter()? {
            let (_, value) = entry?;
            match value.value().into_latest() {
                Entity::Query(_) => stats.queries += 1,
                Entity::Selection(_) => stats.selections += 1,
                Entity::Match(_) => stats.matches += 1,
            }
        }

        Ok(stats)
    }
}

/// Write operations.
impl RedbStore {
    /// Upserts one resource in its own write transaction.
    ///
    /// Unique-key lookups for queries and matches happen inside the same
    /// transaction, so concurrent callers never create duplicates. Change events
    /// are published only after the commit succeeds, stamped with the commit's
    /// sequence so readers of [`Self::snapshot`] can tell which ones it already covers.
    pub fn update_resource(&self, resource: &Resource) -> Result<EntityId, StoreError> {
        let write_txn = self.db.begin_write()?;
        let mut events = Vec::new();

        let id = match resource {
            Resource::Query(query) => Self::upsert_query(&write_txn, query, &mut events)?,
            Resource::Selection(selection) => {
                Self::upsert_selection(&write_txn, selection, &mut events)?
            }
            Resource::Match(matched) => Self::upsert_match(&write_txn, matched, &mut events)?,
        };

        if !events.is_empty() {
            let sequence = Self::next_sequence(&write_txn)?;
            events = events
                .into_iter()
                .map(|event| event.at_sequence(sequence))
                .collect();
        }

        write_txn.commit()?;
        self.notifier.publish(events);

        Ok(id)
    }

    fn upsert_query(
        txn: &WriteTransaction,
        resource: &QueryResource,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<EntityId, StoreError> {
        let mut entities = txn.open_table(ENTITIES)?;
        let mut by_string = txn.open_table(QUERY_BY_STRING)?;
        let mut selection_query = txn.open_table(SELECTION_QUERY)?;
        let mut query_selections = txn.open_table(QUERY_SELECTIONS)?;

        let (id, created) = match resource.id {
            Some(id) => {
                Self::ensure_kind(&entities, id, EntityKind::Query)?;
                (id, false)
            }
            None => {
                let existing = by_string
                    .get(resource.query_string.as_str())?
                    .map(|g| g.value());
                match existing {
                    Some(existing) => (EntityId::new(existing), false),
                    None => {
                        let id = Self::allocate_id(txn)?;
                        let entity = Entity::Query(QueryEntity {
                            query_string: resource.query_string.to_string(),
                        });
                        entities.insert(id.get(), &VersionedEntity::V1(entity))?;
                        by_string.insert(resource.query_string.as_str(), id.get())?;
                        (id, true)
                    }
                }
            }
        };

        let mut linked = false;
        for &selection in &resource.selections {
            Self::ensure_kind(&entities, selection, EntityKind::Selection)?;

            let owner = selection_query.get(selection.get())?.map(|g| g.value());
            match owner {
                Some(owner) if owner == id.get() => {}
                Some(owner) => {
                    return Err(StoreError::SelectionAlreadyLinked {
                        selection,
                        query: EntityId::new(owner),
                    });
                }
                None => {
                    selection_query.insert(selection.get(), id.get())?;
                    query_selections.insert((id.get(), selection.get()), ())?;
                    linked = true;
                }
            }
        }

        if created {
            events.push(ChangeEvent::created(id, EntityKind::Query));
        } else if linked {
            events.push(ChangeEvent::updated(id, EntityKind::Query));
        }

        Ok(id)
    }

    fn upsert_selection(
        txn: &WriteTransaction,
        resource: &SelectionResource,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<EntityId, StoreError> {
        let mut entities = txn.open_table(ENTITIES)?;

        if let Some(matched) = resource.matched {
            Self::ensure_kind(&entities, matched, EntityKind::Match)?;
        }

        let (id, event) = match resource.id {
            Some(id) => {
                Self::ensure_kind(&entities, id, EntityKind::Selection)?;
                (id, ChangeEvent::updated(id, EntityKind::Selection))
            }
            None => {
                let id = Self::allocate_id(txn)?;
                (id, ChangeEvent::created(id, EntityKind::Selection))
            }
        };

        let entity = Entity::Selection(SelectionEntity {
            selection_date: resource.selection_date.clone(),
            matched: resource.matched,
        });
        entities.insert(id.get(), &VersionedEntity::V1(entity))?;
        events.push(event);

        Ok(id)
    }

    fn upsert_match(
        txn: &WriteTransaction,
        resource: &MatchResource,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<EntityId, StoreError> {
        let mut entities = txn.open_table(ENTITIES)?;

        // The hash is the match's identity; there is nothing to update.
        if let Some(id) = resource.id {
            Self::ensure_kind(&entities, id, EntityKind::Match)?;
            return Ok(id);
        }

        let mut by_hash = txn.open_table(MATCH_BY_HASH)?;
        let existing = by_hash.get(resource.hash.as_str())?.map(|g| g.value());
        if let Some(existing) = existing {
            return Ok(EntityId::new(existing));
        }

        let id = Self::allocate_id(txn)?;
        let entity = Entity::Match(MatchEntity {
            hash: resource.hash.to_string(),
        });
        entities.insert(id.get(), &VersionedEntity::V1(entity))?;
        by_hash.insert(resource.hash.as_str(), id.get())?;
        events.push(ChangeEvent::created(id, EntityKind::Match));

        Ok(id)
    }

    fn allocate_id(txn: &WriteTransaction) -> Result<EntityId, StoreError> {
        let mut metadata = txn.open_table(METADATA_TABLE)?;
        let next = metadata
            .get(METADATA_KEY_NEXT_ID)?
            .map(|g| g.value())
            .unwrap_or(1);
        metadata.insert(METADATA_KEY_NEXT_ID, next + 1)?;
        Ok(EntityId::new(next))
    }

    fn next_sequence(txn: &WriteTransaction) -> Result<u64, StoreError> {
        let mut metadata = txn.open_table(METADATA_TABLE)?;
        let sequence = metadata
            .get(METADATA_KEY_COMMIT_SEQUENCE)?
            .map(|g| g.value())
            .unwrap_or(0)
            + 1;
        metadata.insert(METADATA_KEY_COMMIT_SEQUENCE, sequence)?;
        Ok(sequence)
    }
}

/// Entity helpers.
impl RedbStore {
    fn load(
        table: &impl ReadableTable<u64, VersionedEntity>,
        id: EntityId,
    ) -> Result<Option<Entity>, StoreError> {
        let entity = table.get(id.get())?.map(|g| g.value().into_latest());
        Ok(entity)
    }

    fn ensure_kind(
        table: &impl ReadableTable<u64, VersionedEntity>,
        id: EntityId,
        expected: EntityKind,
    ) -> Result<(), StoreError> {
        let entity = Self::load(table, id)?.ok_or(StoreError::DanglingRelation(id))?;
        if entity.kind() != expected {
            return Err(StoreError::KindMismatch {
                id,
                expected,
                found: entity.kind(),
            });
        }
        Ok(())
    }

    fn query_string(
        table: &impl ReadableTable<u64, VersionedEntity>,
        id: EntityId,
    ) -> Result<QueryString, StoreError> {
        match Self::load(table, id)? {
            Some(Entity::Query(query)) => {
                QueryString::try_new(query.query_string).map_err(|err| StoreError::Corrupted {
                    id,
                    reason: err.to_string(),
                })
            }
            Some(other) => Err(StoreError::KindMismatch {
                id,
                expected: EntityKind::Query,
                found: other.kind(),
            }),
            None => Err(StoreError::DanglingRelation(id)),
        }
    }

    fn match_hash(
        table: &impl ReadableTable<u64, VersionedEntity>,
        id: EntityId,
    ) -> Result<MatchHash, StoreError> {
        match Self::load(table, id)? {
            Some(Entity::Match(matched)) => {
                MatchHash::try_new(matched.hash).map_err(|err| StoreError::Corrupted {
                    id,
                    reason: err.to_string(),
                })
            }
            Some(other) => Err(StoreError::KindMismatch {
                id,
                expected: EntityKind::Match,
                found: other.kind(),
            }),
            None => Err(StoreError::DanglingRelation(id)),
        }
    }
}

impl DurableStore for RedbStore {
    fn selection_counts(&self) -> Result<Vec<SelectionCount>, StoreError> {
        RedbStore::selection_counts(self)
    }

    fn snapshot(&self) -> Result<HistorySnapshot, StoreError> {
        RedbStore::snapshot(self)
    }

    fn find_query(&self, query: &QueryString) -> Result<Option<EntityId>, StoreError> {
        RedbStore::find_query(self, query)
    }

    fn find_match(&self, hash: &MatchHash) -> Result<Option<EntityId>, StoreError> {
        RedbStore::find_match(self, hash)
    }

    fn selection_links(&self, selection: EntityId) -> Result<Option<SelectionLinks>, StoreError> {
        RedbStore::selection_links(self, selection)
    }

    fn update_resource(&self, resource: &Resource) -> Result<EntityId, StoreError> {
        RedbStore::update_resource(self, resource)
    }

    fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        self.notifier.subscribe(callback)
    }
}
