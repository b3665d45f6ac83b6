use super::*;
use crate::index::Frequencies;
use qhist_core::store::{
    ChangeCallback, HistorySnapshot, Notifier, Resource, SelectionCount, SelectionLinks,
    Subscription,
};
use qhist_core::types::{MatchHash, QueryString};
use std::collections::HashMap;

mod common {
    use super::*;

    /// In-memory gateway whose contents tests set directly.
    pub(super) struct FakeStore {
        pub(super) rows: Mutex<Vec<SelectionCount>>,
        pub(super) selections: Mutex<HashMap<EntityId, SelectionLinks>>,
        pub(super) unlinked: Mutex<Vec<EntityId>>,
        pub(super) sequence: Mutex<Option<u64>>,
        pub(super) fail_reads: Mutex<bool>,
        notifier: Notifier,
    }

    impl FakeStore {
        pub(super) fn new() -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(Vec::new()),
                selections: Mutex::new(HashMap::new()),
                unlinked: Mutex::new(Vec::new()),
                sequence: Mutex::new(None),
                fail_reads: Mutex::new(false),
                notifier: Notifier::new().unwrap(),
            })
        }

        pub(super) fn put_selection(&self, id: u64, query: Option<&str>, hash: Option<&str>) {
            self.selections.lock().insert(
                EntityId::new(id),
                SelectionLinks {
                    selection_date: "2021-01-01T00:00:00+00:00".to_string(),
                    query: query.map(|q| QueryString::try_new(q.to_string()).unwrap()),
                    hash: hash.map(|h| MatchHash::try_new(h.to_string()).unwrap()),
                },
            );
        }

        fn check(&self) -> Result<(), StoreError> {
            if *self.fail_reads.lock() {
                return Err(StoreError::Unavailable("fake read failure".to_string()));
            }
            Ok(())
        }
    }

    impl DurableStore for FakeStore {
        fn selection_counts(&self) -> Result<Vec<SelectionCount>, StoreError> {
            self.check()?;
            Ok(self.rows.lock().clone())
        }

        fn snapshot(&self) -> Result<HistorySnapshot, StoreError> {
            self.check()?;
            Ok(HistorySnapshot {
                rows: self.rows.lock().clone(),
                unlinked: self.unlinked.lock().clone(),
                sequence: *self.sequence.lock(),
            })
        }

        fn find_query(&self, _: &QueryString) -> Result<Option<EntityId>, StoreError> {
            Ok(None)
        }

        fn find_match(&self, _: &MatchHash) -> Result<Option<EntityId>, StoreError> {
            Ok(None)
        }

        fn selection_links(&self, id: EntityId) -> Result<Option<SelectionLinks>, StoreError> {
            self.check()?;
            Ok(self.selections.lock().get(&id).cloned())
        }

        fn update_resource(&self, _: &Resource) -> Result<EntityId, StoreError> {
            Err(StoreError::Unavailable("read-only fake".to_string()))
        }

        fn subscribe(&self, callback: ChangeCallback) -> Subscription {
            self.notifier.subscribe(callback)
        }
    }

    pub(super) fn synchronizer(
        store: &Arc<FakeStore>,
        pending_link_capacity: usize,
    ) -> (HistorySynchronizer, Arc<RwLock<PrefixFrequencyIndex>>) {
        let index = Arc::new(RwLock::new(PrefixFrequencyIndex::new()));
        let store: Arc<dyn DurableStore> = store.clone();
        let synchronizer = HistorySynchronizer::new(
            &store,
            index.clone(),
            &SyncConfig {
                pending_link_capacity,
            },
        );
        (synchronizer, index)
    }

    pub(super) fn created(id: u64, kind: EntityKind) -> ChangeEvent {
        ChangeEvent::created(EntityId::new(id), kind)
    }

    pub(super) fn updated(id: u64, kind: EntityKind) -> ChangeEvent {
        ChangeEvent::updated(EntityId::new(id), kind)
    }

    pub(super) fn row(query: &str, hash: &str, count: u32) -> SelectionCount {
        SelectionCount {
            query: QueryString::try_new(query.to_string()).unwrap(),
            hash: MatchHash::try_new(hash.to_string()).unwrap(),
            count,
        }
    }

    pub(super) fn freq(entries: &[(&str, u32)]) -> Frequencies {
        entries.iter().map(|(h, c)| (h.to_string(), *c)).collect()
    }
}

mod bulk_load {
    use super::common::*;
    use super::*;

    #[test]
    fn test_loads_every_row() {
        let store = FakeStore::new();
        *store.rows.lock() = vec![
            row("cat photos", "h1", 3),
            row("cat photos", "h2", 1),
            row("dog", "h1", 2),
        ];
        let (synchronizer, index) = synchronizer(&store, 8);

        assert_eq!(synchronizer.bulk_load().unwrap(), 3);

        let index = index.read();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("cat photos"), Some(&freq(&[("h1", 3), ("h2", 1)])));
        assert_eq!(index.prefix_search(""), freq(&[("h1", 5), ("h2", 1)]));
    }

    #[test]
    fn test_failure_propagates_and_leaves_index_empty() {
        let store = FakeStore::new();
        *store.rows.lock() = vec![row("cat", "h1", 1)];
        *store.fail_reads.lock() = true;
        let (synchronizer, index) = synchronizer(&store, 8);

        let result = synchronizer.bulk_load();

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(index.read().is_empty());
    }

    #[test]
    fn test_events_covered_by_snapshot_skipped() {
        let store = FakeStore::new();
        *store.rows.lock() = vec![row("cat", "h1", 1)];
        *store.sequence.lock() = Some(3);
        store.put_selection(10, Some("cat"), Some("h1"));
        store.put_selection(11, Some("cat"), Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.bulk_load().unwrap();
        synchronizer.on_change_event(&[created(10, EntityKind::Selection).at_sequence(3)]);
        synchronizer.on_change_event(&[created(11, EntityKind::Selection).at_sequence(4)]);

        assert_eq!(index.read().get("cat"), Some(&freq(&[("h1", 2)])));
    }

    #[test]
    fn test_unnumbered_store_applies_every_event() {
        let store = FakeStore::new();
        *store.rows.lock() = vec![row("cat", "h1", 1)];
        store.put_selection(10, Some("cat"), Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.bulk_load().unwrap();
        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);

        assert_eq!(index.read().get("cat"), Some(&freq(&[("h1", 2)])));
    }

    #[test]
    fn test_unlinked_selections_parked_until_linked() {
        let store = FakeStore::new();
        *store.sequence.lock() = Some(2);
        *store.unlinked.lock() = vec![EntityId::new(10)];
        store.put_selection(10, None, Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.bulk_load().unwrap();
        assert_eq!(synchronizer.pending_len(), 1);

        store.put_selection(10, Some("cat"), Some("h1"));
        synchronizer.on_change_event(&[updated(3, EntityKind::Query).at_sequence(3)]);

        assert_eq!(synchronizer.pending_len(), 0);
        assert_eq!(index.read().get("cat"), Some(&freq(&[("h1", 1)])));
    }

    #[test]
    fn test_dropped_store_is_an_error() {
        let store = FakeStore::new();
        let (synchronizer, _index) = synchronizer(&store, 8);
        drop(store);

        assert!(matches!(
            synchronizer.bulk_load(),
            Err(StoreError::Unavailable(_))
        ));
    }
}

mod on_change_event {
    use super::common::*;
    use super::*;

    #[test]
    fn test_created_selection_increments() {
        let store = FakeStore::new();
        store.put_selection(10, Some("cat"), Some("h1"));
        store.put_selection(11, Some("cat"), Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);
        synchronizer.on_change_event(&[created(11, EntityKind::Selection)]);

        assert_eq!(index.read().get("cat"), Some(&freq(&[("h1", 2)])));
    }

    #[test]
    fn test_other_events_ignored() {
        let store = FakeStore::new();
        store.put_selection(10, Some("cat"), Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.on_change_event(&[
            updated(10, EntityKind::Selection),
            ChangeEvent {
                id: EntityId::new(10),
                kind: EntityKind::Selection,
                event_type: EventType::Deleted,
                sequence: 0,
            },
            created(10, EntityKind::Match),
            created(10, EntityKind::Query),
        ]);

        assert!(index.read().is_empty());
    }

    #[test]
    fn test_malformed_events_dropped() {
        let store = FakeStore::new();
        store.put_selection(10, Some("cat"), None);
        store.put_selection(12, Some("dog"), Some("h2"));
        let (synchronizer, index) = synchronizer(&store, 8);

        // 10 has no match, 11 does not exist; 12 in the same batch still applies.
        synchronizer.on_change_event(&[
            created(10, EntityKind::Selection),
            created(11, EntityKind::Selection),
            created(12, EntityKind::Selection),
        ]);

        assert_eq!(index.read().prefix_search(""), freq(&[("h2", 1)]));
        assert_eq!(synchronizer.pending_len(), 0);
    }

    #[test]
    fn test_read_failure_drops_event() {
        let store = FakeStore::new();
        store.put_selection(10, Some("cat"), Some("h1"));
        *store.fail_reads.lock() = true;
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);

        assert!(index.read().is_empty());
        assert_eq!(synchronizer.pending_len(), 0);
    }

    #[test]
    fn test_dropped_store_makes_events_no_ops() {
        let store = FakeStore::new();
        store.put_selection(10, Some("cat"), Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);
        drop(store);

        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);

        assert!(index.read().is_empty());
    }
}

mod pending_links {
    use super::common::*;
    use super::*;

    #[test]
    fn test_unlinked_selection_applied_after_query_event() {
        let store = FakeStore::new();
        store.put_selection(10, None, Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);
        assert_eq!(synchronizer.pending_len(), 1);
        assert!(index.read().is_empty());

        store.put_selection(10, Some("cat"), Some("h1"));
        synchronizer.on_change_event(&[updated(3, EntityKind::Query)]);

        assert_eq!(synchronizer.pending_len(), 0);
        assert_eq!(index.read().get("cat"), Some(&freq(&[("h1", 1)])));
    }

    #[test]
    fn test_same_batch_link_resolves() {
        let store = FakeStore::new();
        store.put_selection(10, None, Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);
        store.put_selection(10, Some("cat"), Some("h1"));
        synchronizer.on_change_event(&[
            created(11, EntityKind::Match),
            created(3, EntityKind::Query),
        ]);

        assert_eq!(index.read().get("cat"), Some(&freq(&[("h1", 1)])));
    }

    #[test]
    fn test_still_unlinked_stays_pending() {
        let store = FakeStore::new();
        store.put_selection(10, None, Some("h1"));
        let (synchronizer, _index) = synchronizer(&store, 8);

        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);
        synchronizer.on_change_event(&[updated(3, EntityKind::Query)]);

        assert_eq!(synchronizer.pending_len(), 1);
    }

    #[test]
    fn test_duplicate_event_parked_once() {
        let store = FakeStore::new();
        store.put_selection(10, None, Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 8);

        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);
        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);
        assert_eq!(synchronizer.pending_len(), 1);

        store.put_selection(10, Some("cat"), Some("h1"));
        synchronizer.on_change_event(&[updated(3, EntityKind::Query)]);
        assert_eq!(index.read().get("cat"), Some(&freq(&[("h1", 1)])));
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let store = FakeStore::new();
        for id in 1..=3 {
            store.put_selection(id, None, Some("h1"));
        }
        let (synchronizer, index) = synchronizer(&store, 2);

        for id in 1..=3 {
            synchronizer.on_change_event(&[created(id, EntityKind::Selection)]);
        }
        assert_eq!(synchronizer.pending_len(), 2);

        for id in 1..=3 {
            store.put_selection(id, Some("cat"), Some("h1"));
        }
        synchronizer.on_change_event(&[updated(9, EntityKind::Query)]);

        // Selection 1 was evicted, so only 2 and 3 count.
        assert_eq!(index.read().get("cat"), Some(&freq(&[("h1", 2)])));
    }

    #[test]
    fn test_zero_capacity_never_parks() {
        let store = FakeStore::new();
        store.put_selection(10, None, Some("h1"));
        let (synchronizer, index) = synchronizer(&store, 0);

        synchronizer.on_change_event(&[created(10, EntityKind::Selection)]);
        store.put_selection(10, Some("cat"), Some("h1"));
        synchronizer.on_change_event(&[updated(3, EntityKind::Query)]);

        assert_eq!(synchronizer.pending_len(), 0);
        assert!(index.read().is_empty());
    }
}
