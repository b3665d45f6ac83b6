use chrono::Local;
use qhist_core::recorder::QueryRecorder;
use qhist_core::store::{DurableStore, RedbStore, StoreStats};
use qhist_core::types::{Config, MatchHash, QueryString};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn open_store(temp: &TempDir) -> Arc<RedbStore> {
    let config = Config {
        base_path: temp.path().to_path_buf(),
    };
    Arc::new(RedbStore::open(&config).unwrap())
}

/// Verify concurrent recorders sharing one store never duplicate a query or match.
#[test]
fn test_concurrent_recording_reuses_unique_keys() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let recorder = QueryRecorder::new(store.clone());
            thread::spawn(move || {
                let cancel = CancellationToken::new();
                for _ in 0..25 {
                    recorder
                        .add_query("shared", "h1", Local::now(), &cancel)
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(
        store.stats().unwrap(),
        StoreStats {
            queries: 1,
            selections: 100,
            matches: 1,
        }
    );
    let rows = store.selection_counts().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].count, 100);
}

/// Verify recorded observations survive reopening the database.
#[test]
fn test_recorded_history_survives_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let recorder = QueryRecorder::new(open_store(&temp));
        let cancel = CancellationToken::new();
        recorder
            .add_query("cat photos", "h1", Local::now(), &cancel)
            .unwrap();
        recorder
            .add_query("dog", "h2", Local::now(), &cancel)
            .unwrap();
    }

    let store = open_store(&temp);

    let query = QueryString::try_new("cat photos".to_string()).unwrap();
    let hash = MatchHash::try_new("h2".to_string()).unwrap();
    assert!(store.find_query(&query).unwrap().is_some());
    assert!(store.find_match(&hash).unwrap().is_some());
    assert_eq!(store.selection_counts().unwrap().len(), 2);
}

/// Verify a recorded selection carries an RFC 3339 timestamp with an offset.
#[test]
fn test_selection_date_is_rfc3339() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let recorder = QueryRecorder::new(store.clone());
    let now = Local::now();

    recorder
        .add_query("foo", "abc", now, &CancellationToken::new())
        .unwrap();

    let query = QueryString::try_new("foo".to_string()).unwrap();
    let query_id = store.find_query(&query).unwrap().unwrap();
    // Ids are allocated in persist order: match, selection, query.
    let selection = qhist_core::types::EntityId::new(query_id.get() - 1);
    let links = store.selection_links(selection).unwrap().unwrap();
    let parsed = chrono::DateTime::parse_from_rfc3339(&links.selection_date).unwrap();
    assert_eq!(parsed.timestamp(), now.timestamp());
    assert_eq!(links.query, Some(query));
}
