//! History controller: owns the store, the subscription and the index.

use crate::index::{Frequencies, PrefixFrequencyIndex};
use crate::service::PrefixSearchService;
use crate::synchronizer::HistorySynchronizer;
use chrono::Local;
use error::InitError;
use parking_lot::RwLock;
use qhist_core::recorder::QueryRecorder;
use qhist_core::recorder::error::RecordError;
use qhist_core::store::{ChangeEvent, DurableStore, RedbStore, Subscription};
use qhist_core::types::{Config, HistoryConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod error {
    use qhist_core::store::error::StoreError;
    use qhist_core::types::HistoryConfigError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum InitError {
        #[error("Failed to load history config: {0}")]
        Config(#[from] HistoryConfigError),

        #[error("Failed to open history store: {0}")]
        Store(#[source] StoreError),

        #[error("Failed to load query history: {0}")]
        BulkLoad(#[source] StoreError),
    }
}

pub struct QueryHistory {
    // Declared first so it is dropped first: no callback may run once teardown starts.
    _subscription: Subscription,
    synchronizer: Arc<HistorySynchronizer>,
    recorder: QueryRecorder,
    searcher: PrefixSearchService,
    store: Arc<dyn DurableStore>,
}

/// Lifecycle operations.
impl QueryHistory {
    /// Opens the redb store under `config.base_path` and loads the history.
    ///
    /// Settings come from `config.config_path()` when that file exists.
    pub fn open(config: Config) -> Result<Self, InitError> {
        let settings = HistoryConfig::load(&config.config_path())?;
        for problem in settings.validate() {
            tracing::warn!(%problem, "Invalid history setting; using default.");
        }
        let settings = settings.with_defaults_for_invalid();

        let store = RedbStore::open(&config).map_err(InitError::Store)?;
        Self::with_store(Arc::new(store), &settings)
    }

    /// Subscribes to `store`, then bulk-loads the index from it.
    ///
    /// The controller is returned only once the index is fully populated.
    pub fn with_store(
        store: Arc<dyn DurableStore>,
        settings: &HistoryConfig,
    ) -> Result<Self, InitError> {
        let index = Arc::new(RwLock::new(PrefixFrequencyIndex::new()));
        let synchronizer = Arc::new(HistorySynchronizer::new(
            &store,
            index.clone(),
            &settings.sync,
        ));

        let subscription = {
            let synchronizer = synchronizer.clone();
            store.subscribe(Arc::new(move |events: &[ChangeEvent]| {
                synchronizer.on_change_event(events)
            }))
        };

        let rows = synchronizer.bulk_load().map_err(InitError::BulkLoad)?;
        tracing::info!(
            rows,
            queries = index.read().len(),
            "Loaded query history."
        );

        Ok(Self {
            _subscription: subscription,
            synchronizer,
            recorder: QueryRecorder::new(store.clone()),
            searcher: PrefixSearchService::new(index),
            store,
        })
    }
}

/// Read operations.
impl QueryHistory {
    /// Match hash → count, merged over every recorded query starting with `prefix`.
    pub fn history_for_prefix(&self, prefix: &str) -> Frequencies {
        self.searcher.search(prefix)
    }

    /// A read handle that can be moved to other threads.
    pub fn searcher(&self) -> PrefixSearchService {
        self.searcher.clone()
    }

    /// Selections still waiting for their query link.
    pub fn pending_links(&self) -> usize {
        self.synchronizer.pending_len()
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }
}

/// Write operations.
impl QueryHistory {
    /// Records that `query` resolved to `hash`.
    ///
    /// The index picks the observation up from the store's change feed, so a
    /// search issued right after this returns may still see the old count.
    pub fn add_query(
        &self,
        query: &str,
        hash: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RecordError> {
        self.recorder.add_query(query, hash, Local::now(), cancel)
    }
}

impl Drop for QueryHistory {
    fn drop(&mut self) {
        tracing::debug!(
            pending = self.synchronizer.pending_len(),
            "Closing query history."
        );
    }
}
