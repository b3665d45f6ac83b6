//! Records query observations in the durable store.
//!
//! The recorder only writes. The in-memory index learns about new
//! observations through the store's change feed.

use crate::store::error::StoreError;
use crate::store::{DurableStore, MatchResource, QueryResource, Resource, SelectionResource};
use crate::types::{MatchHash, QueryString};
use chrono::{DateTime, Local};
use error::{RecordError, RecordStep};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod error {
    use crate::store::error::StoreError;
    use crate::types::{MatchHashError, QueryStringError};
    use std::fmt;
    use thiserror::Error;

    /// Durable-store step of `add_query` that failed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RecordStep {
        LookupQuery,
        LookupMatch,
        PersistMatch,
        PersistSelection,
        PersistQuery,
    }

    impl fmt::Display for RecordStep {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                RecordStep::LookupQuery => write!(f, "looking up query"),
                RecordStep::LookupMatch => write!(f, "looking up match"),
                RecordStep::PersistMatch => write!(f, "persisting match"),
                RecordStep::PersistSelection => write!(f, "persisting selection"),
                RecordStep::PersistQuery => write!(f, "persisting query"),
            }
        }
    }

    #[derive(Debug, Error)]
    pub enum RecordError {
        #[error("Invalid query: {0}")]
        InvalidQuery(#[from] QueryStringError),

        #[error("Invalid match hash: {0}")]
        InvalidHash(#[from] MatchHashError),

        #[error("Store error while {step}: {source}")]
        Store {
            step: RecordStep,
            #[source]
            source: StoreError,
        },

        #[error("Recording was cancelled")]
        Cancelled,
    }

    impl RecordError {
        pub fn is_cancelled(&self) -> bool {
            matches!(self, RecordError::Cancelled)
        }

        /// The store step that failed, if this is a store error.
        pub fn step(&self) -> Option<RecordStep> {
            match self {
                RecordError::Store { step, .. } => Some(*step),
                _ => None,
            }
        }
    }
}

pub struct QueryRecorder {
    store: Arc<dyn DurableStore>,
}

impl QueryRecorder {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Records that `query` resolved to the match identified by `hash` at `now`.
    ///
    /// Steps already written stay written when a later step fails or the call
    /// is cancelled; `cancel` is checked before every store step.
    pub fn add_query(
        &self,
        query: &str,
        hash: &str,
        now: DateTime<Local>,
        cancel: &CancellationToken,
    ) -> Result<(), RecordError> {
        let query = QueryString::try_new(query.to_string())?;
        let hash = MatchHash::try_new(hash.to_string())?;

        checkpoint(cancel)?;
        let query_id = self
            .store
            .find_query(&query)
            .map_err(at(RecordStep::LookupQuery))?;

        let mut selection = SelectionResource {
            id: None,
            selection_date: now.to_rfc3339(),
            matched: None,
        };

        checkpoint(cancel)?;
        let existing_match = self
            .store
            .find_match(&hash)
            .map_err(at(RecordStep::LookupMatch))?;
        let match_id = match existing_match {
            Some(id) => id,
            None => {
                checkpoint(cancel)?;
                self.store
                    .update_resource(&Resource::Match(MatchResource {
                        id: None,
                        hash: hash.clone(),
                    }))
                    .map_err(at(RecordStep::PersistMatch))?
            }
        };
        selection.matched = Some(match_id);

        checkpoint(cancel)?;
        let selection_id = self
            .store
            .update_resource(&Resource::Selection(selection))
            .map_err(at(RecordStep::PersistSelection))?;

        checkpoint(cancel)?;
        self.store
            .update_resource(&Resource::Query(QueryResource {
                id: query_id,
                query_string: query.clone(),
                selections: vec![selection_id],
            }))
            .map_err(at(RecordStep::PersistQuery))?;

        tracing::debug!(
            query = %query,
            hash = %hash,
            selection = %selection_id,
            new_query = query_id.is_none(),
            "Recorded query selection."
        );

        Ok(())
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), RecordError> {
    if cancel.is_cancelled() {
        return Err(RecordError::Cancelled);
    }
    Ok(())
}

fn at(step: RecordStep) -> impl FnOnce(StoreError) -> RecordError {
    move |source| RecordError::Store { step, source }
}
