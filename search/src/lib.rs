//! In-memory side of the query history.
//!
//! Keeps a prefix index of past queries and how often each match was chosen,
//! fed by a bulk load at startup and by the store's change feed afterwards.
//!
//! # Design
//!
//! - [`PrefixFrequencyIndex`] is a byte trie: query string → (match hash → count).
//! - The index lives behind one `RwLock`. Every increment takes the write lock,
//!   every prefix search the read lock, so readers never see a half-applied update.
//! - [`QueryHistory`] owns the store, the subscription and the index. Dropping it
//!   unsubscribes before anything else is released.

mod history;
mod index;
mod service;
mod synchronizer;

pub use history::QueryHistory;
pub use history::error::InitError;
pub use index::{Frequencies, PrefixFrequencyIndex, PrefixRange};
pub use service::PrefixSearchService;
pub use synchronizer::HistorySynchronizer;

pub use qhist_core::recorder::error::{RecordError, RecordStep};
pub use tokio_util::sync::CancellationToken;
