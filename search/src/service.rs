//! Read path over the shared index.

use crate::index::{Frequencies, PrefixFrequencyIndex};
use parking_lot::RwLock;
use std::sync::Arc;

/// Cloneable read handle on the shared index.
#[derive(Clone)]
pub struct PrefixSearchService {
    index: Arc<RwLock<PrefixFrequencyIndex>>,
}

impl PrefixSearchService {
    pub fn new(index: Arc<RwLock<PrefixFrequencyIndex>>) -> Self {
        Self { index }
    }

    /// Match hash → total count across every query starting with `prefix`.
    pub fn search(&self, prefix: &str) -> Frequencies {
        self.index.read().prefix_search(prefix)
    }
}
