use std::sync::Arc;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::engine::types::{CandidateList, StatsSnapshot};

/// Everything one refresh cycle produced. Never mutated after construction.
#[derive(Debug, Default)]
pub struct StatsBook {
    pub snapshots: AHashMap<String, StatsSnapshot>,
    pub candidates: CandidateList,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Shared handle to the latest `StatsBook`.
///
/// The refresh job is the only writer and swaps in a whole new book; readers
/// clone the `Arc` and never see a half-applied cycle.
#[derive(Debug, Default)]
pub struct StatsCache {
    current: RwLock<Arc<StatsBook>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<StatsBook> {
        Arc::clone(&self.current.read())
    }

    pub fn snapshot(&self, symbol: &str) -> Option<StatsSnapshot> {
        self.current.read().snapshots.get(symbol).cloned()
    }

    pub fn candidates(&self) -> CandidateList {
        self.current.read().candidates.clone()
    }

    pub fn replace(&self, book: StatsBook) {
        *self.current.write() = Arc::new(book);
    }
}
