use std::collections::VecDeque;

use ahash::AHashMap;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::trace;

use crate::engine::types::PriceSample;

pub const PRICE_WINDOW_MINUTES: i64 = 5;

/// Rolling (timestamp, price) window per symbol.
///
/// Eviction is lazy: a symbol's old samples are dropped on its next `record`,
/// measured back from the newest sample it holds.
#[derive(Debug)]
pub struct PriceHistoryTracker {
    window: TimeDelta,
    samples: AHashMap<String, VecDeque<PriceSample>>,
}

impl PriceHistoryTracker {
    pub fn new() -> Self {
        Self::with_window(TimeDelta::minutes(PRICE_WINDOW_MINUTES))
    }

    pub fn with_window(window: TimeDelta) -> Self {
        Self { window, samples: AHashMap::new() }
    }

    pub fn record(&mut self, symbol: &str, timestamp: DateTime<Utc>, price: f64) {
        let history = self.samples.entry(symbol.to_string()).or_default();
        let sample = PriceSample { timestamp, price };

        // Keep the sequence sorted even if the feed hands us a late print
        match history.back() {
            Some(last) if last.timestamp > timestamp => {
                let pos = history.partition_point(|s| s.timestamp <= timestamp);
                history.insert(pos, sample);
            }
            _ => history.push_back(sample),
        }

        let newest = history.back().map(|s| s.timestamp).unwrap_or(timestamp);
        let cutoff = newest - self.window;
        let before = history.len();
        while history.front().is_some_and(|s| s.timestamp < cutoff) {
            history.pop_front();
        }
        trace!(symbol, evicted = before - history.len(), retained = history.len(), "price sample recorded");
    }

    /// Percent move from the oldest to the newest retained sample.
    pub fn change_over_window(&self, symbol: &str) -> f64 {
        let Some(history) = self.samples.get(symbol) else { return 0.0 };
        if history.len() < 2 {
            return 0.0;
        }
        match (history.front(), history.back()) {
            (Some(first), Some(last)) if first.price != 0.0 => {
                (last.price - first.price) / first.price * 100.0
            }
            _ => 0.0,
        }
    }

    pub fn samples(&self, symbol: &str) -> Option<&VecDeque<PriceSample>> {
        self.samples.get(symbol)
    }
}

impl Default for PriceHistoryTracker {
    fn default() -> Self {
        Self::new()
    }
}
