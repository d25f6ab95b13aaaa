use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{instrument, trace};

use crate::engine::halt::HaltDetector;
use crate::engine::high_of_day::HighOfDayTracker;
use crate::engine::price_history::PriceHistoryTracker;
use crate::engine::stats_cache::StatsCache;
use crate::engine::types::{ScreenedTrade, SymbolRuntimeState, Tick};
use crate::publish::{Publisher, TRADE_EVENT};

/// Consumer of ticks in feed delivery order.
pub trait TickSink: Send + Sync {
    fn on_tick(&self, tick: Tick);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenCriteria {
    pub min_price: f64,
    pub max_price: f64,
    pub min_change_5min: f64,
}

impl ScreenCriteria {
    // Both price bounds are exclusive
    pub fn passes(&self, price: f64, change_5min: f64) -> bool {
        price > self.min_price && price < self.max_price && change_5min > self.min_change_5min
    }
}

impl Default for ScreenCriteria {
    fn default() -> Self {
        Self { min_price: 1.0, max_price: 20.0, min_change_5min: 0.1 }
    }
}

/// Per-tick screening stage: updates the symbol trackers, then publishes the
/// tick enriched with cached stats when it passes the criteria.
///
/// The only writer of price history, highs and halt state.
pub struct TradeFilter {
    history: PriceHistoryTracker,
    highs: HighOfDayTracker,
    halts: HaltDetector,
    criteria: ScreenCriteria,
    stats: Arc<StatsCache>,
    publisher: Publisher,
}

impl TradeFilter {
    pub fn new(criteria: ScreenCriteria, stats: Arc<StatsCache>, publisher: Publisher) -> Self {
        Self {
            history: PriceHistoryTracker::new(),
            highs: HighOfDayTracker::new(),
            halts: HaltDetector::new(),
            criteria,
            stats,
            publisher,
        }
    }

    /// `received_at` drives halt detection; the tick's own timestamp drives the
    /// price window.
    #[instrument(level = "trace", skip(self, tick), fields(symbol = %tick.symbol))]
    pub fn process(&mut self, tick: &Tick, received_at: DateTime<Utc>) -> Option<ScreenedTrade> {
        let symbol = tick.symbol.as_str();
        metrics::counter!("scanx_ticks_total").increment(1);

        self.history.record(symbol, tick.timestamp, tick.price);
        let change = self.history.change_over_window(symbol);
        let halt_resume = self.halts.observe(symbol, received_at, tick.price);
        let hod_break = self.highs.update(symbol, tick.price);

        if !self.criteria.passes(tick.price, change) {
            return None;
        }

        // Not scored by the refresh job yet: invisible downstream
        let Some(stats) = self.stats.snapshot(symbol) else {
            trace!(symbol, change, "passed screen but has no stats");
            return None;
        };

        let record = ScreenedTrade {
            kind: "t",
            tick: tick.clone(),
            percent_change: format!("{:.2}", change),
            hod_break,
            halt_resume,
            rvol5min: stats.rvol_5min,
            rvol: stats.rvol,
            volume: stats.volume_5min,
            gap_percent: stats.gap_percent,
        };
        let delivered = self.publisher.publish(TRADE_EVENT, &record);
        metrics::counter!("scanx_trades_published_total").increment(1);
        trace!(symbol, delivered, "published screened trade");
        Some(record)
    }

    pub fn symbol_state(&self, symbol: &str) -> Option<SymbolRuntimeState> {
        let last_trade_at = self.halts.last_trade_at(symbol)?;
        Some(SymbolRuntimeState {
            price_history: self.history.samples(symbol).cloned().unwrap_or_default(),
            high_of_day: self.highs.high(symbol),
            last_trade_at: Some(last_trade_at),
            halt_event: self.halts.halt_event(symbol),
        })
    }
}

impl TickSink for Mutex<TradeFilter> {
    fn on_tick(&self, tick: Tick) {
        self.lock().process(&tick, Utc::now());
    }
}
