use ahash::AHashMap;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

use crate::engine::types::HaltEvent;

pub const HALT_GAP_SECS: i64 = 10;
pub const RESUME_SIGNAL_SECS: i64 = 2;

#[derive(Debug, Clone, Copy)]
struct LastTrade {
    at: DateTime<Utc>,
    price: f64,
}

/// Infers halt-then-resume from gaps between trades for a symbol.
///
/// `observe` is fed receipt times, so a quiet tape on our side of the wire
/// counts as a halt too. The resume flag is a pure function of elapsed time
/// since the last recorded resumption and is never cleared explicitly.
#[derive(Debug)]
pub struct HaltDetector {
    gap: TimeDelta,
    resume_window: TimeDelta,
    last_trade: AHashMap<String, LastTrade>,
    halts: AHashMap<String, HaltEvent>,
}

impl HaltDetector {
    pub fn new() -> Self {
        Self {
            gap: TimeDelta::seconds(HALT_GAP_SECS),
            resume_window: TimeDelta::seconds(RESUME_SIGNAL_SECS),
            last_trade: AHashMap::new(),
            halts: AHashMap::new(),
        }
    }

    pub fn observe(&mut self, symbol: &str, now: DateTime<Utc>, price: f64) -> bool {
        if let Some(prev) = self.last_trade.get(symbol) {
            let quiet = now - prev.at;
            if quiet > self.gap {
                info!(symbol, halted_secs = quiet.num_seconds(), price, "halt resume detected");
                self.halts.insert(
                    symbol.to_string(),
                    HaltEvent {
                        halt_started_at: prev.at,
                        resumed_at: now,
                        last_price_before_halt: prev.price,
                        resume_price: price,
                    },
                );
            }
        }
        self.last_trade.insert(symbol.to_string(), LastTrade { at: now, price });

        self.halts
            .get(symbol)
            .is_some_and(|halt| now - halt.resumed_at < self.resume_window)
    }

    pub fn last_trade_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_trade.get(symbol).map(|t| t.at)
    }

    pub fn halt_event(&self, symbol: &str) -> Option<HaltEvent> {
        self.halts.get(symbol).copied()
    }
}

impl Default for HaltDetector {
    fn default() -> Self {
        Self::new()
    }
}
