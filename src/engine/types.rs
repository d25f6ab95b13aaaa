use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// Trade print as delivered by the upstream feed. Field names follow the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "s", default)]
    pub size: u64,
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<u64>,
    #[serde(rename = "x", default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(rename = "c", default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(rename = "z", default, skip_serializing_if = "Option::is_none")]
    pub tape: Option<String>,
}

impl Tick {
    pub fn new(symbol: &str, price: f64, size: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            size,
            timestamp,
            trade_id: None,
            exchange: None,
            conditions: Vec::new(),
            tape: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HaltEvent {
    pub halt_started_at: DateTime<Utc>,
    pub resumed_at: DateTime<Utc>,
    pub last_price_before_halt: f64,
    pub resume_price: f64,
}

/// Point-in-time view of everything the tick path tracks for one symbol.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRuntimeState {
    pub price_history: VecDeque<PriceSample>,
    pub high_of_day: Option<f64>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub halt_event: Option<HaltEvent>,
}

// Output of one refresh cycle for one symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub percent_change_5min: f64,
    pub rvol: f64,
    pub rvol_5min: f64,
    pub volume_5min: u64,
    pub gap_percent: f64,
    pub premarket_volume: u64,
}

/// Ranked symbols chosen by the last refresh cycle, best first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CandidateList {
    symbols: Vec<String>,
}

impl CandidateList {
    pub const MAX_LEN: usize = 25;

    pub fn new(mut symbols: Vec<String>) -> Self {
        symbols.truncate(Self::MAX_LEN);
        Self { symbols }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// Record fanned out to subscribers: raw tick plus screening context
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenedTrade {
    #[serde(rename = "T")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub tick: Tick,
    pub percent_change: String,
    pub hod_break: bool,
    pub halt_resume: bool,
    pub rvol5min: f64,
    pub rvol: f64,
    pub volume: u64,
    pub gap_percent: f64,
}
