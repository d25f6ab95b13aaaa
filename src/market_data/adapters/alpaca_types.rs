// Source: Alpaca market data v2 (REST + stock stream) and trading v2 /assets
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Asset, Bar, SymbolSnapshot};
use crate::engine::types::Tick;

// ---- REST ----

#[derive(Debug, Deserialize)]
pub struct AlpacaAsset {
    pub symbol: String,
    #[serde(default)]
    pub tradable: bool,
    #[serde(default)]
    pub status: String,
}

impl From<AlpacaAsset> for Asset {
    fn from(a: AlpacaAsset) -> Self {
        Asset { symbol: a.symbol, tradable: a.tradable && a.status == "active" }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaBar {
    pub t: DateTime<Utc>,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: u64,
}

impl From<AlpacaBar> for Bar {
    fn from(b: AlpacaBar) -> Self {
        Bar { timestamp: b.t, open: b.o, high: b.h, low: b.l, close: b.c, volume: b.v }
    }
}

// GET /v2/stocks/{symbol}/bars
#[derive(Debug, Deserialize)]
pub struct BarsPage {
    // null when the range is empty
    #[serde(default)]
    pub bars: Option<Vec<AlpacaBar>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LatestTrade {
    pub p: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlpacaSnapshot {
    #[serde(default)]
    pub latest_trade: Option<LatestTrade>,
    #[serde(default)]
    pub daily_bar: Option<AlpacaBar>,
}

// GET /v2/stocks/snapshots -> { "AAPL": {...}, "XYZ": null }
pub type SnapshotsResponse = HashMap<String, Option<AlpacaSnapshot>>;

pub fn snapshot_from_wire(symbol: String, snap: Option<AlpacaSnapshot>) -> SymbolSnapshot {
    let Some(snap) = snap else {
        return SymbolSnapshot { symbol, ..Default::default() };
    };
    SymbolSnapshot {
        symbol,
        latest_price: snap.latest_trade.map(|t| t.p),
        daily_volume: snap.daily_bar.as_ref().map(|b| b.v),
        daily_open: snap.daily_bar.as_ref().map(|b| b.o),
    }
}

// ---- Stream ----

/// Outbound control frames. Serialized as `{"action": ..., ...}`.
#[derive(Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlMessage {
    Auth { key: String, secret: String },
    Subscribe { trades: Vec<String> },
    Unsubscribe { trades: Vec<String> },
}

impl std::fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMessage::Auth { .. } => write!(f, "Auth {{ .. }}"),
            ControlMessage::Subscribe { trades } => write!(f, "Subscribe({trades:?})"),
            ControlMessage::Unsubscribe { trades } => write!(f, "Unsubscribe({trades:?})"),
        }
    }
}

/// One element of an inbound stream array, keyed by its `T` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "T")]
pub enum InboundMessage {
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<i64>,
        #[serde(default)]
        msg: String,
    },
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        trades: Vec<String>,
    },
    #[serde(rename = "t")]
    Trade(Tick),
    // quotes, bars, statuses... not subscribed, ignored if they show up
    #[serde(other)]
    Other,
}

pub const AUTHENTICATED_MSG: &str = "authenticated";
