// Shared trait + types for market data query backends

use chrono::{DateTime, Utc};

use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub symbol: String,
    pub tradable: bool,
}

// One OHLCV bar, any resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

// Current-day view of a symbol. Any field may be missing upstream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub latest_price: Option<f64>,
    pub daily_volume: Option<u64>,
    pub daily_open: Option<f64>,
}

/// Request/response market-data capability used by the refresh job.
///
/// Every call may fail on its own; callers isolate failures per symbol or batch.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Active US equities, in the provider's listing order.
    async fn active_assets(&self) -> Result<Vec<Asset>, ProviderError>;

    /// The most recent `lookback` daily bars, oldest first.
    async fn daily_bars(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>, ProviderError>;

    /// Minute bars in `[start, end]`, oldest first.
    async fn minute_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ProviderError>;

    async fn snapshots(&self, symbols: &[String]) -> Result<Vec<SymbolSnapshot>, ProviderError>;
}

pub mod alpaca;
pub mod alpaca_types;
