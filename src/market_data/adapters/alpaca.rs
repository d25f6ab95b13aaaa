// Alpaca REST adapter: assets, bars and snapshots for the refresh job

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use itertools::Itertools;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::alpaca_types::{snapshot_from_wire, AlpacaAsset, BarsPage, SnapshotsResponse};
use super::{Asset, Bar, MarketDataProvider, SymbolSnapshot};
use crate::error::ProviderError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
// Calendar days to look back for daily bars; covers weekends and holidays
const DAILY_LOOKBACK_PAD_DAYS: i64 = 3;
const PAGE_LIMIT: &str = "10000";

pub struct AlpacaClient {
    client: Client,
    data_url: String,    // "https://data.alpaca.markets"
    trading_url: String, // "https://paper-api.alpaca.markets"
    key: String,
    secret: String,
    feed: String,
}

impl AlpacaClient {
    pub fn new(data_url: &str, trading_url: &str, key: &str, secret: &str) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).gzip(true).build()?;
        Ok(Self {
            client,
            data_url: data_url.trim_end_matches('/').to_string(),
            trading_url: trading_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            secret: secret.to_string(),
            feed: "iex".into(),
        })
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("APCA-API-KEY-ID", &self.key)
            .header("APCA-API-SECRET-KEY", &self.secret)
    }

    async fn fetch<T: DeserializeOwned>(&self, endpoint: &str, req: RequestBuilder) -> Result<T, ProviderError> {
        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Status { endpoint: endpoint.to_string(), status: status.as_u16(), body });
        }
        let bytes = res.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Decode { endpoint: endpoint.to_string(), reason: e.to_string() })
    }

    // Follows next_page_token until the range is exhausted
    async fn bars(&self, symbol: &str, params: &[(&str, String)]) -> Result<Vec<Bar>, ProviderError> {
        let url = format!("{}/v2/stocks/{}/bars", self.data_url, symbol);
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.get(&url).query(params);
            if let Some(token) = &page_token {
                req = req.query(&[("page_token", token)]);
            }
            let page: BarsPage = self.fetch(&url, req).await?;
            out.extend(page.bars.unwrap_or_default().into_iter().map(Bar::from));
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }
        debug!(symbol, bars = out.len(), "fetched bars");
        Ok(out)
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for AlpacaClient {
    #[instrument(level = "debug", skip(self))]
    async fn active_assets(&self) -> Result<Vec<Asset>, ProviderError> {
        let url = format!("{}/v2/assets", self.trading_url);
        let req = self.get(&url).query(&[("status", "active"), ("asset_class", "us_equity")]);
        let assets: Vec<AlpacaAsset> = self.fetch(&url, req).await?;
        Ok(assets.into_iter().map(Asset::from).collect())
    }

    #[instrument(level = "debug", skip(self))]
    async fn daily_bars(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>, ProviderError> {
        let start = Utc::now() - TimeDelta::days(lookback as i64 * 2 + DAILY_LOOKBACK_PAD_DAYS);
        let params = [
            ("timeframe", "1Day".to_string()),
            ("start", start.to_rfc3339()),
            ("limit", PAGE_LIMIT.to_string()),
            ("feed", self.feed.clone()),
        ];
        let mut bars = self.bars(symbol, &params).await?;
        let skip = bars.len().saturating_sub(lookback);
        bars.drain(..skip);
        Ok(bars)
    }

    #[instrument(level = "debug", skip(self))]
    async fn minute_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ProviderError> {
        let params = [
            ("timeframe", "1Min".to_string()),
            ("start", start.to_rfc3339()),
            ("end", end.to_rfc3339()),
            ("adjustment", "raw".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
            ("feed", self.feed.clone()),
        ];
        self.bars(symbol, &params).await
    }

    #[instrument(level = "debug", skip(self, symbols), fields(count = symbols.len()))]
    async fn snapshots(&self, symbols: &[String]) -> Result<Vec<SymbolSnapshot>, ProviderError> {
        let url = format!("{}/v2/stocks/snapshots", self.data_url);
        let req = self
            .get(&url)
            .query(&[("symbols", symbols.iter().join(",")), ("feed", self.feed.clone())]);
        let resp: SnapshotsResponse = self.fetch(&url, req).await?;
        Ok(resp.into_iter().map(|(symbol, snap)| snapshot_from_wire(symbol, snap)).collect())
    }
}
