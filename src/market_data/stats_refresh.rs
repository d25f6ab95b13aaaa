//! Periodic ranking job: universe -> average volumes -> snapshots -> minute
//! bars -> candidate list, all under one in-flight cap.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::engine::stats_cache::{StatsBook, StatsCache};
use crate::engine::types::{CandidateList, StatsSnapshot};
use crate::error::ProviderError;
use crate::market_data::adapters::{Bar, MarketDataProvider};
use crate::market_data::subscriptions::SubscriptionManager;

pub const DAILY_LOOKBACK: usize = 10;
pub const MIN_MINUTE_BARS: usize = 6;
pub const PREMARKET_START_HOUR_UTC: u32 = 8;
const BARS_PER_WINDOW: usize = 5;

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub universe_size: usize,
    pub max_in_flight: usize,
    pub snapshot_batch: usize,
    pub prefilter_len: usize,
    pub min_rvol_5min: f64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self { universe_size: 100, max_in_flight: 5, snapshot_batch: 100, prefilter_len: 60, min_rvol_5min: 1.0 }
    }
}

/// Metrics derived from one symbol's session minute bars.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntradayMetrics {
    pub total_volume: u64,
    pub volume_5min: u64,
    pub percent_change_5min: f64,
    pub rvol_5min: f64,
    pub gap_percent: f64,
}

/// All zeros with fewer than [`MIN_MINUTE_BARS`] bars.
pub fn derive_intraday_metrics(bars: &[Bar]) -> IntradayMetrics {
    if bars.len() < MIN_MINUTE_BARS {
        return IntradayMetrics::default();
    }

    let total_volume: u64 = bars.iter().map(|b| b.volume).sum();
    let last = &bars[bars.len() - BARS_PER_WINDOW..];
    let volume_5min: u64 = last.iter().map(|b| b.volume).sum();

    let open = last[0].open;
    let close = last[BARS_PER_WINDOW - 1].close;
    let percent_change_5min = if open > 0.0 { (close - open) / open * 100.0 } else { 0.0 };

    let windows = bars.len() / BARS_PER_WINDOW;
    let avg_window_volume = total_volume as f64 / windows as f64;
    let rvol_5min = if avg_window_volume > 0.0 { volume_5min as f64 / avg_window_volume } else { 0.0 };

    let prior_close = bars[0].close;
    let gap_percent = if prior_close > 0.0 && bars[1].open > 0.0 {
        (bars[1].open - prior_close) / prior_close * 100.0
    } else {
        0.0
    };

    IntradayMetrics { total_volume, volume_5min, percent_change_5min, rvol_5min, gap_percent }
}

/// 08:00 UTC on `now`'s UTC date.
pub fn premarket_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(PREMARKET_START_HOUR_UTC, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
struct Mover {
    symbol: String,
    rvol: f64,
    day_change: f64,
}

pub struct StatsRefreshJob {
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<StatsCache>,
    // symbol -> mean daily volume; only successful non-zero results are kept
    avg_volumes: Mutex<AHashMap<String, f64>>,
    limiter: Semaphore,
    settings: RefreshSettings,
}

impl StatsRefreshJob {
    pub fn new(provider: Arc<dyn MarketDataProvider>, cache: Arc<StatsCache>, settings: RefreshSettings) -> Self {
        Self {
            provider,
            cache,
            avg_volumes: Mutex::new(AHashMap::new()),
            limiter: Semaphore::new(settings.max_in_flight.max(1)),
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<StatsCache> {
        &self.cache
    }

    pub fn average_volume(&self, symbol: &str) -> Option<f64> {
        self.avg_volumes.lock().get(symbol).copied()
    }

    /// One full cycle. Only a failed universe listing is an error; in that
    /// case the cache is left untouched.
    #[instrument(level = "debug", skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<CandidateList, ProviderError> {
        let universe = self.universe().await?;
        self.preload_average_volumes(&universe).await;

        let movers = self.movers(&universe).await;
        debug!(universe = universe.len(), movers = movers.len(), "snapshot pass done");

        let start = premarket_start(now);
        let scored = join_all(movers.into_iter().map(|m| self.score(m, start, now))).await;

        let mut ranked: Vec<(String, StatsSnapshot)> = scored
            .into_iter()
            .filter(|(_, s)| s.rvol_5min >= self.settings.min_rvol_5min && s.rvol >= 0.0)
            .collect();
        ranked.sort_by_key(|(_, s)| Reverse(OrderedFloat(s.percent_change_5min)));

        let candidates = CandidateList::new(ranked.iter().map(|(symbol, _)| symbol.clone()).collect());
        self.cache.replace(StatsBook {
            snapshots: ranked.into_iter().collect(),
            candidates: candidates.clone(),
            refreshed_at: Some(now),
        });
        Ok(candidates)
    }

    async fn universe(&self) -> Result<Vec<String>, ProviderError> {
        let assets = self.provider.active_assets().await?;
        Ok(assets
            .into_iter()
            .filter(|a| a.tradable && !a.symbol.contains('.'))
            .map(|a| a.symbol)
            .take(self.settings.universe_size)
            .collect())
    }

    async fn preload_average_volumes(&self, universe: &[String]) {
        let missing: Vec<&String> = {
            let known = self.avg_volumes.lock();
            universe.iter().filter(|s| !known.contains_key(s.as_str())).collect()
        };
        if missing.is_empty() {
            return;
        }

        let fetched = join_all(missing.into_iter().map(|symbol| async move {
            let _permit = self.limiter.acquire().await;
            match self.provider.daily_bars(symbol, DAILY_LOOKBACK).await {
                Ok(bars) if !bars.is_empty() => {
                    let avg = bars.iter().map(|b| b.volume as f64).sum::<f64>() / bars.len() as f64;
                    (avg > 0.0).then(|| (symbol.clone(), avg))
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "average volume fetch failed");
                    None
                }
            }
        }))
        .await;

        self.avg_volumes.lock().extend(fetched.into_iter().flatten());
    }

    // Snapshot pass: complete records only, top by day change
    async fn movers(&self, universe: &[String]) -> Vec<Mover> {
        let mut movers = Vec::new();
        for batch in universe.chunks(self.settings.snapshot_batch.max(1)) {
            let snapshots = match self.provider.snapshots(batch).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(batch = batch.len(), error = %e, "snapshot batch failed, skipping");
                    continue;
                }
            };

            let avg_volumes = self.avg_volumes.lock();
            for snap in snapshots {
                let (Some(price), Some(volume), Some(open)) = (snap.latest_price, snap.daily_volume, snap.daily_open) else {
                    continue;
                };
                if price <= 0.0 || open <= 0.0 || volume == 0 {
                    continue;
                }
                let avg = avg_volumes.get(&snap.symbol).copied().unwrap_or(0.0);
                movers.push(Mover {
                    rvol: if avg > 0.0 { volume as f64 / avg } else { 0.0 },
                    day_change: (price - open) / open * 100.0,
                    symbol: snap.symbol,
                });
            }
        }

        movers.sort_by_key(|m| Reverse(OrderedFloat(m.day_change)));
        movers.truncate(self.settings.prefilter_len);
        movers
    }

    async fn score(&self, mover: Mover, start: DateTime<Utc>, end: DateTime<Utc>) -> (String, StatsSnapshot) {
        let metrics = {
            let _permit = self.limiter.acquire().await;
            match self.provider.minute_bars(&mover.symbol, start, end).await {
                Ok(bars) => derive_intraday_metrics(&bars),
                Err(e) => {
                    warn!(symbol = %mover.symbol, error = %e, "minute bars fetch failed");
                    IntradayMetrics::default()
                }
            }
        };
        let snapshot = StatsSnapshot {
            percent_change_5min: metrics.percent_change_5min,
            rvol: mover.rvol,
            rvol_5min: metrics.rvol_5min,
            volume_5min: metrics.volume_5min,
            gap_percent: metrics.gap_percent,
            premarket_volume: metrics.total_volume,
        };
        (mover.symbol, snapshot)
    }
}

/// Runs the job, then reconciles subscriptions, then sleeps. Started at most once.
pub struct RefreshLoop {
    job: Arc<StatsRefreshJob>,
    subscriptions: Arc<SubscriptionManager>,
    period: Duration,
    started: AtomicBool,
}

impl RefreshLoop {
    pub fn new(job: Arc<StatsRefreshJob>, subscriptions: Arc<SubscriptionManager>, period: Duration) -> Self {
        Self { job, subscriptions, period, started: AtomicBool::new(false) }
    }

    /// Spawns the loop on the first call; later calls return false.
    pub fn ensure_started(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                this.run_cycle().await;
                tokio::time::sleep(this.period).await;
            }
        });
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub async fn run_cycle(&self) -> Option<CandidateList> {
        metrics::counter!("scanx_refresh_cycles_total").increment(1);
        let candidates = match self.job.run(Utc::now()).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "refresh cycle failed, keeping previous stats");
                return None;
            }
        };

        metrics::gauge!("scanx_candidates").set(candidates.len() as f64);
        let book = self.job.cache().load();
        for (rank, symbol) in candidates.symbols().iter().enumerate() {
            if let Some(s) = book.snapshots.get(symbol) {
                debug!(
                    rank = rank + 1,
                    symbol = %symbol,
                    change_5min = %format!("{:.2}", s.percent_change_5min),
                    rvol = %format!("{:.2}", s.rvol),
                    rvol_5min = %format!("{:.2}", s.rvol_5min),
                    volume_5min = s.volume_5min,
                    gap = %format!("{:.2}", s.gap_percent),
                    "candidate"
                );
            }
        }
        info!(count = candidates.len(), top = ?candidates.symbols().first(), "candidates refreshed");

        if let Some(outcome) = self.subscriptions.reconcile(candidates.symbols()) {
            if !outcome.is_empty() {
                debug!(added = outcome.subscribed.len(), removed = outcome.unsubscribed.len(), "subscriptions reconciled");
            }
        }
        Some(candidates)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::market_data::adapters::alpaca_types::ControlMessage;
    use crate::market_data::adapters::{Asset, SymbolSnapshot};
    use crate::market_data::subscriptions::tests::RecordingChannel;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub assets: Vec<Asset>,
        pub daily: AHashMap<String, Vec<Bar>>,
        pub minute: AHashMap<String, Vec<Bar>>,
        pub snapshots: AHashMap<String, SymbolSnapshot>,
        pub failing_daily: Vec<String>,
        pub failing_minute: Vec<String>,
        pub fail_assets: AtomicBool,
        pub fail_snapshots_containing: Option<String>,
        pub minute_delay: Option<Duration>,
        pub daily_calls: AtomicUsize,
        pub snapshot_requests: Mutex<Vec<Vec<String>>>,
        pub minute_requests: Mutex<Vec<String>>,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    fn fake_error(endpoint: &str) -> ProviderError {
        ProviderError::Status { endpoint: endpoint.into(), status: 500, body: "boom".into() }
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for FakeProvider {
        async fn active_assets(&self) -> Result<Vec<Asset>, ProviderError> {
            if self.fail_assets.load(Ordering::SeqCst) {
                return Err(fake_error("assets"));
            }
            Ok(self.assets.clone())
        }

        async fn daily_bars(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>, ProviderError> {
            self.daily_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_daily.iter().any(|s| s == symbol) {
                return Err(fake_error("daily"));
            }
            let bars = self.daily.get(symbol).cloned().unwrap_or_default();
            let skip = bars.len().saturating_sub(lookback);
            Ok(bars[skip..].to_vec())
        }

        async fn minute_bars(
            &self,
            symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Bar>, ProviderError> {
            self.minute_requests.lock().push(symbol.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.minute_delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_minute.iter().any(|s| s == symbol) {
                return Err(fake_error("minute"));
            }
            Ok(self.minute.get(symbol).cloned().unwrap_or_default())
        }

        async fn snapshots(&self, symbols: &[String]) -> Result<Vec<SymbolSnapshot>, ProviderError> {
            self.snapshot_requests.lock().push(symbols.to_vec());
            if let Some(poison) = &self.fail_snapshots_containing {
                if symbols.contains(poison) {
                    return Err(fake_error("snapshots"));
                }
            }
            Ok(symbols.iter().filter_map(|s| self.snapshots.get(s).cloned()).collect())
        }
    }

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_709_562_600, 0).unwrap()
    }

    fn bar(open: f64, close: f64, volume: u64) -> Bar {
        Bar { timestamp: ts(), open, high: open.max(close), low: open.min(close), close, volume }
    }

    // Ten bars; the last five move `change` percent on double volume (rvol5min = 4/3)
    fn session_bars(change: f64) -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..5).map(|_| bar(10.0, 10.0, 100)).collect();
        bars.extend((0..4).map(|_| bar(10.0, 10.0, 200)));
        bars.push(bar(10.0, 10.0 * (1.0 + change / 100.0), 200));
        bars
    }

    fn snapshot(symbol: &str, price: f64, volume: u64, open: f64) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: symbol.into(),
            latest_price: Some(price),
            daily_volume: Some(volume),
            daily_open: Some(open),
        }
    }

    fn asset(symbol: &str) -> Asset {
        Asset { symbol: symbol.into(), tradable: true }
    }

    // Each symbol gets a full snapshot and session bars with the given 5-minute change
    fn provider_with(movers: &[(&str, f64)]) -> FakeProvider {
        let mut p = FakeProvider::default();
        for (symbol, change) in movers {
            p.assets.push(asset(symbol));
            p.daily.insert(symbol.to_string(), vec![bar(5.0, 5.0, 1000)]);
            p.snapshots.insert(symbol.to_string(), snapshot(symbol, 5.5, 2000, 5.0));
            p.minute.insert(symbol.to_string(), session_bars(*change));
        }
        p
    }

    fn build_job(provider: FakeProvider, settings: RefreshSettings) -> (Arc<FakeProvider>, StatsRefreshJob) {
        let provider = Arc::new(provider);
        let job = StatsRefreshJob::new(provider.clone(), Arc::new(StatsCache::new()), settings);
        (provider, job)
    }

    #[test]
    fn test_fewer_than_six_bars_is_all_zero() {
        let bars: Vec<Bar> = (0..5).map(|_| bar(10.0, 11.0, 500)).collect();
        assert_eq!(derive_intraday_metrics(&bars), IntradayMetrics::default());
        assert_eq!(derive_intraday_metrics(&[]), IntradayMetrics::default());
    }

    #[test]
    fn test_intraday_metrics() {
        let bars = vec![
            bar(9.0, 10.0, 100),
            bar(11.0, 11.0, 100),
            bar(11.0, 11.5, 100),
            bar(11.5, 11.8, 100),
            bar(11.8, 12.0, 100),
            bar(12.0, 12.1, 100),
        ];
        let m = derive_intraday_metrics(&bars);
        assert_eq!(m.total_volume, 600);
        assert_eq!(m.volume_5min, 500);
        assert!((m.percent_change_5min - 10.0).abs() < 1e-9);
        // one whole 5-bar window in six bars
        assert!((m.rvol_5min - 500.0 / 600.0).abs() < 1e-9);
        assert!((m.gap_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_premarket_start_is_eight_utc_same_day() {
        let now = DateTime::parse_from_rfc3339("2024-03-04T15:42:10Z").unwrap().with_timezone(&Utc);
        assert_eq!(premarket_start(now).to_rfc3339(), "2024-03-04T08:00:00+00:00");
    }

    #[tokio::test]
    async fn test_average_volume_feeds_rvol() {
        let mut p = provider_with(&[("ABC", 3.0)]);
        p.daily.insert("ABC".into(), vec![bar(5.0, 5.0, 100), bar(5.0, 5.0, 200)]);
        p.snapshots.insert("ABC".into(), snapshot("ABC", 5.5, 300, 5.0));
        let (_, job) = build_job(p, RefreshSettings::default());

        let candidates = job.run(ts()).await.unwrap();
        assert_eq!(candidates.symbols(), ["ABC".to_string()]);
        assert_eq!(job.average_volume("ABC"), Some(150.0));

        let stats = job.cache().snapshot("ABC").unwrap();
        assert_eq!(stats.rvol, 2.0);
        assert_eq!(stats.volume_5min, 1000);
        assert_eq!(stats.premarket_volume, 1500);
        assert!((stats.percent_change_5min - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_average_volumes_are_cached_across_cycles() {
        let (provider, job) = build_job(provider_with(&[("ABC", 1.0), ("DEF", 2.0)]), RefreshSettings::default());
        job.run(ts()).await.unwrap();
        job.run(ts()).await.unwrap();
        assert_eq!(provider.daily_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_daily_failure_is_retried_and_zeroes_rvol() {
        let mut p = provider_with(&[("ABC", 1.0)]);
        p.failing_daily.push("ABC".into());
        let (provider, job) = build_job(p, RefreshSettings::default());

        job.run(ts()).await.unwrap();
        assert_eq!(job.average_volume("ABC"), None);
        assert_eq!(job.cache().snapshot("ABC").unwrap().rvol, 0.0);

        job.run(ts()).await.unwrap();
        assert_eq!(provider.daily_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_universe_excludes_dotted_and_untradable_and_is_capped() {
        let mut p = provider_with(&[("BRK.B", 1.0), ("ABC", 1.0), ("DEF", 1.0), ("GHI", 1.0)]);
        p.assets[2].tradable = false;
        let settings = RefreshSettings { universe_size: 1, ..Default::default() };
        let (provider, job) = build_job(p, settings);

        job.run(ts()).await.unwrap();
        assert_eq!(*provider.snapshot_requests.lock(), vec![vec!["ABC".to_string()]]);
    }

    #[tokio::test]
    async fn test_snapshots_are_batched_and_failed_batches_skipped() {
        let names: Vec<String> = (0..250).map(|i| format!("S{i:03}")).collect();
        let movers: Vec<(&str, f64)> = names.iter().map(|s| (s.as_str(), 1.0)).collect();
        let mut p = provider_with(&movers);
        p.fail_snapshots_containing = Some("S150".into());
        let settings = RefreshSettings { universe_size: 500, prefilter_len: 500, ..Default::default() };
        let (provider, job) = build_job(p, settings);

        job.run(ts()).await.unwrap();
        let sizes: Vec<usize> = provider.snapshot_requests.lock().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let scored = provider.minute_requests.lock().len();
        assert_eq!(scored, 150);
        assert!(job.cache().snapshot("S150").is_none());
        assert!(job.cache().snapshot("S249").is_some());
    }

    #[tokio::test]
    async fn test_incomplete_snapshots_are_excluded() {
        let mut p = provider_with(&[("ABC", 1.0), ("NOP", 1.0), ("NOV", 1.0), ("ZRO", 1.0)]);
        p.snapshots.get_mut("NOP").unwrap().daily_open = None;
        p.snapshots.get_mut("NOV").unwrap().daily_volume = None;
        p.snapshots.get_mut("ZRO").unwrap().latest_price = Some(0.0);
        let (provider, job) = build_job(p, RefreshSettings::default());

        job.run(ts()).await.unwrap();
        assert_eq!(*provider.minute_requests.lock(), vec!["ABC".to_string()]);
    }

    #[tokio::test]
    async fn test_prefilter_keeps_biggest_day_movers() {
        let names: Vec<String> = (0..70).map(|i| format!("S{i:02}")).collect();
        let movers: Vec<(&str, f64)> = names.iter().map(|s| (s.as_str(), 1.0)).collect();
        let mut p = provider_with(&movers);
        // S00 is up 0%, S69 up 69%
        for (i, name) in names.iter().enumerate() {
            p.snapshots.insert(name.clone(), snapshot(name, 10.0 + i as f64 / 10.0, 2000, 10.0));
        }
        let (provider, job) = build_job(p, RefreshSettings::default());

        job.run(ts()).await.unwrap();
        let mut scored = provider.minute_requests.lock().clone();
        scored.sort();
        assert_eq!(scored, names[10..].to_vec());
    }

    #[tokio::test]
    async fn test_outbound_queries_capped_at_five() {
        let names: Vec<String> = (0..20).map(|i| format!("S{i:02}")).collect();
        let movers: Vec<(&str, f64)> = names.iter().map(|s| (s.as_str(), 1.0)).collect();
        let mut p = provider_with(&movers);
        p.minute_delay = Some(Duration::from_millis(10));
        let (provider, job) = build_job(p, RefreshSettings::default());

        job.run(ts()).await.unwrap();
        assert_eq!(provider.minute_requests.lock().len(), 20);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_minute_failure_drops_symbol_only() {
        let mut p = provider_with(&[("ABC", 2.0), ("XYZ", 5.0)]);
        p.failing_minute.push("XYZ".into());
        let (_, job) = build_job(p, RefreshSettings::default());

        let candidates = job.run(ts()).await.unwrap();
        assert_eq!(candidates.symbols(), ["ABC".to_string()]);
    }

    #[tokio::test]
    async fn test_low_rvol_5min_is_filtered() {
        let mut p = provider_with(&[("ABC", 2.0), ("FLAT", 5.0)]);
        p.minute.insert("FLAT".into(), (0..10).map(|_| bar(10.0, 10.5, 100)).collect());
        let (_, job) = build_job(p, RefreshSettings::default());

        let candidates = job.run(ts()).await.unwrap();
        // FLAT: 500 / (1000 / 2) = 1.0, still qualifies
        assert_eq!(candidates.symbols(), ["FLAT".to_string(), "ABC".to_string()]);

        let mut p = provider_with(&[("ABC", 2.0), ("THIN", 5.0)]);
        let mut thin: Vec<Bar> = (0..5).map(|_| bar(10.0, 10.0, 300)).collect();
        thin.extend((0..5).map(|_| bar(10.0, 10.1, 100)));
        p.minute.insert("THIN".into(), thin);
        let (_, job) = build_job(p, RefreshSettings::default());
        let candidates = job.run(ts()).await.unwrap();
        assert_eq!(candidates.symbols(), ["ABC".to_string()]);
    }

    #[tokio::test]
    async fn test_candidates_ranked_and_capped() {
        let names: Vec<String> = (0..30).map(|i| format!("S{i:02}")).collect();
        let movers: Vec<(&str, f64)> = names.iter().enumerate().map(|(i, s)| (s.as_str(), i as f64)).collect();
        let (_, job) = build_job(provider_with(&movers), RefreshSettings::default());

        let candidates = job.run(ts()).await.unwrap();
        assert_eq!(candidates.len(), CandidateList::MAX_LEN);
        assert_eq!(candidates.symbols()[0], "S29");
        assert_eq!(candidates.symbols()[24], "S05");
        // Survivors beyond the top 25 still get stats
        assert!(job.cache().snapshot("S00").is_some());
    }

    #[tokio::test]
    async fn test_failed_listing_keeps_previous_cache() {
        let (provider, job) = build_job(provider_with(&[("ABC", 2.0)]), RefreshSettings::default());
        job.run(ts()).await.unwrap();

        provider.fail_assets.store(true, Ordering::SeqCst);
        assert!(job.run(ts()).await.is_err());
        assert!(job.cache().snapshot("ABC").is_some());
        assert_eq!(job.cache().candidates().symbols(), ["ABC".to_string()]);
    }

    #[tokio::test]
    async fn test_cycle_reconciles_subscriptions() {
        let (_, job) = build_job(provider_with(&[("ABC", 2.0), ("DEF", 3.0)]), RefreshSettings::default());
        let channel = RecordingChannel::open();
        let subscriptions = Arc::new(SubscriptionManager::new(channel.clone()));
        let refresh = RefreshLoop::new(Arc::new(job), subscriptions.clone(), Duration::from_secs(60));

        let candidates = refresh.run_cycle().await.unwrap();
        assert_eq!(candidates.symbols(), ["DEF".to_string(), "ABC".to_string()]);
        assert_eq!(
            channel.take(),
            vec![ControlMessage::Subscribe { trades: vec!["ABC".into(), "DEF".into()] }]
        );
    }

    #[tokio::test]
    async fn test_loop_starts_once() {
        let (_, job) = build_job(FakeProvider::default(), RefreshSettings::default());
        let subscriptions = Arc::new(SubscriptionManager::new(RecordingChannel::open()));
        let refresh = Arc::new(RefreshLoop::new(Arc::new(job), subscriptions, Duration::from_secs(3600)));

        assert!(!refresh.is_started());
        assert!(refresh.ensure_started());
        assert!(!refresh.ensure_started());
        assert!(refresh.is_started());
    }
}
