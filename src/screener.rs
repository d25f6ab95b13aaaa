// Wires the tick path, the refresh loop and the publish server together
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::info;

use crate::config::ScreenerConfig;
use crate::engine::filter::TradeFilter;
use crate::engine::stats_cache::StatsCache;
use crate::error::ScreenerResult;
use crate::market_data::adapters::alpaca::AlpacaClient;
use crate::market_data::adapters::MarketDataProvider;
use crate::market_data::feed::{FeedHandle, FeedSettings, UpstreamFeedClient};
use crate::market_data::stats_refresh::{RefreshLoop, RefreshSettings, StatsRefreshJob};
use crate::market_data::subscriptions::SubscriptionManager;
use crate::publish::server::{self, AppState};
use crate::publish::Publisher;

pub struct ScreenerEngine {
    config: ScreenerConfig,
    state: AppState,
    feed: UpstreamFeedClient,
}

impl ScreenerEngine {
    pub fn new(config: ScreenerConfig) -> ScreenerResult<Self> {
        let provider = AlpacaClient::new(&config.data_url, &config.trading_url, &config.api_key, &config.api_secret)?;
        Self::with_provider(config, Arc::new(provider))
    }

    pub fn with_provider(config: ScreenerConfig, provider: Arc<dyn MarketDataProvider>) -> ScreenerResult<Self> {
        let publisher = Publisher::new(config.publish_capacity);
        let stats = Arc::new(StatsCache::new());
        let filter = Arc::new(Mutex::new(TradeFilter::new(config.criteria(), stats.clone(), publisher.clone())));

        let feed_handle = Arc::new(FeedHandle::new());
        let subscriptions = Arc::new(SubscriptionManager::new(feed_handle.clone()));

        let settings = RefreshSettings {
            universe_size: config.universe_size,
            max_in_flight: config.max_in_flight,
            ..RefreshSettings::default()
        };
        let job = Arc::new(StatsRefreshJob::new(provider, stats.clone(), settings));
        let refresh = Arc::new(RefreshLoop::new(job, subscriptions.clone(), config.refresh_interval()));

        let feed = UpstreamFeedClient::new(
            FeedSettings {
                url: config.feed_url.clone(),
                key: config.api_key.clone(),
                secret: config.api_secret.clone(),
                reconnect_delay: config.reconnect_delay(),
            },
            feed_handle.clone(),
            filter.clone(),
            subscriptions.clone(),
            refresh,
        );

        let state = AppState {
            publisher,
            stats,
            filter,
            feed: feed_handle,
            subscriptions,
            started_at: Utc::now(),
        };
        Ok(Self { config, state, feed })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Runs until Ctrl-C. Only a bad origin or a failed bind returns an error.
    pub async fn run(self) -> ScreenerResult<()> {
        let router = server::create_router(self.state.clone(), &self.config.allowed_origin)?;
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        info!(config = ?self.config, "starting screener");

        let feed = tokio::spawn(self.feed.run());
        let result = tokio::select! {
            res = server::serve(addr, router) => res,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                Ok(())
            }
        };
        feed.abort();
        result
    }
}
