use std::env;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::engine::filter::ScreenCriteria;
use crate::error::{ScreenerError, ScreenerResult};

pub const DEFAULT_FEED_URL: &str = "wss://stream.data.alpaca.markets/v2/iex";
pub const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";
pub const DEFAULT_TRADING_URL: &str = "https://paper-api.alpaca.markets";

// Well-known variables read as-is, on top of the SCANX_* layer
const PLAIN_ENV: [(&str, &str); 5] = [
    ("api_key", "APCA_API_KEY_ID"),
    ("api_secret", "APCA_API_SECRET_KEY"),
    ("port", "PORT"),
    ("allowed_origin", "ALLOWED_ORIGIN"),
    ("feed_url", "FEED_URL"),
];

#[derive(Clone, Deserialize)]
pub struct ScreenerConfig {
    pub feed_url: String,
    pub data_url: String,
    pub trading_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub port: u16,
    pub allowed_origin: String,
    pub metrics_port: u16,
    pub refresh_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub universe_size: usize,
    pub max_in_flight: usize,
    pub min_price: f64,
    pub max_price: f64,
    pub min_change_5min: f64,
    pub publish_capacity: usize,
}

impl std::fmt::Debug for ScreenerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenerConfig")
            .field("feed_url", &self.feed_url)
            .field("data_url", &self.data_url)
            .field("trading_url", &self.trading_url)
            .field("api_key", &"<redacted>")
            .field("port", &self.port)
            .field("allowed_origin", &self.allowed_origin)
            .field("refresh_interval_secs", &self.refresh_interval_secs)
            .field("universe_size", &self.universe_size)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

impl ScreenerConfig {
    /// Defaults, then the optional file, then `SCANX_*`, then the plain variables.
    pub fn load(path: Option<&Path>) -> ScreenerResult<Self> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("SCANX").try_parsing(true));
        for (key, var) in PLAIN_ENV {
            builder = builder.set_override_option(key, env::var(var).ok())?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) fn defaults() -> ScreenerResult<ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            .set_default("feed_url", DEFAULT_FEED_URL)?
            .set_default("data_url", DEFAULT_DATA_URL)?
            .set_default("trading_url", DEFAULT_TRADING_URL)?
            .set_default("api_key", "")?
            .set_default("api_secret", "")?
            .set_default("port", 4000)?
            .set_default("allowed_origin", "http://localhost:5173")?
            .set_default("metrics_port", 9000)?
            .set_default("refresh_interval_secs", 60)?
            .set_default("reconnect_delay_secs", 3)?
            .set_default("universe_size", 100)?
            .set_default("max_in_flight", 5)?
            .set_default("min_price", 1.0)?
            .set_default("max_price", 20.0)?
            .set_default("min_change_5min", 0.1)?
            .set_default("publish_capacity", 1024)?;
        Ok(builder)
    }

    pub fn validate(&self) -> ScreenerResult<()> {
        if self.api_key.trim().is_empty() || self.api_secret.trim().is_empty() {
            return Err(ScreenerError::InvalidConfig(
                "APCA_API_KEY_ID and APCA_API_SECRET_KEY must be set".into(),
            ));
        }
        if self.min_price >= self.max_price {
            return Err(ScreenerError::InvalidConfig(format!(
                "min_price {} must be below max_price {}",
                self.min_price, self.max_price
            )));
        }
        if self.max_in_flight == 0 || self.universe_size == 0 {
            return Err(ScreenerError::InvalidConfig(
                "max_in_flight and universe_size must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn criteria(&self) -> ScreenCriteria {
        ScreenCriteria {
            min_price: self.min_price,
            max_price: self.max_price,
            min_change_5min: self.min_change_5min,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}
