use thiserror::Error;

/// Failures talking to the market-data REST API.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status { endpoint: String, status: u16, body: String },
    #[error("unexpected payload from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// Failures handing control messages to the upstream connection.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("upstream connection is not open")]
    NotConnected,
}

/// Startup and cycle-level failures.
#[derive(Debug, Error)]
pub enum ScreenerError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("market data provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ScreenerResult<T> = Result<T, ScreenerError>;
