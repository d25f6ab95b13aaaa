pub mod config;
pub mod engine;
pub mod error;
pub mod market_data;
pub mod publish;
pub mod screener;
pub mod telemetry;
