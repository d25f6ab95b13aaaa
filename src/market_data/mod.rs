// Market data module entrypoint
pub mod adapters;       // provider trait + Alpaca REST/stream wire types
pub mod feed;           // upstream trade stream: session state machine + socket driver
pub mod subscriptions;  // diff-based subscribe/unsubscribe
pub mod stats_refresh;  // periodic ranking job and its loop
