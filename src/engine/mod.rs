// Tick-path core: per-symbol trackers, cached stats and the screening stage
pub mod types;
pub mod price_history;  // rolling 5-minute price window
pub mod high_of_day;    // running session high
pub mod halt;           // halt/resume inference from trade gaps
pub mod stats_cache;    // latest refresh output, swapped wholesale
pub mod filter;         // screen + enrich + publish
