/*
[INPUT]:  Public API exports for bitfinex-feed-monitor crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod metrics;
pub mod monitor;

// Re-export main types for convenience
pub use config::{FeedConfig, MonitorConfig};
pub use metrics::{FeedStats, FeedStatsSnapshot};
pub use monitor::{BackfillSummary, FeedMonitor};
