//! Usage statistics for cpascope
//!
//! This crate provides the shared usage cache (staleness gating, request
//! deduplication, per-backend invalidation) and the extraction of per-credential
//! statistics from the backend's usage payload.

mod cache;
mod extract;

pub use cache::{DEFAULT_STALE_TIME, LoadOptions, UsageError, UsageStatsCache};
pub use extract::{build_snapshot, collect_usage_details};

// Re-export types used in our public API
pub use cpascope_types::{KeyStats, SuccessFailure, UsageRecord, UsageSnapshot};
