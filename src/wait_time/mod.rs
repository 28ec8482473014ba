//! Wait time statistics for queue status estimates
//!
//! Samples are recorded when a proposal succeeds and read back when the
//! periodic queue status broadcast builds its estimates.

pub mod statistics;

// Re-export commonly used types
pub use statistics::{StatsKey, WaitRole, WaitTimeStats, WaitTimeTracker};
