//! The context pipeline: token estimation, event↔message projection,
//! trimming, sliding-window compaction, and the per-request ambient scope.

pub mod adapter;
pub mod compact;
pub mod estimator;
pub mod scope;
pub mod trim;

pub use compact::{CompactionConfig, Compactor};
pub use scope::{ModelOverride, RequestScope};
