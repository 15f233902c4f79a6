//! Fusion of partial records into one enriched record per entity

pub mod dedup;
pub mod merge_engine;

pub use dedup::{dedup_key, dedup_preserving_order, ListDeduper};
pub use merge_engine::{MergeEngine, MergeInput};
