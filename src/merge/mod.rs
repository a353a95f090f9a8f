//! Merging: across sources by precedence, then into the local copy

pub mod geocode;
pub mod local;

pub use geocode::{GeocodeMerger, Precedence, SourceMerge};
pub use local::{merge_with_local, MergeMode};
