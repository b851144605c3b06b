//! Windowed statistics and the live snapshot payload

pub mod percentile;
pub mod snapshot;
pub mod window;

pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotConfig};
pub use window::{Freshness, LatencyField, WindowAggregator, WindowSet, WindowStats};
