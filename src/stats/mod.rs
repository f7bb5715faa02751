//! Windowed statistics collection and periodic snapshots

mod aggregator;
mod snapshot;
mod window;

pub use aggregator::StatsAggregator;
pub use snapshot::MetricsSnapshot;
pub use window::{mean, percentile, Sample, SlidingWindow};
