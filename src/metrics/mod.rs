//! Metrics: latency/throughput stats plus delivery-verification counters and
//! the per-topic sequence trackers that feed them.

pub mod counters;
pub mod registry;
pub mod stats;
pub mod tracker;
