//! mq-verify library crate exposing modules for reuse and testing.

pub mod logging;
pub mod metrics;
pub mod output;
pub mod payload;
pub mod rate;
pub mod roles;
pub mod time_sync;
pub mod transport;
pub mod wire;

// Optional re-exports for convenience in downstream code/tests
pub use metrics::counters::{Counter, SequenceErrorCounters};
pub use metrics::registry::TrackerRegistry;
pub use metrics::stats::Stats;
pub use metrics::tracker::{ReceivedMessageSequenceTracker, MAX_TRACK_OUT_OF_ORDER};
pub use transport::{ConnectOptions, Engine, Transport, TransportBuilder, TransportError};
