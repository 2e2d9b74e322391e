//! Push-based observability: a prometheus registry mirrored from engine
//! state by the supervisor's metrics emitter.
pub mod metrics;

pub use metrics::EngineMetrics;
