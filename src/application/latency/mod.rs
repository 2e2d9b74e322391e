// Latency measurement and hot-path order book caching
pub mod benchmark;
pub mod ewma;
pub mod optimizer;

pub use benchmark::LatencyReport;
pub use ewma::{Endpoint, LatencyTable};
pub use optimizer::LatencyOptimizer;
