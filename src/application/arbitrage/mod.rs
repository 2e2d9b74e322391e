// Cross-exchange price-dislocation scanner and executor
pub mod detector;

pub use detector::{ArbitrageConfig, ArbitrageDetector};
