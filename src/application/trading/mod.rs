// Per-symbol decision loop
pub mod executor;
pub mod stats;
pub mod symbol_state;

pub use executor::{ExecutorConfig, TradingExecutor};
pub use stats::ExecutionStats;
pub use symbol_state::SymbolState;
