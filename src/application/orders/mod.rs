// Trade lifecycle: open, track, close, record
pub mod order_manager;

pub use order_manager::{CloseOutcome, OrderManager};
