// Market data domain
pub mod order_book;
pub mod regime;
pub mod types;

pub use order_book::{BookLevel, OrderBookSnapshot};
pub use regime::MarketRegime;
pub use types::Candle;
