// Multi-exchange routing facade
pub mod health;
pub mod router;

pub use health::ConnectionHealth;
pub use router::{BestQuote, ExchangeHandle, ExchangeRouter};
