//! Binance USD-M futures client: signed REST access and tick streaming.
pub mod client;
pub mod websocket;

pub use client::BinanceFuturesClient;
