//! Bybit V5 linear-perpetuals client: signed REST access and tick streaming.
pub mod client;
pub mod websocket;

pub use client::BybitClient;
