use crate::domain::errors::{OrderError, PredictionError};
use crate::domain::market::{Candle, OrderBookSnapshot};
use crate::domain::prediction::RawPrediction;
use crate::domain::trading::{BalanceMap, OrderAck, OrderRequest, PositionInfo, Tick, TradeRecord};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc::Receiver;

/// Capability interface for one exchange. Implementations own their REST
/// signing, rate limiting and retry policy; callers see normalized symbols
/// and typed errors only.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange_id(&self) -> &str;

    /// Taker/maker round-trip fee fraction used for sizing and arbitrage math.
    fn round_trip_fee_pct(&self) -> Decimal;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, OrderError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), OrderError>;

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<OrderBookSnapshot, OrderError>;

    async fn fetch_balance(&self) -> Result<BalanceMap, OrderError>;

    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>, OrderError>;

    /// Live trade prints for the given symbols. The stream ends on terminal
    /// disconnect; the router's watchdog resubscribes with backoff.
    async fn stream_ticks(&self, symbols: &[String]) -> Result<Receiver<Tick>, OrderError>;
}

/// Historical/recent market data consumed by the prediction gateway and the
/// risk manager's ATR proxy. Backed elsewhere; the core only reads.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn recent_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>>;

    async fn current_price(&self, symbol: &str) -> Result<Decimal>;
}

/// The external ML model. Stateless from the core's point of view.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(
        &self,
        symbol: &str,
        candles: &[Candle],
        volatility: f64,
    ) -> Result<RawPrediction, PredictionError>;
}

/// Opaque append-only sink for closed trades. The core never reads it back.
#[async_trait]
pub trait TradeRecordSink: Send + Sync {
    async fn append(&self, record: &TradeRecord) -> Result<()>;
}

/// No-op sink for paper runs and tests.
pub struct NullTradeRecordSink;

#[async_trait]
impl TradeRecordSink for NullTradeRecordSink {
    async fn append(&self, _record: &TradeRecord) -> Result<()> {
        Ok(())
    }
}
