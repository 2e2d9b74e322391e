use crate::domain::prediction::Prediction;
use crate::domain::risk::RiskDecision;
use crate::domain::trading::{Position, TradeRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reconciliation anomalies flagged by the sync manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnomalyEvent {
    ExcessiveErrors {
        exchange_id: String,
        error_count: u32,
    },
    ProlongedDesync {
        exchange_id: String,
        desynced_for_s: u64,
    },
    BalanceDrift {
        exchange_id: String,
        drift: Decimal,
        threshold: Decimal,
    },
    PriceDrift {
        symbol: String,
        drift_pct: f64,
    },
}

/// A detected cross-exchange dislocation.
///
/// Invariant: `sell_price > buy_price * (1 + total fees)` at emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub spread_pct: Decimal,
    pub estimated_profit: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// Point-in-time engine telemetry, pushed on the outbound channel and
/// answered to `RequestMetrics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cycles_executed: u64,
    pub predictions_processed: u64,
    pub trades_executed: u64,
    pub trades_skipped: u64,
    pub average_confidence: f64,
    pub average_cycle_ms: f64,
    pub open_positions: usize,
    pub daily_trades: u64,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub win_rate: f64,
    pub arbitrage_opportunities: u64,
    pub timestamp: i64,
}

/// Everything the engine tells the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradingEvent {
    PositionOpened(Position),
    PositionClosed(TradeRecord),
    OrderFailed {
        symbol: String,
        exchange_id: String,
        reason: String,
    },
    Prediction(Prediction),
    RiskDecision {
        symbol: String,
        decision: RiskDecision,
    },
    ArbitrageOpportunity(ArbitrageOpportunity),
    ArbitrageExecuted {
        opportunity: ArbitrageOpportunity,
        executed_size: Decimal,
        realized_profit: Decimal,
    },
    Anomaly(AnomalyEvent),
    CircuitBreaker {
        reason: String,
    },
    Metrics(MetricsSnapshot),
}

/// Listener interface for the event bus. Implementations must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &TradingEvent);
}

/// Listener that mirrors events into the tracing log.
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &TradingEvent) {
        match event {
            TradingEvent::PositionOpened(p) => {
                tracing::info!(
                    "Event: position opened {} {} {} @ {}",
                    p.symbol,
                    p.side,
                    p.size,
                    p.entry_price
                );
            }
            TradingEvent::PositionClosed(r) => {
                tracing::info!(
                    "Event: position closed {} ({}) pnl {}",
                    r.symbol,
                    r.exit_reason,
                    r.realized_pnl
                );
            }
            TradingEvent::CircuitBreaker { reason } => {
                tracing::error!("Event: CIRCUIT BREAKER - {}", reason);
            }
            TradingEvent::Anomaly(a) => {
                tracing::warn!("Event: anomaly {:?}", a);
            }
            other => {
                tracing::debug!("Event: {:?}", other);
            }
        }
    }
}
