use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an entry was rejected. Risk-gate reasons come from the risk manager;
/// the rest come from the executor's own precondition checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    InsufficientBalance,
    DailyLossLimit,
    MaxPositions,
    InsufficientMargin,
    CircuitBreaker,
    ExchangePaused,
    Cooldown,
    DailyTradeLimit,
    LowConfidence,
    HoldSignal,
    HighVolatility,
    SymbolNotPermitted,
    EngineStopped,
    SymbolDegraded,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionReason::InsufficientBalance => "insufficient_balance",
            RejectionReason::DailyLossLimit => "daily_loss_limit",
            RejectionReason::MaxPositions => "max_positions",
            RejectionReason::InsufficientMargin => "insufficient_margin",
            RejectionReason::CircuitBreaker => "circuit_breaker",
            RejectionReason::ExchangePaused => "exchange_paused",
            RejectionReason::Cooldown => "cooldown",
            RejectionReason::DailyTradeLimit => "daily_trade_limit",
            RejectionReason::LowConfidence => "low_confidence",
            RejectionReason::HoldSignal => "hold_signal",
            RejectionReason::HighVolatility => "high_volatility",
            RejectionReason::SymbolNotPermitted => "symbol_not_permitted",
            RejectionReason::EngineStopped => "engine_stopped",
            RejectionReason::SymbolDegraded => "symbol_degraded",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a risk evaluation for one proposed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub size: Decimal,
    pub leverage: u32,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub rejection_reason: Option<RejectionReason>,
}

impl RiskDecision {
    pub fn approved(size: Decimal, leverage: u32, stop_loss: Decimal, take_profit: Decimal) -> Self {
        Self {
            approved: true,
            size,
            leverage,
            stop_loss,
            take_profit,
            rejection_reason: None,
        }
    }

    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            approved: false,
            size: Decimal::ZERO,
            leverage: 0,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            rejection_reason: Some(reason),
        }
    }
}
