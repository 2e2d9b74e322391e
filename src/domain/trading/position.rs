use crate::domain::trading::types::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    OppositeSignal,
    Timeout,
    LowConfidence,
    Manual,
    Emergency,
    ArbitrageLegFailed,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::OppositeSignal => "opposite_signal",
            ExitReason::Timeout => "timeout",
            ExitReason::LowConfidence => "low_confidence",
            ExitReason::Manual => "manual",
            ExitReason::Emergency => "emergency",
            ExitReason::ArbitrageLegFailed => "arbitrage_leg_failed",
        };
        write!(f, "{}", s)
    }
}

/// Which subsystem opened a position. Arbitrage legs are tracked separately
/// so the one-position-per-symbol rule applies only to the directional book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionOrigin {
    Directional,
    ArbitrageLeg,
}

/// An open leveraged futures trade.
///
/// Invariants: `size > 0`, `leverage` in `[1, 30]`,
/// `margin_used = size * entry_price / leverage`. PnL fields are derived and
/// recomputed on every price update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub exchange_id: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub leverage: u32,
    pub margin_used: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub origin: PositionOrigin,
    /// Rediscovered positions hold SL/TP checks until the first live tick.
    pub protections_suspended: bool,
    pub entry_fee: Decimal,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: impl Into<String>,
        exchange_id: impl Into<String>,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
        leverage: u32,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        entry_fee: Decimal,
    ) -> Self {
        let margin_used = if leverage > 0 {
            size * entry_price / Decimal::from(leverage)
        } else {
            size * entry_price
        };
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            exchange_id: exchange_id.into(),
            side,
            size,
            entry_price,
            current_price: entry_price,
            leverage,
            margin_used,
            entry_time: Utc::now(),
            stop_loss,
            take_profit,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            origin: PositionOrigin::Directional,
            protections_suspended: false,
            entry_fee,
        }
    }

    /// Update the mark price and recompute derived PnL. Lifts the
    /// protection suspension placed on rediscovered positions.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = (price - self.entry_price) * self.size * self.side.sign();
        self.unrealized_pnl_pct = if self.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (price - self.entry_price) / self.entry_price * self.side.sign()
        };
        self.protections_suspended = false;
    }

    /// True when the mark price has crossed the stop under this side's rule.
    pub fn stop_loss_breached(&self, price: Decimal) -> bool {
        if self.protections_suspended {
            return false;
        }
        match (self.side, self.stop_loss) {
            (Side::Long, Some(sl)) => price <= sl,
            (Side::Short, Some(sl)) => price >= sl,
            (_, None) => false,
        }
    }

    /// True when the mark price has crossed the target under this side's rule.
    pub fn take_profit_breached(&self, price: Decimal) -> bool {
        if self.protections_suspended {
            return false;
        }
        match (self.side, self.take_profit) {
            (Side::Long, Some(tp)) => price >= tp,
            (Side::Short, Some(tp)) => price <= tp,
            (_, None) => false,
        }
    }

    /// Consume the position into an immutable closed-trade record.
    pub fn into_record(
        self,
        exit_price: Decimal,
        exit_reason: ExitReason,
        exit_fee: Decimal,
    ) -> TradeRecord {
        let gross = (exit_price - self.entry_price) * self.size * self.side.sign();
        let fees = self.entry_fee + exit_fee;
        let realized_pnl = gross - fees;
        let realized_pnl_pct = if self.entry_price.is_zero() || self.size.is_zero() {
            Decimal::ZERO
        } else {
            realized_pnl / (self.entry_price * self.size)
        };
        TradeRecord {
            position_id: self.id,
            symbol: self.symbol,
            exchange_id: self.exchange_id,
            side: self.side,
            size: self.size,
            entry_price: self.entry_price,
            exit_price,
            leverage: self.leverage,
            entry_time: self.entry_time,
            exit_time: Utc::now(),
            realized_pnl,
            realized_pnl_pct,
            fees,
            exit_reason,
            origin: self.origin,
        }
    }

    /// Split off the closed fraction after a partial close, leaving the
    /// residual in place. The residual keeps the original id and SL/TP.
    pub fn reduce(&mut self, closed_quantity: Decimal) {
        self.size -= closed_quantity;
        self.margin_used = if self.leverage > 0 {
            self.size * self.entry_price / Decimal::from(self.leverage)
        } else {
            self.size * self.entry_price
        };
        // Recompute derived PnL for the residual size.
        let price = self.current_price;
        self.update_price(price);
    }
}

/// Immutable record of a fully closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: Uuid,
    pub symbol: String,
    pub exchange_id: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub leverage: u32,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub realized_pnl: Decimal,
    pub realized_pnl_pct: Decimal,
    pub fees: Decimal,
    pub exit_reason: ExitReason,
    pub origin: PositionOrigin,
}

impl TradeRecord {
    pub fn duration_hours(&self) -> f64 {
        (self.exit_time - self.entry_time).num_seconds() as f64 / 3600.0
    }

    /// Whether the realized direction matched the entry signal.
    pub fn was_profitable(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_btc() -> Position {
        Position::open(
            "BTC/USDT",
            "bitget",
            Side::Long,
            dec!(0.04),
            dec!(50000),
            10,
            Some(dec!(49500)),
            Some(dec!(51000)),
            Decimal::ZERO,
        )
    }

    #[test]
    fn test_margin_invariant() {
        let p = long_btc();
        assert_eq!(p.margin_used, dec!(0.04) * dec!(50000) / dec!(10));
    }

    #[test]
    fn test_pnl_recomputed_on_update() {
        let mut p = long_btc();
        p.update_price(dec!(51000));
        assert_eq!(p.unrealized_pnl, dec!(40)); // (51000-50000)*0.04
        assert_eq!(p.unrealized_pnl_pct, dec!(0.02));

        let mut short = p.clone();
        short.side = Side::Short;
        short.update_price(dec!(51000));
        assert_eq!(short.unrealized_pnl, dec!(-40));
    }

    #[test]
    fn test_stop_loss_side_rules() {
        let p = long_btc();
        assert!(p.stop_loss_breached(dec!(49400)));
        assert!(p.stop_loss_breached(dec!(49500)));
        assert!(!p.stop_loss_breached(dec!(49600)));

        let mut short = long_btc();
        short.side = Side::Short;
        short.stop_loss = Some(dec!(50500));
        assert!(short.stop_loss_breached(dec!(50600)));
        assert!(!short.stop_loss_breached(dec!(50400)));
    }

    #[test]
    fn test_take_profit_side_rules() {
        let p = long_btc();
        assert!(p.take_profit_breached(dec!(51000)));
        assert!(!p.take_profit_breached(dec!(50900)));
    }

    #[test]
    fn test_protections_suspended_until_first_tick() {
        let mut p = long_btc();
        p.protections_suspended = true;
        assert!(!p.stop_loss_breached(dec!(40000)));
        assert!(!p.take_profit_breached(dec!(60000)));

        p.update_price(dec!(49000));
        assert!(p.stop_loss_breached(dec!(49000)));
    }

    #[test]
    fn test_record_pnl_consistency() {
        let p = long_btc();
        let record = p.into_record(dec!(51000), ExitReason::TakeProfit, dec!(0.5));
        // (exit - entry) * size * sign - fees
        assert_eq!(record.realized_pnl, dec!(40) - dec!(0.5));
        assert_eq!(record.exit_reason, ExitReason::TakeProfit);
        assert!(record.was_profitable());
    }

    #[test]
    fn test_partial_close_residual() {
        let mut p = long_btc();
        p.update_price(dec!(50500));
        p.reduce(dec!(0.024)); // close 60% of 0.04
        assert_eq!(p.size, dec!(0.016));
        assert_eq!(p.stop_loss, Some(dec!(49500)));
        assert_eq!(p.margin_used, dec!(0.016) * dec!(50000) / dec!(10));
        // PnL reflects the residual size only
        assert_eq!(p.unrealized_pnl, dec!(500) * dec!(0.016));
    }
}
