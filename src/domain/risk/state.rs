use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Daily risk accounting shared between the risk manager, the order manager
/// and the executor. Counters reset exactly once at UTC midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    /// Balance at the start of the current UTC day, basis for the hard stop.
    pub day_start_balance: Decimal,
    pub daily_realized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    /// Per-symbol entry counts for the current UTC day.
    pub daily_trade_counts: HashMap<String, u64>,
    pub wins: u64,
    pub losses: u64,
    pub reference_date: NaiveDate,
}

impl Default for RiskState {
    fn default() -> Self {
        Self {
            day_start_balance: Decimal::ZERO,
            daily_realized_pnl: Decimal::ZERO,
            total_realized_pnl: Decimal::ZERO,
            daily_trade_counts: HashMap::new(),
            wins: 0,
            losses: 0,
            reference_date: chrono::Utc::now().date_naive(),
        }
    }
}

impl RiskState {
    /// Reset daily counters when the UTC day has rolled over. Returns true
    /// when a reset happened.
    pub fn check_daily_reset(&mut self, today: NaiveDate, current_balance: Decimal) -> bool {
        if today == self.reference_date {
            return false;
        }
        self.reference_date = today;
        self.daily_realized_pnl = Decimal::ZERO;
        self.daily_trade_counts.clear();
        self.day_start_balance = current_balance;
        true
    }

    pub fn record_entry(&mut self, symbol: &str) {
        *self.daily_trade_counts.entry(symbol.to_string()).or_insert(0) += 1;
    }

    pub fn record_close(&mut self, realized_pnl: Decimal) {
        self.daily_realized_pnl += realized_pnl;
        self.total_realized_pnl += realized_pnl;
        if realized_pnl > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
    }

    pub fn daily_trades_for(&self, symbol: &str) -> u64 {
        self.daily_trade_counts.get(symbol).copied().unwrap_or(0)
    }

    pub fn daily_trades_total(&self) -> u64 {
        self.daily_trade_counts.values().sum()
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.wins + self.losses;
        if total == 0 {
            return 0.0;
        }
        self.wins as f64 / total as f64
    }

    /// Loss-only daily PnL check: profitable days never count against the
    /// limit.
    pub fn daily_loss(&self, unrealized: Decimal) -> Decimal {
        let pnl = self.daily_realized_pnl + unrealized;
        if pnl < Decimal::ZERO { -pnl } else { Decimal::ZERO }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_daily_reset_happens_once() {
        let mut state = RiskState::default();
        state.record_entry("BTC/USDT");
        state.record_close(dec!(-50));

        let tomorrow = state.reference_date.succ_opt().unwrap();
        assert!(state.check_daily_reset(tomorrow, dec!(10000)));
        assert_eq!(state.daily_trades_total(), 0);
        assert_eq!(state.daily_realized_pnl, Decimal::ZERO);
        assert_eq!(state.day_start_balance, dec!(10000));

        // Same day again: no reset
        assert!(!state.check_daily_reset(tomorrow, dec!(9000)));
        assert_eq!(state.day_start_balance, dec!(10000));
    }

    #[test]
    fn test_counts_are_monotonic_within_day() {
        let mut state = RiskState::default();
        state.record_entry("BTC/USDT");
        state.record_entry("BTC/USDT");
        state.record_entry("ETH/USDT");
        assert_eq!(state.daily_trades_for("BTC/USDT"), 2);
        assert_eq!(state.daily_trades_total(), 3);
    }

    #[test]
    fn test_daily_loss_is_loss_only() {
        let mut state = RiskState::default();
        state.record_close(dec!(200));
        assert_eq!(state.daily_loss(Decimal::ZERO), Decimal::ZERO);

        state.record_close(dec!(-500));
        assert_eq!(state.daily_loss(Decimal::ZERO), dec!(300));
        assert_eq!(state.daily_loss(dec!(-100)), dec!(400));
        assert_eq!(state.daily_loss(dec!(400)), Decimal::ZERO);
    }

    #[test]
    fn test_win_rate() {
        let mut state = RiskState::default();
        assert_eq!(state.win_rate(), 0.0);
        state.record_close(dec!(10));
        state.record_close(dec!(-5));
        state.record_close(dec!(20));
        assert!((state.win_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
