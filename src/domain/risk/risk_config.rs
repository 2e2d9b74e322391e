use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Error type for risk configuration validation
#[derive(Debug, thiserror::Error)]
pub enum RiskConfigError {
    #[error("Invalid RiskConfig: {0}")]
    ValidationError(String),
}

/// Risk management configuration. Immutable after startup validation.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Minimum free balance (quote) required to open anything.
    pub min_balance_quote: Decimal,
    /// Daily realized+unrealized loss limit in quote currency.
    pub max_daily_loss_quote: Decimal,
    /// Hard-stop circuit breaker as a fraction of day-start balance.
    pub hard_stop_pct: f64,
    pub max_concurrent_positions: usize,
    pub max_daily_trades: u64,
    /// Fraction of free balance risked per trade for a moderate signal.
    pub risk_per_trade: f64,
    /// Reward/risk ratio used to place the take-profit.
    pub rr_ratio: f64,
    pub base_leverage: u32,
    pub max_leverage: u32,
    /// Floor on the stop distance as a fraction of price.
    pub min_stop_distance_pct: f64,
    /// ATR-proxy fallback when the data source has no recent candles.
    pub fallback_atr_pct: f64,
    /// Margin headroom: margin_needed must stay below this fraction of free.
    pub margin_usage_cap: f64,
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_balance_quote < Decimal::ZERO {
            return Err(format!("Invalid min_balance_quote: {}", self.min_balance_quote));
        }
        if self.max_daily_loss_quote <= Decimal::ZERO {
            return Err(format!(
                "Invalid max_daily_loss_quote: {}",
                self.max_daily_loss_quote
            ));
        }
        if self.hard_stop_pct <= 0.0 || self.hard_stop_pct > 0.5 {
            return Err(format!("Invalid hard_stop_pct: {}", self.hard_stop_pct));
        }
        if self.max_concurrent_positions == 0 {
            return Err("max_concurrent_positions must be > 0".to_string());
        }
        if !(0.005..=0.05).contains(&self.risk_per_trade) {
            return Err(format!(
                "Invalid risk_per_trade: {} (must be within [0.005, 0.05])",
                self.risk_per_trade
            ));
        }
        if self.rr_ratio < 1.5 {
            return Err(format!("Invalid rr_ratio: {} (must be >= 1.5)", self.rr_ratio));
        }
        if self.base_leverage == 0 || self.base_leverage > self.max_leverage {
            return Err(format!(
                "Invalid base_leverage: {} (max {})",
                self.base_leverage, self.max_leverage
            ));
        }
        if self.max_leverage == 0 || self.max_leverage > 30 {
            return Err(format!(
                "Invalid max_leverage: {} (must be within [1, 30])",
                self.max_leverage
            ));
        }
        if self.margin_usage_cap <= 0.0 || self.margin_usage_cap > 1.0 {
            return Err(format!("Invalid margin_usage_cap: {}", self.margin_usage_cap));
        }
        Ok(())
    }

    /// Leverage ceiling differs by mode: paper runs permissive, live clamps.
    pub fn for_paper() -> Self {
        Self {
            max_leverage: 30,
            ..Self::default()
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_balance_quote: dec!(100),
            max_daily_loss_quote: dec!(1000),
            hard_stop_pct: 0.05,
            max_concurrent_positions: 3,
            max_daily_trades: 20,
            risk_per_trade: 0.02,
            rr_ratio: 2.0,
            base_leverage: 10,
            max_leverage: 10,
            min_stop_distance_pct: 0.005,
            fallback_atr_pct: 0.01,
            margin_usage_cap: 0.9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RiskConfig::default().validate().is_ok());
        assert!(RiskConfig::for_paper().validate().is_ok());
    }

    #[test]
    fn test_leverage_bounds() {
        let mut config = RiskConfig::default();
        config.max_leverage = 30;
        config.base_leverage = 30;
        assert!(config.validate().is_ok());

        config.max_leverage = 31;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_risk_per_trade_bounds() {
        let mut config = RiskConfig::default();
        config.risk_per_trade = 0.06;
        assert!(config.validate().is_err());
        config.risk_per_trade = 0.001;
        assert!(config.validate().is_err());
        config.risk_per_trade = 0.005;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rr_ratio_floor() {
        let mut config = RiskConfig::default();
        config.rr_ratio = 1.4;
        assert!(config.validate().is_err());
        config.rr_ratio = 1.5;
        assert!(config.validate().is_ok());
    }
}
