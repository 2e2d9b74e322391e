use crate::config::env_or;
use crate::domain::commands::TradingMode;
use crate::domain::risk::RiskConfig;
use anyhow::Result;
use rust_decimal::Decimal;

/// Risk section of the environment configuration.
#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub min_balance_quote: Decimal,
    pub max_daily_loss_quote: Decimal,
    pub hard_stop_pct: f64,
    pub max_concurrent_positions: usize,
    pub max_daily_trades: u64,
    pub risk_per_trade: f64,
    pub rr_ratio: f64,
    pub base_leverage: u32,
    pub max_leverage: u32,
}

impl RiskEnvConfig {
    pub fn from_env(mode: TradingMode) -> Result<Self> {
        let defaults = Self::defaults_for(mode);
        Ok(Self {
            min_balance_quote: env_or("MIN_BALANCE_QUOTE", defaults.min_balance_quote)?,
            max_daily_loss_quote: env_or("MAX_DAILY_LOSS_QUOTE", defaults.max_daily_loss_quote)?,
            hard_stop_pct: env_or("HARD_STOP_PCT", defaults.hard_stop_pct)?,
            max_concurrent_positions: env_or(
                "MAX_CONCURRENT_POSITIONS",
                defaults.max_concurrent_positions,
            )?,
            max_daily_trades: env_or("MAX_DAILY_TRADES", defaults.max_daily_trades)?,
            risk_per_trade: env_or("RISK_PER_TRADE", defaults.risk_per_trade)?,
            rr_ratio: env_or("RR_RATIO", defaults.rr_ratio)?,
            base_leverage: env_or("BASE_LEVERAGE", defaults.base_leverage)?,
            max_leverage: env_or("MAX_LEVERAGE", defaults.max_leverage)?,
        })
    }

    /// Paper mode runs permissive leverage; live clamps to 10x.
    pub fn defaults_for(mode: TradingMode) -> Self {
        let max_leverage = match mode {
            TradingMode::Paper => 30,
            _ => 10,
        };
        Self {
            min_balance_quote: Decimal::from(100),
            max_daily_loss_quote: Decimal::from(1000),
            hard_stop_pct: 0.05,
            max_concurrent_positions: 3,
            max_daily_trades: 20,
            risk_per_trade: 0.02,
            rr_ratio: 2.0,
            base_leverage: 10,
            max_leverage,
        }
    }

    pub fn to_risk_config(&self) -> RiskConfig {
        RiskConfig {
            min_balance_quote: self.min_balance_quote,
            max_daily_loss_quote: self.max_daily_loss_quote,
            hard_stop_pct: self.hard_stop_pct,
            max_concurrent_positions: self.max_concurrent_positions,
            max_daily_trades: self.max_daily_trades,
            risk_per_trade: self.risk_per_trade,
            rr_ratio: self.rr_ratio,
            base_leverage: self.base_leverage.min(self.max_leverage),
            max_leverage: self.max_leverage,
            ..RiskConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_specific_leverage_defaults() {
        assert_eq!(RiskEnvConfig::defaults_for(TradingMode::Paper).max_leverage, 30);
        assert_eq!(RiskEnvConfig::defaults_for(TradingMode::Live).max_leverage, 10);
        assert_eq!(RiskEnvConfig::defaults_for(TradingMode::Hft).max_leverage, 10);
    }

    #[test]
    fn test_conversion_is_valid() {
        let config = RiskEnvConfig::defaults_for(TradingMode::Live).to_risk_config();
        assert!(config.validate().is_ok());
    }
}
