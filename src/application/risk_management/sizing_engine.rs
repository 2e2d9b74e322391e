use crate::domain::risk::RiskConfig;
use crate::domain::trading::{Action, Side};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tracing::debug;

/// Everything the sizing math needs, gathered before the pure computation.
#[derive(Debug, Clone)]
pub struct SizingInputs {
    pub symbol: String,
    pub action: Action,
    pub confidence: f64,
    pub uncertainty: f64,
    pub current_price: Decimal,
    pub free_balance: Decimal,
    /// Stddev of recent log-returns, as a fraction of price. None when the
    /// data source had nothing usable.
    pub atr_proxy: Option<f64>,
}

/// Sized entry ready for the margin gate.
#[derive(Debug, Clone)]
pub struct SizedEntry {
    pub side: Side,
    pub size: Decimal,
    pub leverage: u32,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub margin_needed: Decimal,
    pub risk_amount: Decimal,
}

/// Pure position sizing: confidence-tiered risk budget, volatility-scaled
/// stop distance, uncertainty-discounted leverage.
pub struct SizingEngine {
    config: RiskConfig,
}

impl SizingEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Risk budget fraction by confidence tier. With the default moderate
    /// budget of 2%, tiers land on 3% / 2% / 1%.
    fn tiered_risk_fraction(&self, confidence: f64) -> f64 {
        let moderate = self.config.risk_per_trade;
        let fraction = if confidence > 0.8 {
            moderate * 1.5
        } else if confidence >= 0.65 {
            moderate
        } else {
            moderate * 0.5
        };
        fraction.clamp(0.005, 0.05)
    }

    /// Stop distance as a fraction of price: twice the ATR proxy, floored,
    /// falling back to the configured default when no data exists.
    fn stop_distance_pct(&self, atr_proxy: Option<f64>) -> f64 {
        match atr_proxy {
            Some(atr) => (2.0 * atr).max(self.config.min_stop_distance_pct),
            None => self.config.fallback_atr_pct,
        }
    }

    fn leverage_for(&self, uncertainty: f64) -> u32 {
        let scaled = (self.config.base_leverage as f64 * (1.0 - uncertainty)).round();
        (scaled as u32).clamp(1, self.config.max_leverage)
    }

    /// Compute the sized entry, or None when the inputs cannot produce a
    /// positive size (zero price, zero balance, Hold action).
    pub fn size_entry(&self, inputs: &SizingInputs) -> Option<SizedEntry> {
        let side = match inputs.action {
            Action::Buy => Side::Long,
            Action::Sell => Side::Short,
            Action::Hold => return None,
        };
        if inputs.current_price <= Decimal::ZERO || inputs.free_balance <= Decimal::ZERO {
            return None;
        }

        let risk_fraction = Decimal::from_f64(self.tiered_risk_fraction(inputs.confidence))?;
        let risk_amount = inputs.free_balance * risk_fraction;

        let stop_pct = Decimal::from_f64(self.stop_distance_pct(inputs.atr_proxy))?;
        let stop_distance = inputs.current_price * stop_pct;
        if stop_distance <= Decimal::ZERO {
            return None;
        }

        let size = (risk_amount / stop_distance).round_dp(8);
        if size <= Decimal::ZERO {
            return None;
        }

        let leverage = self.leverage_for(inputs.uncertainty);
        let rr = Decimal::from_f64(self.config.rr_ratio)?;

        let (stop_loss, take_profit) = match side {
            Side::Long => (
                inputs.current_price - stop_distance,
                inputs.current_price + rr * stop_distance,
            ),
            Side::Short => (
                inputs.current_price + stop_distance,
                inputs.current_price - rr * stop_distance,
            ),
        };

        let margin_needed = size * inputs.current_price / Decimal::from(leverage);

        debug!(
            "SizingEngine: {} {} size={} stop_pct={} leverage={}x margin={}",
            inputs.symbol, inputs.action, size, stop_pct, leverage, margin_needed
        );

        Some(SizedEntry {
            side,
            size,
            leverage,
            stop_loss,
            take_profit,
            margin_needed,
            risk_amount,
        })
    }
}
