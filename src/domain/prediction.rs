use crate::domain::market::MarketRegime;
use crate::domain::trading::Action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Confidence band after calibration, by fixed thresholds
/// `{0, 0.35, 0.5, 0.65, 0.8, 1.0}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Veto,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence < 0.35 {
            ConfidenceLevel::Veto
        } else if confidence < 0.5 {
            ConfidenceLevel::Low
        } else if confidence < 0.65 {
            ConfidenceLevel::Medium
        } else if confidence < 0.8 {
            ConfidenceLevel::High
        } else {
            ConfidenceLevel::VeryHigh
        }
    }
}

/// Raw predictor output, before confidence calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPrediction {
    pub action: Action,
    pub confidence: f64,
    pub expected_return: f64,
    pub risk_level: u8,
    pub time_horizon_hours: f64,
    pub market_regime: MarketRegime,
    pub action_probabilities: HashMap<Action, f64>,
    pub uncertainty: f64,
}

/// Calibrated per-symbol, per-cycle prediction consumed by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub symbol: String,
    pub action: Action,
    /// Post-calibration confidence in [0, 1].
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub expected_return: f64,
    pub risk_level: u8,
    pub time_horizon_hours: f64,
    pub market_regime: MarketRegime,
    pub action_probabilities: HashMap<Action, f64>,
    pub uncertainty: f64,
    /// Measured volatility context fed alongside the model features.
    pub volatility: f64,
    pub timestamp: DateTime<Utc>,
}

impl Prediction {
    pub fn is_tradeable(&self, min_confidence: f64) -> bool {
        self.action != Action::Hold && self.confidence >= min_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_level_thresholds() {
        assert_eq!(ConfidenceLevel::from_confidence(0.0), ConfidenceLevel::Veto);
        assert_eq!(
            ConfidenceLevel::from_confidence(0.34),
            ConfidenceLevel::Veto
        );
        assert_eq!(ConfidenceLevel::from_confidence(0.35), ConfidenceLevel::Low);
        assert_eq!(
            ConfidenceLevel::from_confidence(0.5),
            ConfidenceLevel::Medium
        );
        assert_eq!(ConfidenceLevel::from_confidence(0.65), ConfidenceLevel::High);
        assert_eq!(
            ConfidenceLevel::from_confidence(0.8),
            ConfidenceLevel::VeryHigh
        );
        assert_eq!(
            ConfidenceLevel::from_confidence(1.0),
            ConfidenceLevel::VeryHigh
        );
    }

    #[test]
    fn test_tradeable_boundary_is_inclusive() {
        let mut prediction = Prediction {
            id: Uuid::new_v4(),
            symbol: "BTC/USDT".to_string(),
            action: Action::Buy,
            confidence: 0.65,
            confidence_level: ConfidenceLevel::High,
            expected_return: 0.02,
            risk_level: 3,
            time_horizon_hours: 2.0,
            market_regime: MarketRegime::Trending,
            action_probabilities: HashMap::new(),
            uncertainty: 0.2,
            volatility: 0.1,
            timestamp: Utc::now(),
        };
        assert!(prediction.is_tradeable(0.65));

        prediction.confidence = 0.65 - 1e-9;
        assert!(!prediction.is_tradeable(0.65));

        prediction.confidence = 0.9;
        prediction.action = Action::Hold;
        assert!(!prediction.is_tradeable(0.65));
    }
}
