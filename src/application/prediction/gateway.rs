use crate::application::prediction::calibration::Calibrator;
use crate::domain::errors::PredictionError;
use crate::domain::market::types::volatility_context;
use crate::domain::ports::{MarketDataSource, Predictor};
use crate::domain::prediction::{ConfidenceLevel, Prediction};
use crate::domain::trading::{Action, Side};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Candles requested per prediction.
const CANDLE_WINDOW: usize = 100;
/// Minimum candles before a prediction is attempted.
const MIN_CANDLES: usize = 60;
/// Volatility feature lookback.
const VOLATILITY_WINDOW: usize = 20;
/// Cap on outstanding predictions awaiting an outcome.
const PENDING_CAP: usize = 1000;

struct PendingPrediction {
    raw_confidence: f64,
    action: Action,
    issued_at: chrono::DateTime<chrono::Utc>,
}

/// Thin adapter around the external predictor: assembles the feature
/// window, adds the volatility context, applies confidence calibration and
/// remembers raw confidences for the feedback loop.
pub struct PredictionGateway {
    market_data: Arc<dyn MarketDataSource>,
    predictor: Arc<dyn Predictor>,
    calibrator: Arc<Calibrator>,
    pending: Mutex<HashMap<Uuid, PendingPrediction>>,
}

impl PredictionGateway {
    pub fn new(
        market_data: Arc<dyn MarketDataSource>,
        predictor: Arc<dyn Predictor>,
        calibrator: Arc<Calibrator>,
    ) -> Self {
        Self {
            market_data,
            predictor,
            calibrator,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn predict(&self, symbol: &str) -> Result<Prediction, PredictionError> {
        let candles = self
            .market_data
            .recent_candles(symbol, CANDLE_WINDOW)
            .await
            .map_err(|e| PredictionError::DataSource(e.to_string()))?;

        if candles.len() < MIN_CANDLES {
            return Err(PredictionError::InsufficientData {
                got: candles.len(),
                need: MIN_CANDLES,
            });
        }

        let volatility = volatility_context(&candles, VOLATILITY_WINDOW);

        let raw = self.predictor.predict(symbol, &candles, volatility).await?;

        let confidence = self.calibrator.calibrate(raw.confidence);
        let prediction = Prediction {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            action: raw.action,
            confidence,
            confidence_level: ConfidenceLevel::from_confidence(confidence),
            expected_return: raw.expected_return,
            risk_level: raw.risk_level.clamp(1, 5),
            time_horizon_hours: raw.time_horizon_hours,
            market_regime: raw.market_regime,
            action_probabilities: raw.action_probabilities,
            uncertainty: raw.uncertainty.clamp(0.0, 1.0),
            volatility,
            timestamp: chrono::Utc::now(),
        };

        self.track_pending(&prediction, raw.confidence);

        debug!(
            "PredictionGateway: {} {} raw={:.3} calibrated={:.3} ({:?})",
            symbol, prediction.action, raw.confidence, confidence, prediction.confidence_level
        );
        Ok(prediction)
    }

    fn track_pending(&self, prediction: &Prediction, raw_confidence: f64) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if pending.len() >= PENDING_CAP {
            // Drop the oldest outstanding entry.
            if let Some(oldest) = pending
                .iter()
                .min_by_key(|(_, p)| p.issued_at)
                .map(|(id, _)| *id)
            {
                pending.remove(&oldest);
            }
        }
        pending.insert(
            prediction.id,
            PendingPrediction {
                raw_confidence,
                action: prediction.action,
                issued_at: prediction.timestamp,
            },
        );
    }

    /// Feed a realized outcome back into calibration. `realized_direction`
    /// is the direction the market actually moved after entry.
    pub fn record_outcome(&self, prediction_id: Uuid, realized_direction: Side) {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&prediction_id);

        let Some(entry) = entry else {
            warn!(
                "PredictionGateway: outcome for unknown prediction {}",
                prediction_id
            );
            return;
        };

        let was_correct = entry.action == realized_direction.entry_action();
        self.calibrator
            .record_outcome(entry.raw_confidence, was_correct);
        debug!(
            "PredictionGateway: outcome recorded ({} was {})",
            entry.action,
            if was_correct { "correct" } else { "wrong" }
        );
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{MockMarketDataSource, MockPredictor};
    use rust_decimal_macros::dec;

    fn gateway_with(
        candle_count: usize,
    ) -> (Arc<MockPredictor>, Arc<Calibrator>, PredictionGateway) {
        let market_data = Arc::new(MockMarketDataSource::new());
        market_data.seed_flat_series("BTC/USDT", dec!(50000), candle_count);
        let predictor = Arc::new(MockPredictor::new());
        let calibrator = Arc::new(Calibrator::new());
        let gateway = PredictionGateway::new(market_data, predictor.clone(), calibrator.clone());
        (predictor, calibrator, gateway)
    }

    #[tokio::test]
    async fn test_insufficient_data_rejected() {
        let (_predictor, _calibrator, gateway) = gateway_with(59);
        let err = gateway.predict("BTC/USDT").await.unwrap_err();
        assert!(matches!(
            err,
            PredictionError::InsufficientData { got: 59, need: 60 }
        ));
    }

    #[tokio::test]
    async fn test_sixty_candles_is_enough() {
        let (_predictor, _calibrator, gateway) = gateway_with(60);
        assert!(gateway.predict("BTC/USDT").await.is_ok());
    }

    #[tokio::test]
    async fn test_prediction_carries_calibrated_confidence() {
        let (predictor, _calibrator, gateway) = gateway_with(120);
        let mut raw = MockPredictor::hold();
        raw.action = Action::Buy;
        raw.confidence = 0.72;
        predictor.push_prediction("BTC/USDT", raw);

        let prediction = gateway.predict("BTC/USDT").await.unwrap();
        assert_eq!(prediction.action, Action::Buy);
        // Identity calibration initially
        assert!((prediction.confidence - 0.72).abs() < 1e-9);
        assert_eq!(prediction.confidence_level, ConfidenceLevel::High);
        assert_eq!(gateway.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_outcome_feedback_updates_calibration() {
        let (predictor, calibrator, gateway) = gateway_with(120);

        // 20 buy predictions at raw 0.75 that all turn out wrong
        for _ in 0..20 {
            let mut raw = MockPredictor::hold();
            raw.action = Action::Buy;
            raw.confidence = 0.75;
            predictor.push_prediction("BTC/USDT", raw);
            let prediction = gateway.predict("BTC/USDT").await.unwrap();
            gateway.record_outcome(prediction.id, Side::Short);
        }

        assert_eq!(gateway.pending_count(), 0);
        // The calibrator learned that 0.75 raw deserves much less
        assert!(calibrator.calibrate(0.75) < 0.2);
    }

    #[tokio::test]
    async fn test_unknown_outcome_is_ignored() {
        let (_predictor, _calibrator, gateway) = gateway_with(120);
        gateway.record_outcome(Uuid::new_v4(), Side::Long);
        assert_eq!(gateway.pending_count(), 0);
    }
}
