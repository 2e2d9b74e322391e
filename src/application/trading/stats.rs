use crate::domain::events::MetricsSnapshot;
use crate::domain::risk::RiskState;
use rust_decimal::Decimal;
use std::sync::Mutex;

#[derive(Debug, Default, Clone)]
struct Inner {
    cycles_executed: u64,
    predictions_processed: u64,
    trades_executed: u64,
    trades_skipped: u64,
    confidence_sum: f64,
    cycle_ms_sum: f64,
    arbitrage_opportunities: u64,
}

/// Rolling execution telemetry shared by the executors and the metrics
/// emitter.
pub struct ExecutionStats {
    inner: Mutex<Inner>,
}

impl ExecutionStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn record_cycle(&self, elapsed_ms: f64) {
        let mut inner = self.lock();
        inner.cycles_executed += 1;
        inner.cycle_ms_sum += elapsed_ms;
    }

    pub fn record_prediction(&self, confidence: f64) {
        let mut inner = self.lock();
        inner.predictions_processed += 1;
        inner.confidence_sum += confidence;
    }

    pub fn record_trade(&self) {
        self.lock().trades_executed += 1;
    }

    pub fn record_skip(&self) {
        self.lock().trades_skipped += 1;
    }

    pub fn record_arbitrage_opportunity(&self) {
        self.lock().arbitrage_opportunities += 1;
    }

    pub fn snapshot(
        &self,
        risk_state: &RiskState,
        open_positions: usize,
        unrealized: Decimal,
    ) -> MetricsSnapshot {
        let inner = self.lock().clone();
        let average_confidence = if inner.predictions_processed > 0 {
            inner.confidence_sum / inner.predictions_processed as f64
        } else {
            0.0
        };
        let average_cycle_ms = if inner.cycles_executed > 0 {
            inner.cycle_ms_sum / inner.cycles_executed as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            cycles_executed: inner.cycles_executed,
            predictions_processed: inner.predictions_processed,
            trades_executed: inner.trades_executed,
            trades_skipped: inner.trades_skipped,
            average_confidence,
            average_cycle_ms,
            open_positions,
            daily_trades: risk_state.daily_trades_total(),
            daily_pnl: risk_state.daily_realized_pnl + unrealized,
            total_pnl: risk_state.total_realized_pnl,
            win_rate: risk_state.win_rate(),
            arbitrage_opportunities: inner.arbitrage_opportunities,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_averages() {
        let stats = ExecutionStats::new();
        stats.record_cycle(10.0);
        stats.record_cycle(20.0);
        stats.record_prediction(0.6);
        stats.record_prediction(0.8);
        stats.record_trade();
        stats.record_skip();

        let mut risk_state = RiskState::default();
        risk_state.record_entry("BTC/USDT");
        risk_state.record_close(dec!(5));

        let snapshot = stats.snapshot(&risk_state, 2, dec!(1.5));
        assert_eq!(snapshot.cycles_executed, 2);
        assert!((snapshot.average_cycle_ms - 15.0).abs() < 1e-9);
        assert!((snapshot.average_confidence - 0.7).abs() < 1e-9);
        assert_eq!(snapshot.trades_executed, 1);
        assert_eq!(snapshot.open_positions, 2);
        assert_eq!(snapshot.daily_trades, 1);
        assert_eq!(snapshot.daily_pnl, dec!(6.5));
        assert_eq!(snapshot.win_rate, 1.0);
    }
}
