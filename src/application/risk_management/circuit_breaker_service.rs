use crate::domain::risk::RiskState;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::RwLock;
use tracing::error;

/// What tripped the breaker. Manual trips come from `EmergencyStop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    DailyLoss,
    Manual,
}

/// Hard-stop gate over the whole entry path. Once tripped, every new-entry
/// decision is rejected until an operator clears it; exits are unaffected.
pub struct CircuitBreakerService {
    tripped: RwLock<Option<TripReason>>,
    hard_stop_pct: f64,
}

impl CircuitBreakerService {
    pub fn new(hard_stop_pct: f64) -> Self {
        Self {
            tripped: RwLock::new(None),
            hard_stop_pct,
        }
    }

    /// Trip when the daily loss breaches `hard_stop_pct` of the day-start
    /// balance. Returns the reason message the first time it trips.
    pub fn check_daily_loss(&self, risk_state: &RiskState, unrealized: Decimal) -> Option<String> {
        if self.is_tripped() || risk_state.day_start_balance <= Decimal::ZERO {
            return None;
        }

        let hard_stop = Decimal::from_f64(self.hard_stop_pct).unwrap_or(Decimal::ZERO);
        let limit = risk_state.day_start_balance * hard_stop;
        let loss = risk_state.daily_loss(unrealized);

        if loss > limit {
            let message = format!(
                "daily loss {} breached hard stop {} ({}% of day start {})",
                loss,
                limit,
                self.hard_stop_pct * 100.0,
                risk_state.day_start_balance
            );
            error!("CircuitBreakerService: EMERGENCY STOP - {}", message);
            *self.tripped.write().unwrap_or_else(|p| p.into_inner()) =
                Some(TripReason::DailyLoss);
            return Some(message);
        }
        None
    }

    pub fn trip_manual(&self) {
        *self.tripped.write().unwrap_or_else(|p| p.into_inner()) = Some(TripReason::Manual);
    }

    /// Manual clear. Entries resume on the next cycle.
    pub fn clear(&self) {
        *self.tripped.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    pub fn trip_reason(&self) -> Option<TripReason> {
        *self.tripped.read().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn state_with_loss(day_start: Decimal, realized: Decimal) -> RiskState {
        let mut state = RiskState {
            day_start_balance: day_start,
            ..RiskState::default()
        };
        state.record_close(realized);
        state
    }

    #[test]
    fn test_trips_past_hard_stop() {
        let breaker = CircuitBreakerService::new(0.05);
        let state = state_with_loss(dec!(10000), dec!(-501));

        let message = breaker.check_daily_loss(&state, Decimal::ZERO);
        assert!(message.is_some());
        assert!(breaker.is_tripped());
        assert_eq!(breaker.trip_reason(), Some(TripReason::DailyLoss));

        // Second check does not re-trip
        assert!(breaker.check_daily_loss(&state, Decimal::ZERO).is_none());
    }

    #[test]
    fn test_exact_limit_does_not_trip() {
        let breaker = CircuitBreakerService::new(0.05);
        let state = state_with_loss(dec!(10000), dec!(-500));
        assert!(breaker.check_daily_loss(&state, Decimal::ZERO).is_none());
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn test_profitable_day_never_trips() {
        let breaker = CircuitBreakerService::new(0.05);
        let state = state_with_loss(dec!(10000), dec!(2000));
        assert!(breaker.check_daily_loss(&state, Decimal::ZERO).is_none());
    }

    #[test]
    fn test_unrealized_counts_toward_loss() {
        let breaker = CircuitBreakerService::new(0.05);
        let state = state_with_loss(dec!(10000), dec!(-300));
        assert!(breaker.check_daily_loss(&state, dec!(-300)).is_some());
    }

    #[test]
    fn test_manual_trip_and_clear() {
        let breaker = CircuitBreakerService::new(0.05);
        breaker.trip_manual();
        assert_eq!(breaker.trip_reason(), Some(TripReason::Manual));

        breaker.clear();
        assert!(!breaker.is_tripped());
    }
}
