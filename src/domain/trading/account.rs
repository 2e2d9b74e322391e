use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Balance consistency tolerance in quote currency.
const BALANCE_EPSILON: Decimal = dec!(0.000001);

/// Quote-currency account snapshot for one exchange.
///
/// Owned by the exchange router; all other components read copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub exchange_id: String,
    pub balance_free: Decimal,
    pub balance_used: Decimal,
    pub balance_total: Decimal,
    pub open_positions: HashSet<Uuid>,
    pub last_sync: DateTime<Utc>,
    pub drift: Decimal,
}

impl AccountState {
    pub fn new(exchange_id: impl Into<String>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            balance_free: Decimal::ZERO,
            balance_used: Decimal::ZERO,
            balance_total: Decimal::ZERO,
            open_positions: HashSet::new(),
            last_sync: Utc::now(),
            drift: Decimal::ZERO,
        }
    }

    pub fn apply_balances(&mut self, free: Decimal, used: Decimal) {
        self.balance_free = free;
        self.balance_used = used;
        self.balance_total = free + used;
        self.last_sync = Utc::now();
    }

    /// Invariant: total = free + used within epsilon.
    pub fn is_consistent(&self) -> bool {
        (self.balance_total - (self.balance_free + self.balance_used)).abs() < BALANCE_EPSILON
    }

    pub fn seconds_since_sync(&self) -> i64 {
        (Utc::now() - self.last_sync).num_seconds()
    }
}
