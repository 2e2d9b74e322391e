use crate::domain::events::{EventListener, TradingEvent};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Bounded drift history kept per exchange.
const HISTORY_CAP: usize = 100;

/// Reconciliation state of one exchange.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub exchange_id: String,
    pub last_sync: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub balance_drift: Decimal,
    pub position_drift: Decimal,
    pub price_drift: f64,
    pub is_synced: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub desynced_since: Option<DateTime<Utc>>,
    pub entry_paused: bool,
}

impl SyncStatus {
    fn new(exchange_id: &str) -> Self {
        Self {
            exchange_id: exchange_id.to_string(),
            last_sync: Utc::now(),
            last_success: None,
            balance_drift: Decimal::ZERO,
            position_drift: Decimal::ZERO,
            price_drift: 0.0,
            is_synced: true,
            error_count: 0,
            last_error: None,
            desynced_since: None,
            entry_paused: false,
        }
    }
}

/// Shared sync-status board. The executor polls `is_entry_paused` every
/// cycle, so reads avoid async locking entirely.
pub struct SyncBoard {
    statuses: RwLock<HashMap<String, SyncStatus>>,
    history: RwLock<HashMap<String, Vec<Decimal>>>,
}

impl SyncBoard {
    pub fn new(exchange_ids: &[String]) -> Self {
        let statuses = exchange_ids
            .iter()
            .map(|id| (id.clone(), SyncStatus::new(id)))
            .collect();
        Self {
            statuses: RwLock::new(statuses),
            history: RwLock::new(HashMap::new()),
        }
    }

    pub fn status(&self, exchange_id: &str) -> Option<SyncStatus> {
        self.statuses
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(exchange_id)
            .cloned()
    }

    pub fn all_statuses(&self) -> Vec<SyncStatus> {
        self.statuses
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn update(&self, exchange_id: &str, status: SyncStatus) {
        self.statuses
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(exchange_id.to_string(), status);
    }

    pub fn record_drift(&self, exchange_id: &str, balance_drift: Decimal) {
        let mut history = self.history.write().unwrap_or_else(|p| p.into_inner());
        let entries = history.entry(exchange_id.to_string()).or_default();
        entries.push(balance_drift);
        if entries.len() > HISTORY_CAP {
            let excess = entries.len() - HISTORY_CAP;
            entries.drain(..excess);
        }
    }

    pub fn drift_history(&self, exchange_id: &str) -> Vec<Decimal> {
        self.history
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(exchange_id)
            .cloned()
            .unwrap_or_default()
    }

    /// New entries on this exchange are blocked; exits remain allowed.
    pub fn is_entry_paused(&self, exchange_id: &str) -> bool {
        self.statuses
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(exchange_id)
            .map(|s| s.entry_paused)
            .unwrap_or(false)
    }

    pub fn is_synced(&self, exchange_id: &str) -> bool {
        self.statuses
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(exchange_id)
            .map(|s| s.is_synced)
            .unwrap_or(false)
    }
}

/// Accumulates realized PnL per exchange from the outbound event stream so
/// the sync manager can project the expected balance between syncs.
pub struct PnlLedger {
    realized: Mutex<HashMap<String, Decimal>>,
}

impl PnlLedger {
    pub fn new() -> Self {
        Self {
            realized: Mutex::new(HashMap::new()),
        }
    }

    /// Realized PnL recorded on the exchange since the last call, resetting
    /// the accumulator.
    pub fn take_delta(&self, exchange_id: &str) -> Decimal {
        self.realized
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(exchange_id)
            .unwrap_or(Decimal::ZERO)
    }
}

impl Default for PnlLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl EventListener for PnlLedger {
    fn on_event(&self, event: &TradingEvent) {
        if let TradingEvent::PositionClosed(record) = event {
            let mut realized = self.realized.lock().unwrap_or_else(|p| p.into_inner());
            *realized.entry(record.exchange_id.clone()).or_insert(Decimal::ZERO) +=
                record.realized_pnl;
        }
    }
}
