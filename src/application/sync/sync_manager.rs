use crate::application::exchange::ExchangeRouter;
use crate::application::sync::board::{PnlLedger, SyncBoard, SyncStatus};
use crate::domain::events::{AnomalyEvent, TradingEvent};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Consecutive sync failures before the anomaly event fires.
const EXCESSIVE_ERROR_THRESHOLD: u32 = 5;
/// Balance drift beyond `fatal_multiplier * threshold` is unreconcilable.
const FATAL_DRIFT_MULTIPLIER: Decimal = rust_decimal_macros::dec!(10);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval_s: u64,
    pub balance_drift_threshold: Decimal,
    pub price_drift_threshold: f64,
    pub desync_pause_s: i64,
    pub symbols: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_s: 30,
            balance_drift_threshold: rust_decimal_macros::dec!(10),
            price_drift_threshold: 0.01,
            desync_pause_s: 300,
            symbols: Vec::new(),
        }
    }
}

/// Periodic reconciliation of balance, position and price drift per
/// exchange. Publishes anomalies; flips the entry-pause flag that gates the
/// executor's new entries while leaving exits untouched.
pub struct SyncManager {
    router: Arc<ExchangeRouter>,
    board: Arc<SyncBoard>,
    ledger: Arc<PnlLedger>,
    event_bus: EventBus,
    config: SyncConfig,
    expected_free: HashMap<String, Decimal>,
}

impl SyncManager {
    pub fn new(
        router: Arc<ExchangeRouter>,
        board: Arc<SyncBoard>,
        ledger: Arc<PnlLedger>,
        event_bus: EventBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            router,
            board,
            ledger,
            event_bus,
            config,
            expected_free: HashMap::new(),
        }
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "SyncManager started (interval {}s, balance threshold {})",
            self.config.interval_s, self.config.balance_drift_threshold
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_s));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sync_all().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("SyncManager: shutdown requested, stopping");
                        return;
                    }
                }
            }
        }
    }

    pub async fn sync_all(&mut self) {
        let price_drift = self.max_price_drift();

        for exchange_id in self.router.exchange_ids() {
            match self.sync_exchange(&exchange_id, price_drift).await {
                Ok(status) => self.apply_success(&exchange_id, status).await,
                Err(e) => self.apply_failure(&exchange_id, e).await,
            }
        }
    }

    async fn sync_exchange(
        &mut self,
        exchange_id: &str,
        price_drift: f64,
    ) -> Result<SyncStatus, String> {
        let account = self
            .router
            .refresh_account(exchange_id)
            .await
            .map_err(|e| e.to_string())?;

        // Expected = last reported + realized PnL booked since the last sync.
        // First sync seeds the expectation instead of measuring drift.
        let realized_delta = self.ledger.take_delta(exchange_id);
        let balance_drift = match self.expected_free.get(exchange_id) {
            Some(previous) => (account.balance_free - (previous + realized_delta)).abs(),
            None => Decimal::ZERO,
        };
        self.expected_free
            .insert(exchange_id.to_string(), account.balance_free);

        let positions = self
            .router
            .fetch_positions_on(exchange_id)
            .await
            .map_err(|e| e.to_string())?;
        let position_drift: Decimal = positions.iter().map(|p| p.unrealized_pnl.abs()).sum();

        let previous = self.board.status(exchange_id);
        let is_synced = balance_drift < self.config.balance_drift_threshold
            && price_drift < self.config.price_drift_threshold;

        let now = Utc::now();
        let desynced_since = if is_synced {
            None
        } else {
            previous.and_then(|p| p.desynced_since).or(Some(now))
        };

        Ok(SyncStatus {
            exchange_id: exchange_id.to_string(),
            last_sync: now,
            last_success: Some(now),
            balance_drift,
            position_drift,
            price_drift,
            is_synced,
            error_count: 0,
            last_error: None,
            desynced_since,
            entry_paused: false, // decided in apply_success
        })
    }

    async fn apply_success(&mut self, exchange_id: &str, mut status: SyncStatus) {
        self.board.record_drift(exchange_id, status.balance_drift);

        if status.balance_drift >= self.config.balance_drift_threshold {
            warn!(
                "SyncManager: {} balance drift {} over threshold {}",
                exchange_id, status.balance_drift, self.config.balance_drift_threshold
            );
            self.event_bus
                .publish(TradingEvent::Anomaly(AnomalyEvent::BalanceDrift {
                    exchange_id: exchange_id.to_string(),
                    drift: status.balance_drift,
                    threshold: self.config.balance_drift_threshold,
                }))
                .await;

            // Unreconcilable drift is fatal, not an anomaly.
            if status.balance_drift
                >= self.config.balance_drift_threshold * FATAL_DRIFT_MULTIPLIER
            {
                error!(
                    "SyncManager: {} drift {} is unreconcilable, raising fatal circuit breaker",
                    exchange_id, status.balance_drift
                );
                self.event_bus
                    .publish(TradingEvent::CircuitBreaker {
                        reason: format!(
                            "unreconcilable balance drift on {}: {}",
                            exchange_id, status.balance_drift
                        ),
                    })
                    .await;
            }
        }

        // Prolonged desync pauses new entries; resuming is immediate once
        // drift returns under threshold.
        if let Some(since) = status.desynced_since {
            let desynced_for = (Utc::now() - since).num_seconds();
            if desynced_for >= self.config.desync_pause_s {
                if !self.board.is_entry_paused(exchange_id) {
                    warn!(
                        "SyncManager: {} desynced for {}s, pausing new entries",
                        exchange_id, desynced_for
                    );
                    self.event_bus
                        .publish(TradingEvent::Anomaly(AnomalyEvent::ProlongedDesync {
                            exchange_id: exchange_id.to_string(),
                            desynced_for_s: desynced_for as u64,
                        }))
                        .await;
                }
                status.entry_paused = true;
            }
        } else if self.board.is_entry_paused(exchange_id) {
            info!("SyncManager: {} back in sync, entries resume", exchange_id);
        }

        debug!(
            "SyncManager: {} synced={} balance_drift={} price_drift={:.4}",
            exchange_id, status.is_synced, status.balance_drift, status.price_drift
        );
        self.board.update(exchange_id, status);
    }

    async fn apply_failure(&mut self, exchange_id: &str, error: String) {
        warn!("SyncManager: sync failed on {}: {}", exchange_id, error);
        let mut status = self
            .board
            .status(exchange_id)
            .unwrap_or_else(|| SyncStatus {
                exchange_id: exchange_id.to_string(),
                last_sync: Utc::now(),
                last_success: None,
                balance_drift: Decimal::ZERO,
                position_drift: Decimal::ZERO,
                price_drift: 0.0,
                is_synced: false,
                error_count: 0,
                last_error: None,
                desynced_since: Some(Utc::now()),
                entry_paused: false,
            });

        status.last_sync = Utc::now();
        status.is_synced = false;
        status.error_count += 1;
        status.last_error = Some(error);
        status.desynced_since = status.desynced_since.or(Some(Utc::now()));

        if status.error_count >= EXCESSIVE_ERROR_THRESHOLD {
            self.event_bus
                .publish(TradingEvent::Anomaly(AnomalyEvent::ExcessiveErrors {
                    exchange_id: exchange_id.to_string(),
                    error_count: status.error_count,
                }))
                .await;
        }

        if let Some(since) = status.desynced_since
            && (Utc::now() - since).num_seconds() >= self.config.desync_pause_s
        {
            status.entry_paused = true;
        }

        self.board.update(exchange_id, status);
    }

    /// Relative price dispersion across exchanges: stddev/mean of cached
    /// mid prices, maximized over the configured symbols.
    fn max_price_drift(&self) -> f64 {
        let mut max_drift = 0.0f64;
        for symbol in &self.config.symbols {
            let mids: Vec<f64> = self
                .router
                .fresh_books(symbol)
                .iter()
                .filter_map(|b| b.mid_price())
                .filter_map(|p| p.to_f64())
                .collect();
            if mids.len() < 2 {
                continue;
            }
            let mean = mids.clone().mean();
            if mean <= 0.0 {
                continue;
            }
            let drift = mids.std_dev() / mean;
            if drift > max_drift {
                max_drift = drift;
            }
        }
        max_drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::latency::LatencyTable;
    use crate::domain::ports::ExchangeClient;
    use crate::infrastructure::mock::MockExchangeClient;
    use rust_decimal_macros::dec;

    fn manager_for(
        exchange: Arc<MockExchangeClient>,
        config: SyncConfig,
    ) -> (SyncManager, Arc<SyncBoard>) {
        let router = Arc::new(ExchangeRouter::new(
            vec![exchange as Arc<dyn ExchangeClient>],
            Arc::new(LatencyTable::new()),
            2000,
        ));
        let board = Arc::new(SyncBoard::new(&router.exchange_ids()));
        let manager = SyncManager::new(
            router,
            board.clone(),
            Arc::new(PnlLedger::new()),
            EventBus::new(),
            config,
        );
        (manager, board)
    }

    #[tokio::test]
    async fn test_first_sync_seeds_expectation() {
        let exchange = Arc::new(MockExchangeClient::new("a", dec!(1000)));
        let (mut manager, board) = manager_for(exchange, SyncConfig::default());

        manager.sync_all().await;
        let status = board.status("a").unwrap();
        assert!(status.is_synced);
        assert_eq!(status.balance_drift, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unexplained_balance_change_is_drift() {
        let exchange = Arc::new(MockExchangeClient::new("a", dec!(1000)));
        let (mut manager, board) = manager_for(exchange.clone(), SyncConfig::default());

        manager.sync_all().await;
        // Balance jumps with no recorded realized PnL
        exchange.set_balance(dec!(1500), Decimal::ZERO);
        manager.sync_all().await;

        let status = board.status("a").unwrap();
        assert_eq!(status.balance_drift, dec!(500));
        assert!(!status.is_synced);
    }

    #[tokio::test]
    async fn test_realized_pnl_explains_balance_change() {
        use crate::domain::events::EventListener;
        use crate::domain::trading::{ExitReason, Position, Side};

        let exchange = Arc::new(MockExchangeClient::new("a", dec!(1000)));
        let router = Arc::new(ExchangeRouter::new(
            vec![exchange.clone() as Arc<dyn ExchangeClient>],
            Arc::new(LatencyTable::new()),
            2000,
        ));
        let board = Arc::new(SyncBoard::new(&router.exchange_ids()));
        let ledger = Arc::new(PnlLedger::new());
        let mut manager = SyncManager::new(
            router,
            board.clone(),
            ledger.clone(),
            EventBus::new(),
            SyncConfig::default(),
        );

        manager.sync_all().await;

        // A close books +500 realized on the same exchange
        let position = Position::open(
            "BTC/USDT",
            "a",
            Side::Long,
            dec!(1),
            dec!(1000),
            1,
            None,
            None,
            Decimal::ZERO,
        );
        let record = position.into_record(dec!(1500), ExitReason::TakeProfit, Decimal::ZERO);
        ledger.on_event(&TradingEvent::PositionClosed(record));
        exchange.set_balance(dec!(1500), Decimal::ZERO);

        manager.sync_all().await;
        let status = board.status("a").unwrap();
        assert_eq!(status.balance_drift, Decimal::ZERO);
        assert!(status.is_synced);
    }

    #[tokio::test]
    async fn test_immediate_desync_does_not_pause() {
        let exchange = Arc::new(MockExchangeClient::new("a", dec!(1000)));
        let (mut manager, board) = manager_for(exchange.clone(), SyncConfig::default());

        manager.sync_all().await;
        exchange.set_balance(dec!(2000), Decimal::ZERO);
        manager.sync_all().await;

        // Desynced but not yet past desync_pause_s
        assert!(!board.status("a").unwrap().is_synced);
        assert!(!board.is_entry_paused("a"));
    }

    #[tokio::test]
    async fn test_prolonged_desync_pauses_entries() {
        let exchange = Arc::new(MockExchangeClient::new("a", dec!(1000)));
        let config = SyncConfig {
            desync_pause_s: 0, // pause immediately for the test
            ..SyncConfig::default()
        };
        let (mut manager, board) = manager_for(exchange.clone(), config);

        manager.sync_all().await;
        exchange.set_balance(dec!(2000), Decimal::ZERO);
        manager.sync_all().await;

        assert!(board.is_entry_paused("a"));

        // Drift explained away on the next tick: entries resume
        manager.sync_all().await;
        assert!(!board.is_entry_paused("a"));
    }
}
