use crate::application::exchange::ExchangeRouter;
use crate::application::latency::ewma::Endpoint;
use crate::application::orders::{CloseOutcome, OrderManager};
use crate::application::prediction::PredictionGateway;
use crate::application::risk_management::{EvaluationRequest, RiskManager};
use crate::application::sync::SyncBoard;
use crate::application::trading::stats::ExecutionStats;
use crate::application::trading::symbol_state::SymbolState;
use crate::domain::events::{EventListener, TradingEvent};
use crate::domain::market::MarketRegime;
use crate::domain::ports::MarketDataSource;
use crate::domain::prediction::Prediction;
use crate::domain::risk::RiskState;
use crate::domain::trading::{ExitReason, Position, PositionOrigin, Side, TradeRecord};
use crate::infrastructure::event_bus::EventBus;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub min_confidence_to_trade: f64,
    pub cooldown: Duration,
    pub opposite_exit_threshold: f64,
    pub low_conf_exit_threshold: f64,
    pub max_position_duration_s: i64,
    pub cycle_interval: Duration,
    pub cycle_deadline: Duration,
    pub max_daily_trades: u64,
    pub allow_high_volatility: bool,
    pub volatility_veto: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_confidence_to_trade: 0.65,
            cooldown: Duration::from_secs(30 * 60),
            opposite_exit_threshold: 0.7,
            low_conf_exit_threshold: 0.3,
            max_position_duration_s: 24 * 3600,
            cycle_interval: Duration::from_secs(1),
            cycle_deadline: Duration::from_secs(10),
            max_daily_trades: 20,
            allow_high_volatility: false,
            volatility_veto: 0.8,
        }
    }
}

/// How a cycle ended; used for telemetry and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Skipped,
    Held,
    ExitTaken,
    EntryTaken,
    EntryRejected,
    OrderFailed,
    Idle,
}

/// Relays closed trades from the event bus into the executor's feedback
/// task.
pub struct ClosedTradeRelay {
    tx: mpsc::UnboundedSender<TradeRecord>,
}

impl ClosedTradeRelay {
    pub fn new(tx: mpsc::UnboundedSender<TradeRecord>) -> Self {
        Self { tx }
    }
}

impl EventListener for ClosedTradeRelay {
    fn on_event(&self, event: &TradingEvent) {
        if let TradingEvent::PositionClosed(record) = event {
            let _ = self.tx.send(record.clone());
        }
    }
}

/// Per-symbol decision loop: prediction, exit evaluation, entry gating,
/// risk sizing, order handoff and model feedback.
pub struct TradingExecutor {
    config: ExecutorConfig,
    gateway: Arc<PredictionGateway>,
    risk_manager: Arc<RiskManager>,
    order_manager: Arc<OrderManager>,
    router: Arc<ExchangeRouter>,
    sync_board: Arc<SyncBoard>,
    market_data: Arc<dyn MarketDataSource>,
    event_bus: EventBus,
    risk_state: Arc<RwLock<RiskState>>,
    stats: Arc<ExecutionStats>,
    permitted_symbols: Arc<std::sync::RwLock<Vec<String>>>,
    running: Arc<AtomicBool>,
    /// Position id -> prediction id captured at entry, for calibration
    /// feedback once the trade closes.
    entry_predictions: std::sync::Mutex<HashMap<Uuid, Uuid>>,
}

impl TradingExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        gateway: Arc<PredictionGateway>,
        risk_manager: Arc<RiskManager>,
        order_manager: Arc<OrderManager>,
        router: Arc<ExchangeRouter>,
        sync_board: Arc<SyncBoard>,
        market_data: Arc<dyn MarketDataSource>,
        event_bus: EventBus,
        risk_state: Arc<RwLock<RiskState>>,
        stats: Arc<ExecutionStats>,
        permitted_symbols: Arc<std::sync::RwLock<Vec<String>>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            gateway,
            risk_manager,
            order_manager,
            router,
            sync_board,
            market_data,
            event_bus,
            risk_state,
            stats,
            permitted_symbols,
            running,
            entry_predictions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Drive the cycle loop for one symbol until shutdown. In-flight cycles
    /// finish their current step; no new order starts after the signal.
    pub async fn run_symbol(self: Arc<Self>, symbol: String, mut shutdown: watch::Receiver<bool>) {
        info!(
            "TradingExecutor: loop started for {} (interval {:?})",
            symbol, self.config.cycle_interval
        );
        let mut state = SymbolState::new();
        let mut interval = tokio::time::interval(self.config.cycle_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = std::time::Instant::now();
                    match tokio::time::timeout(
                        self.config.cycle_deadline,
                        self.run_cycle(&symbol, &mut state),
                    )
                    .await
                    {
                        Ok(status) => {
                            debug!("TradingExecutor: {} cycle -> {:?}", symbol, status);
                        }
                        Err(_) => {
                            warn!(
                                "TradingExecutor: {} cycle exceeded deadline {:?}",
                                symbol, self.config.cycle_deadline
                            );
                        }
                    }
                    self.stats.record_cycle(started.elapsed().as_secs_f64() * 1000.0);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("TradingExecutor: {} loop stopping", symbol);
                        return;
                    }
                }
            }
        }
    }

    /// One decision cycle for `symbol`.
    pub async fn run_cycle(&self, symbol: &str, state: &mut SymbolState) -> CycleStatus {
        self.check_daily_reset().await;

        let position = self.order_manager.position_for_symbol(symbol).await;

        // Precondition checks, short-circuiting in order.
        if !self.running.load(Ordering::SeqCst) {
            return CycleStatus::Skipped;
        }
        let venue = match self.venue_for(symbol, position.as_ref()) {
            Some(venue) => venue,
            None => {
                debug!("TradingExecutor: no venue available for {}", symbol);
                self.stats.record_skip();
                return CycleStatus::Skipped;
            }
        };
        if self.sync_board.is_entry_paused(&venue) && position.is_none() {
            debug!("TradingExecutor: {} paused on {} (desync)", symbol, venue);
            self.stats.record_skip();
            return CycleStatus::Skipped;
        }
        if !self.is_permitted(symbol) {
            self.stats.record_skip();
            return CycleStatus::Skipped;
        }
        {
            let risk_state = self.risk_state.read().await;
            if risk_state.daily_trades_for(symbol) >= self.config.max_daily_trades {
                debug!("TradingExecutor: {} daily trade limit reached", symbol);
                self.stats.record_skip();
                return CycleStatus::Skipped;
            }
        }
        if self.risk_manager.breaker().is_tripped() && position.is_none() {
            self.stats.record_skip();
            return CycleStatus::Skipped;
        }

        // Prediction. A gateway error aborts the cycle; SL/TP exits are
        // unaffected because they run in the order manager's tick path.
        let prediction = match self.gateway.predict(symbol).await {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!("TradingExecutor: prediction failed for {}: {}", symbol, e);
                return CycleStatus::Skipped;
            }
        };
        self.stats.record_prediction(prediction.confidence);
        self.event_bus
            .publish(TradingEvent::Prediction(prediction.clone()))
            .await;

        // Exit evaluation runs before entry.
        if let Some(position) = position {
            return self.evaluate_exits(&position, &prediction, state).await;
        }

        // Entry evaluation.
        self.evaluate_entry(symbol, &venue, &prediction, state).await
    }

    fn is_permitted(&self, symbol: &str) -> bool {
        self.permitted_symbols
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .any(|s| s == symbol)
    }

    /// The exchange this symbol would trade on: the open position's venue,
    /// otherwise the fastest routable venue without an entry pause.
    fn venue_for(&self, _symbol: &str, position: Option<&Position>) -> Option<String> {
        if let Some(position) = position {
            return Some(position.exchange_id.clone());
        }
        let candidates: Vec<String> = self
            .router
            .exchange_ids()
            .into_iter()
            .filter(|id| {
                self.router
                    .handle(id)
                    .map(|h| h.health.is_routable())
                    .unwrap_or(false)
                    && !self.sync_board.is_entry_paused(id)
            })
            .collect();
        self.router
            .latency_table()
            .best_exchange(Endpoint::PlaceOrder, candidates.iter().map(String::as_str))
    }

    async fn evaluate_exits(
        &self,
        position: &Position,
        prediction: &Prediction,
        state: &mut SymbolState,
    ) -> CycleStatus {
        // Opposite-signal exit
        if position.side.is_opposed_by(prediction.action)
            && prediction.confidence >= self.config.opposite_exit_threshold
        {
            return self
                .close_with(position, ExitReason::OppositeSignal, state)
                .await;
        }

        // Low-confidence exit
        if prediction.confidence < self.config.low_conf_exit_threshold {
            return self
                .close_with(position, ExitReason::LowConfidence, state)
                .await;
        }

        // Timeout exit
        let held_for = (chrono::Utc::now() - position.entry_time).num_seconds();
        if held_for > self.config.max_position_duration_s {
            return self.close_with(position, ExitReason::Timeout, state).await;
        }

        CycleStatus::Held
    }

    async fn close_with(
        &self,
        position: &Position,
        reason: ExitReason,
        state: &mut SymbolState,
    ) -> CycleStatus {
        info!(
            "TradingExecutor: closing {} ({}) on {}",
            position.symbol, reason, position.exchange_id
        );
        match self.order_manager.close_position(position.id, reason).await {
            Ok(CloseOutcome::Closed(_)) | Ok(CloseOutcome::Residual { .. }) => {
                // Exit first; re-entry waits a full cycle regardless of
                // cooldown expiry.
                state.arm_forced_cooldown();
                CycleStatus::ExitTaken
            }
            Err(e) => {
                error!(
                    "TradingExecutor: close failed for {}: {}",
                    position.symbol, e
                );
                if state.record_order_failure() {
                    warn!(
                        "TradingExecutor: {} degraded after repeated order failures",
                        position.symbol
                    );
                }
                CycleStatus::OrderFailed
            }
        }
    }

    async fn evaluate_entry(
        &self,
        symbol: &str,
        venue: &str,
        prediction: &Prediction,
        state: &mut SymbolState,
    ) -> CycleStatus {
        if state.take_forced_cooldown() {
            debug!("TradingExecutor: {} in post-exit cooldown", symbol);
            self.stats.record_skip();
            return CycleStatus::Skipped;
        }
        if state.is_degraded() {
            debug!("TradingExecutor: {} degraded, entries paused", symbol);
            self.stats.record_skip();
            return CycleStatus::Skipped;
        }
        if !prediction.is_tradeable(self.config.min_confidence_to_trade) {
            self.stats.record_skip();
            return CycleStatus::Idle;
        }
        if state.cooldown_active(self.config.cooldown) {
            debug!("TradingExecutor: {} cooldown active", symbol);
            self.stats.record_skip();
            return CycleStatus::Skipped;
        }
        if prediction.market_regime == MarketRegime::HighVolatility
            && !self.config.allow_high_volatility
        {
            debug!("TradingExecutor: {} vetoed by regime", symbol);
            self.stats.record_skip();
            return CycleStatus::Skipped;
        }
        if prediction.volatility > self.config.volatility_veto {
            debug!(
                "TradingExecutor: {} vetoed by measured volatility {:.2}",
                symbol, prediction.volatility
            );
            self.stats.record_skip();
            return CycleStatus::Skipped;
        }

        let current_price = match self.market_data.current_price(symbol).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(_) | Err(_) => {
                warn!("TradingExecutor: no current price for {}", symbol);
                return CycleStatus::Skipped;
            }
        };

        let account = match self.router.account_snapshot(venue).await {
            Ok(account) => account,
            Err(e) => {
                warn!("TradingExecutor: no account snapshot for {}: {}", venue, e);
                return CycleStatus::Skipped;
            }
        };

        let request = EvaluationRequest {
            symbol: symbol.to_string(),
            action: prediction.action,
            confidence: prediction.confidence,
            uncertainty: prediction.uncertainty,
            expected_return: prediction.expected_return,
            current_price,
            account,
            open_positions: self.order_manager.open_count().await,
            unrealized_pnl: self.order_manager.total_unrealized().await,
        };

        let decision = self.risk_manager.evaluate(&request).await;
        self.event_bus
            .publish(TradingEvent::RiskDecision {
                symbol: symbol.to_string(),
                decision: decision.clone(),
            })
            .await;

        if !decision.approved {
            debug!(
                "TradingExecutor: {} entry rejected: {:?}",
                symbol, decision.rejection_reason
            );
            self.stats.record_skip();
            return CycleStatus::EntryRejected;
        }

        let side = match prediction.action {
            crate::domain::trading::Action::Buy => Side::Long,
            crate::domain::trading::Action::Sell => Side::Short,
            crate::domain::trading::Action::Hold => return CycleStatus::Idle,
        };

        match self
            .order_manager
            .open_position(
                symbol,
                Some(venue),
                side,
                &decision,
                current_price,
                PositionOrigin::Directional,
            )
            .await
        {
            Ok(position) => {
                state.record_entry();
                self.entry_predictions
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(position.id, prediction.id);
                self.stats.record_trade();
                CycleStatus::EntryTaken
            }
            Err(e) => {
                error!("TradingExecutor: entry order failed for {}: {}", symbol, e);
                if state.record_order_failure() {
                    warn!(
                        "TradingExecutor: {} degraded after repeated order failures",
                        symbol
                    );
                }
                CycleStatus::OrderFailed
            }
        }
    }

    async fn check_daily_reset(&self) {
        let today = chrono::Utc::now().date_naive();
        {
            let risk_state = self.risk_state.read().await;
            if risk_state.reference_date == today {
                return;
            }
        }
        let mut balance_total = Decimal::ZERO;
        for id in self.router.exchange_ids() {
            if let Ok(account) = self.router.account_snapshot(&id).await {
                balance_total += account.balance_total;
            }
        }
        let mut risk_state = self.risk_state.write().await;
        if risk_state.check_daily_reset(today, balance_total) {
            info!(
                "TradingExecutor: daily counters reset (day start balance {})",
                balance_total
            );
        }
    }

    /// Feedback loop: map closed trades back to the prediction that opened
    /// them and update the calibration table.
    pub async fn run_feedback(
        self: Arc<Self>,
        mut closed: mpsc::UnboundedReceiver<TradeRecord>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                record = closed.recv() => {
                    let Some(record) = record else { return };
                    let prediction_id = self
                        .entry_predictions
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .remove(&record.position_id);
                    if let Some(prediction_id) = prediction_id {
                        let realized_direction = if record.realized_pnl > Decimal::ZERO {
                            record.side
                        } else {
                            record.side.opposite()
                        };
                        self.gateway.record_outcome(prediction_id, realized_direction);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
