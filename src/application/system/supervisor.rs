use crate::application::arbitrage::ArbitrageDetector;
use crate::application::exchange::ExchangeRouter;
use crate::application::latency::{LatencyOptimizer, LatencyTable};
use crate::application::orders::{CloseOutcome, OrderManager};
use crate::application::prediction::{CalibrationSnapshot, Calibrator, PredictionGateway};
use crate::application::risk_management::{CircuitBreakerService, RiskManager};
use crate::application::sync::{PnlLedger, SyncBoard, SyncManager};
use crate::application::trading::{ExecutionStats, TradingExecutor};
use crate::application::trading::executor::ClosedTradeRelay;
use crate::config::Config;
use crate::domain::commands::{
    EngineCommand, EngineStatus, ExchangeStatus, Reply, TradingMode,
};
use crate::domain::errors::{CommandError, EngineError};
use crate::domain::events::TradingEvent;
use crate::domain::ports::{
    ExchangeClient, MarketDataSource, Predictor, TradeRecordSink,
};
use crate::domain::risk::RiskState;
use crate::domain::trading::{ExitReason, TradeRecord};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::EngineMetrics;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Hard deadline for the shutdown sequence.
const SHUTDOWN_DEADLINE: std::time::Duration = std::time::Duration::from_secs(30);

/// Owns every component, spawns their tasks, dispatches the inbound control
/// channel and runs the shutdown sequence. Test harnesses construct the
/// same components with fakes; nothing in here is a singleton.
pub struct Supervisor {
    config: Config,
    mode: TradingMode,
    router: Arc<ExchangeRouter>,
    optimizer: Arc<LatencyOptimizer>,
    sync_board: Arc<SyncBoard>,
    pnl_ledger: Arc<PnlLedger>,
    risk_state: Arc<RwLock<RiskState>>,
    risk_manager: Arc<RiskManager>,
    order_manager: Arc<OrderManager>,
    calibrator: Arc<Calibrator>,
    executor: Arc<TradingExecutor>,
    detector: Arc<ArbitrageDetector>,
    event_bus: EventBus,
    stats: Arc<ExecutionStats>,
    metrics: EngineMetrics,
    running: Arc<AtomicBool>,
    permitted_symbols: Arc<std::sync::RwLock<Vec<String>>>,
    shutdown_tx: watch::Sender<bool>,
    feedback_rx: Option<mpsc::UnboundedReceiver<TradeRecord>>,
    training_tx: Option<mpsc::UnboundedSender<serde_json::Value>>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub async fn new(
        config: Config,
        clients: Vec<Arc<dyn ExchangeClient>>,
        market_data: Arc<dyn MarketDataSource>,
        predictor: Arc<dyn Predictor>,
        sink: Arc<dyn TradeRecordSink>,
        event_bus: EventBus,
    ) -> Result<Self, EngineError> {
        let latency = Arc::new(LatencyTable::new());
        let router = Arc::new(ExchangeRouter::new(
            clients,
            latency,
            config.latency_book_staleness_ms,
        ));
        let optimizer = Arc::new(LatencyOptimizer::new(
            router.clone(),
            config.latency_cache_ttl_ms,
        ));
        let sync_board = Arc::new(SyncBoard::new(&router.exchange_ids()));

        let pnl_ledger = Arc::new(PnlLedger::new());
        event_bus.subscribe(pnl_ledger.clone()).await;

        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        event_bus
            .subscribe(Arc::new(ClosedTradeRelay::new(feedback_tx)))
            .await;

        let risk_state = Arc::new(RwLock::new(RiskState::default()));
        let breaker = Arc::new(CircuitBreakerService::new(config.risk.hard_stop_pct));
        let risk_manager = Arc::new(RiskManager::new(
            config.risk_config(),
            breaker.clone(),
            risk_state.clone(),
            market_data.clone(),
        ));
        let order_manager = Arc::new(OrderManager::new(
            router.clone(),
            event_bus.clone(),
            risk_state.clone(),
            breaker.clone(),
            sink,
            config.min_fill_fraction,
        ));

        let calibrator = Arc::new(Calibrator::new());
        let gateway = Arc::new(PredictionGateway::new(
            market_data.clone(),
            predictor,
            calibrator.clone(),
        ));

        let stats = Arc::new(ExecutionStats::new());
        let running = Arc::new(AtomicBool::new(false));
        let permitted_symbols = Arc::new(std::sync::RwLock::new(config.symbols.clone()));

        let executor = Arc::new(TradingExecutor::new(
            config.executor_config(),
            gateway.clone(),
            risk_manager.clone(),
            order_manager.clone(),
            router.clone(),
            sync_board.clone(),
            market_data,
            event_bus.clone(),
            risk_state.clone(),
            stats.clone(),
            permitted_symbols.clone(),
            running.clone(),
        ));

        let detector = Arc::new(ArbitrageDetector::new(
            router.clone(),
            optimizer.clone(),
            order_manager.clone(),
            sync_board.clone(),
            breaker,
            event_bus.clone(),
            stats.clone(),
            config.arbitrage_config(),
        ));

        let metrics = EngineMetrics::new().map_err(EngineError::Other)?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            mode: config.mode,
            config,
            router,
            optimizer,
            sync_board,
            pnl_ledger,
            risk_state,
            risk_manager,
            order_manager,
            calibrator,
            executor,
            detector,
            event_bus,
            stats,
            metrics,
            running,
            permitted_symbols,
            shutdown_tx,
            feedback_rx: Some(feedback_rx),
            training_tx: None,
            handles: Vec::new(),
        })
    }

    /// Wire an external training collaborator; `TrainingControl` payloads
    /// are forwarded verbatim.
    pub fn set_training_channel(&mut self, tx: mpsc::UnboundedSender<serde_json::Value>) {
        self.training_tx = Some(tx);
    }

    pub fn optimizer(&self) -> Arc<LatencyOptimizer> {
        self.optimizer.clone()
    }

    /// Restore the persisted calibration table, when a path is configured.
    fn load_calibration(&self) {
        if self.config.calibration_path.is_empty() {
            return;
        }
        match std::fs::read_to_string(&self.config.calibration_path) {
            Ok(raw) => match serde_json::from_str::<CalibrationSnapshot>(&raw) {
                Ok(snapshot) => {
                    self.calibrator.restore(&snapshot);
                    info!(
                        "Supervisor: calibration restored from {}",
                        self.config.calibration_path
                    );
                }
                Err(e) => warn!("Supervisor: calibration file unreadable: {}", e),
            },
            Err(_) => {
                info!("Supervisor: no calibration file yet, starting from identity");
            }
        }
    }

    fn save_calibration(&self) {
        if self.config.calibration_path.is_empty() {
            return;
        }
        let snapshot = self.calibrator.snapshot();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.config.calibration_path, raw) {
                    error!("Supervisor: failed to persist calibration: {}", e);
                }
            }
            Err(e) => error!("Supervisor: failed to serialize calibration: {}", e),
        }
    }

    /// Startup reconciliation: account snapshots and open-position
    /// rediscovery per exchange. All exchanges failing at a live startup is
    /// unrecoverable (exit code 3).
    async fn startup_reconcile(&self) -> Result<(), EngineError> {
        let mut reachable = 0usize;
        let mut total_balance = Decimal::ZERO;

        for exchange_id in self.router.exchange_ids() {
            match self.router.refresh_account(&exchange_id).await {
                Ok(account) => {
                    reachable += 1;
                    total_balance += account.balance_total;
                }
                Err(e) => {
                    warn!("Supervisor: startup balance fetch failed on {}: {}", exchange_id, e);
                    continue;
                }
            }
            match self.router.fetch_positions_on(&exchange_id).await {
                Ok(positions) if !positions.is_empty() => {
                    info!(
                        "Supervisor: rediscovered {} open positions on {}",
                        positions.len(),
                        exchange_id
                    );
                    self.order_manager.rediscover(&exchange_id, positions).await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Supervisor: startup position fetch failed on {}: {}",
                        exchange_id, e
                    );
                }
            }
        }

        if reachable == 0 && self.mode.is_live() {
            return Err(EngineError::ExchangeStartup(
                "no exchange reachable at startup".to_string(),
            ));
        }

        let mut risk_state = self.risk_state.write().await;
        risk_state.day_start_balance = total_balance;
        info!(
            "Supervisor: startup reconcile complete ({} exchanges, balance {})",
            reachable, total_balance
        );
        Ok(())
    }

    fn spawn_tasks(&mut self) {
        let shutdown = self.shutdown_tx.subscribe();

        // Tick fanout into the order manager's protective-exit path.
        let ticks = self.router.spawn_tick_fanout(self.config.symbols.clone());
        self.handles.push(tokio::spawn(
            self.order_manager.clone().run_tick_pump(ticks, shutdown.clone()),
        ));

        // Periodic reconciliation.
        let mut sync_manager = SyncManager::new(
            self.router.clone(),
            self.sync_board.clone(),
            self.pnl_ledger.clone(),
            self.event_bus.clone(),
            self.config.sync_config(),
        );
        let sync_shutdown = shutdown.clone();
        self.handles.push(tokio::spawn(async move {
            sync_manager.run(sync_shutdown).await;
        }));

        // One decision loop per symbol, unless arbitrage-only.
        if self.mode != TradingMode::ArbitrageOnly {
            for symbol in self.config.symbols.clone() {
                self.handles.push(tokio::spawn(
                    self.executor.clone().run_symbol(symbol, shutdown.clone()),
                ));
            }
        }

        // Calibration feedback.
        if let Some(feedback_rx) = self.feedback_rx.take() {
            self.handles.push(tokio::spawn(
                self.executor.clone().run_feedback(feedback_rx, shutdown.clone()),
            ));
        }

        // Arbitrage scanning.
        if self.config.arbitrage_enabled || self.mode == TradingMode::ArbitrageOnly {
            self.handles
                .push(tokio::spawn(self.detector.clone().run(shutdown.clone())));
        }

        // Periodic latency benchmarking, when enabled.
        if self.config.latency_benchmark_interval_s > 0
            && let Some(symbol) = self.config.symbols.first().cloned()
        {
            let optimizer = self.optimizer.clone();
            let interval_s = self.config.latency_benchmark_interval_s;
            let mut bench_shutdown = shutdown.clone();
            self.handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_secs(interval_s));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let _ = optimizer.benchmark(&symbol, 10).await;
                        }
                        _ = bench_shutdown.changed() => {
                            if *bench_shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }));
        }

        // Periodic metrics emission.
        self.handles.push(tokio::spawn(Self::run_metrics_emitter(
            self.stats.clone(),
            self.risk_state.clone(),
            self.order_manager.clone(),
            self.router.clone(),
            self.risk_manager.clone(),
            self.sync_board.clone(),
            self.event_bus.clone(),
            self.metrics.clone(),
            self.config.metrics_interval_s,
            shutdown,
        )));
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_metrics_emitter(
        stats: Arc<ExecutionStats>,
        risk_state: Arc<RwLock<RiskState>>,
        order_manager: Arc<OrderManager>,
        router: Arc<ExchangeRouter>,
        risk_manager: Arc<RiskManager>,
        sync_board: Arc<SyncBoard>,
        event_bus: EventBus,
        metrics: EngineMetrics,
        interval_s: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        use crate::application::latency::Endpoint;

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_s));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let endpoints = [
            Endpoint::OrderBook,
            Endpoint::PlaceOrder,
            Endpoint::Balance,
            Endpoint::Positions,
        ];

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let open = order_manager.open_count().await;
                    let unrealized = order_manager.total_unrealized().await;
                    let snapshot = {
                        let state = risk_state.read().await;
                        stats.snapshot(&state, open, unrealized)
                    };

                    metrics.positions_count.set(open as f64);
                    metrics.daily_pnl.set(snapshot.daily_pnl.to_f64().unwrap_or(0.0));
                    metrics.win_rate.set(snapshot.win_rate);
                    metrics.cycles_executed.set(snapshot.cycles_executed as f64);
                    metrics
                        .predictions_processed
                        .set(snapshot.predictions_processed as f64);
                    metrics.trades_executed.set(snapshot.trades_executed as f64);
                    metrics.trades_skipped.set(snapshot.trades_skipped as f64);
                    metrics.average_cycle_ms.set(snapshot.average_cycle_ms);
                    metrics
                        .arbitrage_opportunities
                        .set(snapshot.arbitrage_opportunities as f64);
                    metrics.circuit_breaker_status.set(
                        if risk_manager.breaker().is_tripped() { 1.0 } else { 0.0 },
                    );

                    let latency = router.latency_table();
                    for exchange_id in router.exchange_ids() {
                        if let Ok(account) = router.account_snapshot(&exchange_id).await {
                            metrics
                                .balance_total
                                .with_label_values(&[exchange_id.as_str()])
                                .set(account.balance_total.to_f64().unwrap_or(0.0));
                        }
                        for endpoint in endpoints {
                            if let Some(ewma) = latency.get(&exchange_id, endpoint) {
                                metrics
                                    .exchange_latency_ewma_ms
                                    .with_label_values(&[exchange_id.as_str(), endpoint.as_str()])
                                    .set(ewma);
                            }
                        }
                    }
                    for status in sync_board.all_statuses() {
                        metrics
                            .sync_drift
                            .with_label_values(&[status.exchange_id.as_str(), "balance"])
                            .set(status.balance_drift.to_f64().unwrap_or(0.0));
                        metrics
                            .sync_drift
                            .with_label_values(&[status.exchange_id.as_str(), "position"])
                            .set(status.position_drift.to_f64().unwrap_or(0.0));
                    }

                    event_bus.publish(TradingEvent::Metrics(snapshot)).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Main loop: reconcile, spawn component tasks, then serve the control
    /// channel until `Shutdown`.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
    ) -> Result<(), EngineError> {
        self.load_calibration();
        self.startup_reconcile().await?;
        self.spawn_tasks();
        info!(
            "Supervisor: engine up in {:?} mode ({} symbols, {} exchanges)",
            self.mode,
            self.config.symbols.len(),
            self.router.exchange_ids().len()
        );

        while let Some(command) = commands.recv().await {
            if self.handle_command(command).await {
                break;
            }
        }

        self.graceful_shutdown().await;
        Ok(())
    }

    /// Dispatch one command; returns true when the engine should shut down.
    async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Start { reply } => {
                self.running.store(true, Ordering::SeqCst);
                info!("Supervisor: trading started");
                Self::send(reply, Ok(()));
            }
            EngineCommand::Stop { reply } => {
                self.running.store(false, Ordering::SeqCst);
                info!("Supervisor: trading stopped");
                Self::send(reply, Ok(()));
            }
            EngineCommand::Shutdown { reply } => {
                Self::send(reply, Ok(()));
                return true;
            }
            EngineCommand::SetMode { mode, reply } => {
                if self.running.load(Ordering::SeqCst) {
                    Self::send(
                        reply,
                        Err(CommandError::Rejected(
                            "stop trading before changing mode".to_string(),
                        )),
                    );
                } else {
                    info!("Supervisor: mode set to {:?}", mode);
                    self.mode = mode;
                    Self::send(reply, Ok(()));
                }
            }
            EngineCommand::SetSymbols { symbols, reply } => {
                if symbols.is_empty() {
                    Self::send(
                        reply,
                        Err(CommandError::Rejected("symbol list is empty".to_string())),
                    );
                } else {
                    info!("Supervisor: permitted symbols set to {:?}", symbols);
                    *self
                        .permitted_symbols
                        .write()
                        .unwrap_or_else(|p| p.into_inner()) = symbols;
                    Self::send(reply, Ok(()));
                }
            }
            EngineCommand::SetLeverage {
                symbol,
                leverage,
                reply,
            } => {
                let result = self
                    .risk_manager
                    .set_leverage_override(&symbol, leverage)
                    .map_err(CommandError::Rejected);
                Self::send(reply, result);
            }
            EngineCommand::TrainingControl { payload, reply } => {
                match &self.training_tx {
                    Some(tx) => {
                        let result = tx
                            .send(payload)
                            .map_err(|_| CommandError::Rejected("training channel closed".into()));
                        Self::send(reply, result);
                    }
                    None => {
                        warn!("Supervisor: no training collaborator attached, dropping payload");
                        Self::send(reply, Ok(()));
                    }
                }
            }
            EngineCommand::RequestStatus { reply } => {
                let status = self.build_status().await;
                Self::send(reply, Ok(status));
            }
            EngineCommand::RequestMetrics { reply } => {
                let open = self.order_manager.open_count().await;
                let unrealized = self.order_manager.total_unrealized().await;
                let snapshot = {
                    let state = self.risk_state.read().await;
                    self.stats.snapshot(&state, open, unrealized)
                };
                Self::send(reply, Ok(snapshot));
            }
            EngineCommand::RequestPositions { reply } => {
                Self::send(reply, Ok(self.order_manager.list_positions().await));
            }
            EngineCommand::ClosePosition { position_id, reply } => {
                let result = match self
                    .order_manager
                    .close_position(position_id, ExitReason::Manual)
                    .await
                {
                    Ok(CloseOutcome::Closed(record)) => Ok(record),
                    Ok(CloseOutcome::Residual { remaining, .. }) => Err(CommandError::Rejected(
                        format!("partial close; residual {} remains", remaining),
                    )),
                    Err(e) => Err(CommandError::Rejected(e.to_string())),
                };
                Self::send(reply, result);
            }
            EngineCommand::EmergencyStop { reply } => {
                error!("Supervisor: EMERGENCY STOP requested");
                self.risk_manager.breaker().trip_manual();
                self.event_bus
                    .publish(TradingEvent::CircuitBreaker {
                        reason: "manual emergency stop".to_string(),
                    })
                    .await;
                Self::send(reply, Ok(()));
            }
            EngineCommand::ResetCircuitBreaker { reply } => {
                info!("Supervisor: circuit breaker cleared");
                self.risk_manager.breaker().clear();
                Self::send(reply, Ok(()));
            }
        }
        false
    }

    fn send<T>(reply: Reply<T>, value: Result<T, CommandError>) {
        if reply.send(value).is_err() {
            warn!("Supervisor: reply channel dropped before response");
        }
    }

    async fn build_status(&self) -> EngineStatus {
        let risk_state = self.risk_state.read().await.clone();
        let unrealized = self.order_manager.total_unrealized().await;
        let exchanges = self
            .router
            .exchange_ids()
            .into_iter()
            .map(|id| {
                let (connected, degraded) = self
                    .router
                    .handle(&id)
                    .map(|h| (h.health.is_connected(), h.health.is_degraded()))
                    .unwrap_or((false, false));
                ExchangeStatus {
                    connected,
                    degraded,
                    synced: self.sync_board.is_synced(&id),
                    entry_paused: self.sync_board.is_entry_paused(&id),
                    exchange_id: id,
                }
            })
            .collect();

        let symbols = self
            .permitted_symbols
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        EngineStatus {
            running: self.running.load(Ordering::SeqCst),
            mode: self.mode,
            symbols,
            open_positions: self.order_manager.open_count().await,
            daily_trades: risk_state.daily_trades_total(),
            daily_pnl: risk_state.daily_realized_pnl + unrealized,
            circuit_breaker_tripped: self.risk_manager.breaker().is_tripped(),
            exchanges,
        }
    }

    /// Ordered shutdown: stop new cycles, signal every task, refuse new
    /// opens, drain, then enforce the hard deadline.
    async fn graceful_shutdown(self) {
        info!("Supervisor: shutdown sequence started");
        self.running.store(false, Ordering::SeqCst);
        self.order_manager.set_shutting_down();
        let _ = self.shutdown_tx.send(true);
        self.save_calibration();

        // Give in-flight submissions a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let mut handles = self.handles;
        let all_tasks = futures::future::join_all(handles.iter_mut());
        if tokio::time::timeout(SHUTDOWN_DEADLINE, all_tasks).await.is_err() {
            error!(
                "Supervisor: shutdown deadline {:?} exceeded, aborting remaining tasks",
                SHUTDOWN_DEADLINE
            );
            for handle in &handles {
                handle.abort();
            }
        }
        info!("Supervisor: shutdown complete");
    }
}
