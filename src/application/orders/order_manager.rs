use crate::application::exchange::ExchangeRouter;
use crate::application::risk_management::CircuitBreakerService;
use crate::domain::errors::OrderError;
use crate::domain::events::TradingEvent;
use crate::domain::ports::TradeRecordSink;
use crate::domain::risk::{RiskDecision, RiskState};
use crate::domain::trading::types::{
    OrderAck, OrderRequest, OrderStatus, OrderType, PositionInfo, Tick,
};
use crate::domain::trading::{ExitReason, Position, PositionOrigin, Side, TradeRecord};
use crate::infrastructure::event_bus::EventBus;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Submissions of one idempotency key before a transient failure is
/// surfaced to the caller.
const SUBMIT_ATTEMPTS: u32 = 3;
const RESUBMIT_BACKOFF: Duration = Duration::from_millis(250);

/// Result of a close request: either the position fully closed, or a
/// partial fill left a residual that keeps the original id and protections.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    Closed(TradeRecord),
    Residual {
        position_id: Uuid,
        closed_quantity: Decimal,
        realized_pnl: Decimal,
        remaining: Decimal,
    },
}

/// Owns every open position. All mutation flows through here, serialized
/// per symbol so the "SL checked then closed" pair is atomic and each
/// position emits exactly one terminal event.
///
/// Every submission carries a `(position_id, attempt)` idempotency key as
/// its client order id. Transient failures resubmit the SAME key, so a
/// timed-out order that actually executed is collapsed by the venue's
/// client-order-id dedup instead of filling twice.
pub struct OrderManager {
    router: Arc<ExchangeRouter>,
    event_bus: EventBus,
    risk_state: Arc<RwLock<RiskState>>,
    breaker: Arc<CircuitBreakerService>,
    sink: Arc<dyn TradeRecordSink>,
    positions: RwLock<HashMap<Uuid, Position>>,
    closed_ids: RwLock<HashSet<Uuid>>,
    close_attempts: std::sync::Mutex<HashMap<Uuid, u32>>,
    symbol_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    min_fill_fraction: Decimal,
    shutting_down: AtomicBool,
}

impl OrderManager {
    pub fn new(
        router: Arc<ExchangeRouter>,
        event_bus: EventBus,
        risk_state: Arc<RwLock<RiskState>>,
        breaker: Arc<CircuitBreakerService>,
        sink: Arc<dyn TradeRecordSink>,
        min_fill_fraction: Decimal,
    ) -> Self {
        Self {
            router,
            event_bus,
            risk_state,
            breaker,
            sink,
            positions: RwLock::new(HashMap::new()),
            closed_ids: RwLock::new(HashSet::new()),
            close_attempts: std::sync::Mutex::new(HashMap::new()),
            symbol_locks: std::sync::Mutex::new(HashMap::new()),
            min_fill_fraction,
            shutting_down: AtomicBool::new(false),
        }
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.symbol_locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Refuse new opens during shutdown; closes remain honored.
    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub async fn list_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn get_position(&self, id: Uuid) -> Option<Position> {
        self.positions.read().await.get(&id).cloned()
    }

    pub async fn position_for_symbol(&self, symbol: &str) -> Option<Position> {
        self.positions
            .read()
            .await
            .values()
            .find(|p| p.symbol == symbol && p.origin == PositionOrigin::Directional)
            .cloned()
    }

    pub async fn open_count(&self) -> usize {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.origin == PositionOrigin::Directional)
            .count()
    }

    pub async fn total_unrealized(&self) -> Decimal {
        self.positions
            .read()
            .await
            .values()
            .map(|p| p.unrealized_pnl)
            .sum()
    }

    /// Submit an order to a pinned venue, resubmitting the same client
    /// order id on transient failures. A timed-out submission may still
    /// have executed; carrying the original key lets the venue collapse
    /// the retry into the first order.
    async fn submit_with_retry(
        &self,
        exchange_id: &str,
        request: &OrderRequest,
    ) -> Result<OrderAck, OrderError> {
        let mut submission = 1u32;
        loop {
            match self.router.place_on(exchange_id, request).await {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_transient() && submission < SUBMIT_ATTEMPTS => {
                    submission += 1;
                    warn!(
                        "OrderManager: transient failure on {} ({}), resubmitting key {} ({}/{})",
                        request.symbol, e, request.client_order_id, submission, SUBMIT_ATTEMPTS
                    );
                    tokio::time::sleep(RESUBMIT_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Open a position per the approved risk decision. The position only
    /// exists after a confirmed fill of at least `min_fill_fraction`.
    #[instrument(skip_all, fields(symbol = %symbol, side = %side, size = %decision.size))]
    pub async fn open_position(
        &self,
        symbol: &str,
        exchange_id: Option<&str>,
        side: Side,
        decision: &RiskDecision,
        requested_price: Decimal,
        origin: PositionOrigin,
    ) -> Result<Position, OrderError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(OrderError::ShuttingDown);
        }
        if !decision.approved {
            return Err(OrderError::Rejected {
                reason: "risk decision not approved".to_string(),
            });
        }

        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().await;

        if origin == PositionOrigin::Directional
            && self.position_for_symbol(symbol).await.is_some()
        {
            return Err(OrderError::Rejected {
                reason: format!("position already open on {}", symbol),
            });
        }

        let position_id = Uuid::new_v4();
        let key = OrderRequest::idempotency_key(position_id, 1);

        // Zero protection levels mean "none" (arbitrage legs trade without).
        let stop_loss = (decision.stop_loss > Decimal::ZERO).then_some(decision.stop_loss);
        let take_profit = (decision.take_profit > Decimal::ZERO).then_some(decision.take_profit);

        let request = OrderRequest {
            symbol: symbol.to_string(),
            side: side.into(),
            quantity: decision.size,
            order_type: OrderType::Market,
            price: None,
            leverage: decision.leverage,
            stop_loss,
            take_profit,
            reduce_only: false,
            client_order_id: key,
        };
        let margin_needed = if decision.leverage > 0 {
            decision.size * requested_price / Decimal::from(decision.leverage)
        } else {
            decision.size * requested_price
        };

        // Pin the venue before the first submission so a retry of the same
        // key cannot land on a different exchange.
        let venue = match exchange_id {
            Some(id) => id.to_string(),
            None => match self.router.best_venue(margin_needed).await {
                Ok(venue) => venue,
                Err(e) => {
                    self.emit_order_failed(symbol, "any", &e).await;
                    return Err(e);
                }
            },
        };

        let ack = match self.submit_with_retry(&venue, &request).await {
            Ok(ack) => ack,
            Err(e) => {
                self.emit_order_failed(symbol, &venue, &e).await;
                return Err(e);
            }
        };

        if ack.status == OrderStatus::Rejected {
            let error = OrderError::Rejected {
                reason: "exchange rejected order".to_string(),
            };
            self.emit_order_failed(symbol, &venue, &error).await;
            return Err(error);
        }

        // Fills below the minimum fraction never become a position: cancel
        // the remainder and surface the failure.
        let fraction = ack.fill_fraction(decision.size);
        if fraction < self.min_fill_fraction {
            warn!(
                "OrderManager: {} fill fraction {} below minimum {}, cancelling",
                symbol, fraction, self.min_fill_fraction
            );
            if let Err(e) = self.router.cancel_on(&venue, symbol, &ack.order_id).await {
                debug!("OrderManager: cancel of underfilled order failed: {}", e);
            }
            let error = OrderError::InsufficientFill {
                filled: fraction.to_string(),
                minimum: self.min_fill_fraction.to_string(),
            };
            self.emit_order_failed(symbol, &venue, &error).await;
            return Err(error);
        }

        let fill_price = if ack.average_fill_price > Decimal::ZERO {
            ack.average_fill_price
        } else {
            requested_price
        };

        let mut position = Position::open(
            symbol,
            venue,
            side,
            ack.filled_quantity,
            fill_price,
            decision.leverage,
            stop_loss,
            take_profit,
            ack.fee,
        );
        position.id = position_id;
        position.origin = origin;

        self.positions.write().await.insert(position_id, position.clone());
        self.risk_state.write().await.record_entry(symbol);

        info!(
            "OrderManager: opened {} {} {} @ {} (id {})",
            symbol, side, position.size, fill_price, position_id
        );
        self.event_bus
            .publish(TradingEvent::PositionOpened(position.clone()))
            .await;

        Ok(position)
    }

    /// Close a position at market. Serialized with price ticks on the same
    /// symbol.
    #[instrument(skip_all, fields(id = %position_id, reason = %reason))]
    pub async fn close_position(
        &self,
        position_id: Uuid,
        reason: ExitReason,
    ) -> Result<CloseOutcome, OrderError> {
        let symbol = {
            let positions = self.positions.read().await;
            match positions.get(&position_id) {
                Some(p) => p.symbol.clone(),
                None => {
                    return if self.closed_ids.read().await.contains(&position_id) {
                        Err(OrderError::AlreadyClosed(position_id))
                    } else {
                        Err(OrderError::PositionNotFound(position_id))
                    };
                }
            }
        };

        let lock = self.symbol_lock(&symbol);
        let _guard = lock.lock().await;
        self.close_locked(position_id, reason, None).await
    }

    /// Close body; caller holds the symbol lock. `exit_hint` carries the
    /// breaching tick price when called from the SL/TP path.
    async fn close_locked(
        &self,
        position_id: Uuid,
        reason: ExitReason,
        exit_hint: Option<Decimal>,
    ) -> Result<CloseOutcome, OrderError> {
        let position = {
            let positions = self.positions.read().await;
            match positions.get(&position_id) {
                Some(p) => p.clone(),
                None => {
                    return if self.closed_ids.read().await.contains(&position_id) {
                        Err(OrderError::AlreadyClosed(position_id))
                    } else {
                        Err(OrderError::PositionNotFound(position_id))
                    };
                }
            }
        };

        // A new attempt number (and so a new key) is only taken once the
        // previous attempt had a definitive outcome. Exhausted transient
        // retries keep the number, so the next close call replays the same
        // key and the venue dedups a fill whose response was lost.
        let attempt = {
            let mut attempts = self.close_attempts.lock().unwrap_or_else(|p| p.into_inner());
            let counter = attempts.entry(position_id).or_insert(0);
            *counter += 1;
            *counter
        };
        let key = format!("{}:close:{}", position_id, attempt);

        let request = OrderRequest {
            symbol: position.symbol.clone(),
            side: crate::domain::trading::OrderSide::from(position.side).flipped(),
            quantity: position.size,
            order_type: OrderType::Market,
            price: None,
            leverage: position.leverage,
            stop_loss: None,
            take_profit: None,
            reduce_only: true,
            client_order_id: key,
        };

        let ack = match self.submit_with_retry(&position.exchange_id, &request).await {
            Ok(ack) => ack,
            Err(e) => {
                if e.is_transient() {
                    let mut attempts =
                        self.close_attempts.lock().unwrap_or_else(|p| p.into_inner());
                    if let Some(counter) = attempts.get_mut(&position_id) {
                        *counter -= 1;
                    }
                }
                self.emit_order_failed(&position.symbol, &position.exchange_id, &e).await;
                return Err(e);
            }
        };

        if ack.filled_quantity.is_zero() {
            let error = OrderError::Rejected {
                reason: "close order did not fill".to_string(),
            };
            self.emit_order_failed(&position.symbol, &position.exchange_id, &error).await;
            return Err(error);
        }

        let exit_price = if ack.average_fill_price > Decimal::ZERO {
            ack.average_fill_price
        } else {
            exit_hint.unwrap_or(position.current_price)
        };

        if ack.filled_quantity < position.size {
            // Partial close: the residual keeps the id and SL/TP; the
            // closed chunk's PnL is realized immediately.
            let closed_quantity = ack.filled_quantity;
            let realized = (exit_price - position.entry_price)
                * closed_quantity
                * position.side.sign()
                - ack.fee;

            {
                let mut positions = self.positions.write().await;
                if let Some(live) = positions.get_mut(&position_id) {
                    live.reduce(closed_quantity);
                }
            }
            self.record_realized(realized).await;

            warn!(
                "OrderManager: partial close on {} ({} of {}), residual {}",
                position.symbol,
                closed_quantity,
                position.size,
                position.size - closed_quantity
            );
            return Ok(CloseOutcome::Residual {
                position_id,
                closed_quantity,
                realized_pnl: realized,
                remaining: position.size - closed_quantity,
            });
        }

        // Full close: remove first so no tick can act on it again, then emit
        // the single terminal event.
        let position = {
            let mut positions = self.positions.write().await;
            match positions.remove(&position_id) {
                Some(p) => p,
                None => return Err(OrderError::AlreadyClosed(position_id)),
            }
        };
        self.closed_ids.write().await.insert(position_id);
        self.close_attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&position_id);

        let record = position.into_record(exit_price, reason, ack.fee);
        self.record_realized(record.realized_pnl).await;

        if let Err(e) = self.sink.append(&record).await {
            error!("OrderManager: trade record sink append failed: {}", e);
        }

        info!(
            "OrderManager: closed {} ({}) pnl {} (id {})",
            record.symbol, record.exit_reason, record.realized_pnl, position_id
        );
        self.event_bus
            .publish(TradingEvent::PositionClosed(record.clone()))
            .await;

        Ok(CloseOutcome::Closed(record))
    }

    async fn record_realized(&self, realized_pnl: Decimal) {
        let state_snapshot = {
            let mut state = self.risk_state.write().await;
            state.record_close(realized_pnl);
            state.clone()
        };
        let unrealized = self.total_unrealized().await;
        if let Some(message) = self.breaker.check_daily_loss(&state_snapshot, unrealized) {
            self.event_bus
                .publish(TradingEvent::CircuitBreaker { reason: message })
                .await;
        }
    }

    /// Apply a price tick: recompute PnL for every position on the symbol
    /// and close any whose SL/TP the tick breached. Holding the symbol lock
    /// across check-and-close makes the pair atomic.
    pub async fn on_price_tick(&self, symbol: &str, price: Decimal) {
        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().await;

        let mut breached: Vec<(Uuid, ExitReason)> = Vec::new();
        {
            let mut positions = self.positions.write().await;
            for position in positions.values_mut().filter(|p| p.symbol == symbol) {
                let suspended = position.protections_suspended;
                position.update_price(price);
                if suspended {
                    // First tick after rediscovery only re-arms protections.
                    continue;
                }
                if position.stop_loss_breached(price) {
                    breached.push((position.id, ExitReason::StopLoss));
                } else if position.take_profit_breached(price) {
                    breached.push((position.id, ExitReason::TakeProfit));
                }
            }
        }

        for (id, reason) in breached {
            debug!("OrderManager: {} breach on {} ({})", reason, symbol, id);
            if let Err(e) = self.close_locked(id, reason, Some(price)).await {
                error!("OrderManager: protective close failed for {}: {}", id, e);
            }
        }
    }

    /// Rebuild positions reported by an exchange at startup. Entry time is
    /// unknown, so it restarts now; SL/TP stay suspended until a tick lands.
    pub async fn rediscover(&self, exchange_id: &str, infos: Vec<PositionInfo>) {
        let mut positions = self.positions.write().await;
        for info in infos {
            let mut position = Position::open(
                info.symbol.clone(),
                exchange_id,
                info.side,
                info.quantity,
                info.entry_price,
                info.leverage,
                None,
                None,
                Decimal::ZERO,
            );
            position.protections_suspended = true;
            position.unrealized_pnl = info.unrealized_pnl;
            info!(
                "OrderManager: rediscovered {} {} {} on {} (id {})",
                info.symbol, info.side, info.quantity, exchange_id, position.id
            );
            positions.insert(position.id, position);
        }
    }

    /// Consume the merged tick stream until shutdown.
    pub async fn run_tick_pump(
        self: Arc<Self>,
        mut ticks: tokio::sync::mpsc::Receiver<Tick>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("OrderManager: tick pump started");
        loop {
            tokio::select! {
                tick = ticks.recv() => {
                    match tick {
                        Some(tick) => self.on_price_tick(&tick.symbol, tick.price).await,
                        None => {
                            warn!("OrderManager: tick stream ended");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("OrderManager: tick pump stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn emit_order_failed(&self, symbol: &str, exchange_id: &str, error: &OrderError) {
        self.event_bus
            .publish(TradingEvent::OrderFailed {
                symbol: symbol.to_string(),
                exchange_id: exchange_id.to_string(),
                reason: error.to_string(),
            })
            .await;
    }
}
