//! In-memory fakes for paper trading and tests: a fill-at-mark exchange, a
//! scriptable market data source and a scriptable predictor.

use crate::domain::errors::{OrderError, PredictionError};
use crate::domain::market::{BookLevel, Candle, OrderBookSnapshot};
use crate::domain::ports::{ExchangeClient, MarketDataSource, Predictor};
use crate::domain::prediction::RawPrediction;
use crate::domain::trading::types::{
    AssetBalance, BalanceMap, OrderAck, OrderRequest, OrderStatus, PositionInfo, Tick,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};

struct ScriptedFailure {
    error: OrderError,
    /// When set, the order executes venue-side but the response is lost:
    /// the fill is recorded under its client order id before the error.
    fill_first: bool,
}

struct MockExchangeState {
    prices: HashMap<String, Decimal>,
    balance_free: Decimal,
    balance_used: Decimal,
    positions: Vec<PositionInfo>,
    placed_orders: Vec<OrderRequest>,
    failed_submissions: Vec<OrderRequest>,
    seen_client_ids: HashMap<String, OrderAck>,
    scripted_failures: VecDeque<ScriptedFailure>,
    fill_fraction: Decimal,
    tick_subscribers: Vec<Sender<Tick>>,
    book_spread_pct: Decimal,
}

/// Exchange fake that fills market orders at the current mark price.
///
/// Scripting hooks: `set_price` publishes a tick to every stream subscriber,
/// `fail_next_order` injects one error, `fail_next_order_after_fill`
/// simulates a fill whose response never arrives, `set_fill_fraction`
/// simulates partial fills. Idempotent by client order id, like the real
/// venues.
pub struct MockExchangeClient {
    exchange_id: String,
    round_trip_fee_pct: Decimal,
    state: Mutex<MockExchangeState>,
}

impl MockExchangeClient {
    pub fn new(exchange_id: impl Into<String>, initial_balance: Decimal) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            round_trip_fee_pct: dec!(0.0008),
            state: Mutex::new(MockExchangeState {
                prices: HashMap::new(),
                balance_free: initial_balance,
                balance_used: Decimal::ZERO,
                positions: Vec::new(),
                placed_orders: Vec::new(),
                failed_submissions: Vec::new(),
                seen_client_ids: HashMap::new(),
                scripted_failures: VecDeque::new(),
                fill_fraction: Decimal::ONE,
                tick_subscribers: Vec::new(),
                book_spread_pct: dec!(0.0002),
            }),
        }
    }

    pub fn with_fee(mut self, round_trip_fee_pct: Decimal) -> Self {
        self.round_trip_fee_pct = round_trip_fee_pct;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockExchangeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Set the mark price and publish a tick to every stream subscriber.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let subscribers = {
            let mut state = self.lock();
            state.prices.insert(symbol.to_string(), price);
            state.tick_subscribers.clone()
        };
        let tick = Tick {
            symbol: symbol.to_string(),
            price,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        for tx in subscribers {
            let _ = tx.send(tick.clone()).await;
        }
    }

    pub fn set_balance(&self, free: Decimal, used: Decimal) {
        let mut state = self.lock();
        state.balance_free = free;
        state.balance_used = used;
    }

    pub fn set_positions(&self, positions: Vec<PositionInfo>) {
        self.lock().positions = positions;
    }

    pub fn fail_next_order(&self, error: OrderError) {
        self.lock().scripted_failures.push_back(ScriptedFailure {
            error,
            fill_first: false,
        });
    }

    /// The next order fills venue-side, but the caller sees `error` instead
    /// of the ack. A resubmission with the same client order id recovers
    /// the recorded fill.
    pub fn fail_next_order_after_fill(&self, error: OrderError) {
        self.lock().scripted_failures.push_back(ScriptedFailure {
            error,
            fill_first: true,
        });
    }

    /// Fraction of the requested quantity the next orders will fill.
    pub fn set_fill_fraction(&self, fraction: Decimal) {
        self.lock().fill_fraction = fraction;
    }

    pub fn set_book_spread_pct(&self, spread_pct: Decimal) {
        self.lock().book_spread_pct = spread_pct;
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.lock().placed_orders.clone()
    }

    pub fn order_count(&self) -> usize {
        self.lock().placed_orders.len()
    }

    /// Submissions that were answered with a scripted error.
    pub fn failed_submissions(&self) -> Vec<OrderRequest> {
        self.lock().failed_submissions.clone()
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn round_trip_fee_pct(&self) -> Decimal {
        self.round_trip_fee_pct
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, OrderError> {
        let mut state = self.lock();

        // Replayed client order id: return the original ack, no new fill.
        if let Some(ack) = state.seen_client_ids.get(&request.client_order_id) {
            return Ok(ack.clone());
        }

        let scripted = state.scripted_failures.pop_front();
        if let Some(scripted) = &scripted
            && !scripted.fill_first
        {
            state.failed_submissions.push(request.clone());
            return Err(scripted.error.clone());
        }

        let price = match request.price.or_else(|| state.prices.get(&request.symbol).copied()) {
            Some(p) => p,
            None => {
                return Err(OrderError::Rejected {
                    reason: format!("no mark price for {}", request.symbol),
                });
            }
        };

        let filled = (request.quantity * state.fill_fraction).round_dp(8);
        let fee = filled * price * self.round_trip_fee_pct / Decimal::TWO;
        let status = if filled.is_zero() {
            OrderStatus::Rejected
        } else if filled < request.quantity {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        };

        if !request.reduce_only {
            let margin = if request.leverage > 0 {
                filled * price / Decimal::from(request.leverage)
            } else {
                filled * price
            };
            state.balance_free -= margin;
            state.balance_used += margin;
        }

        let ack = OrderAck {
            order_id: uuid::Uuid::new_v4().to_string(),
            client_order_id: request.client_order_id.clone(),
            status,
            filled_quantity: filled,
            average_fill_price: price,
            fee,
        };
        state.placed_orders.push(request.clone());
        state
            .seen_client_ids
            .insert(request.client_order_id.clone(), ack.clone());

        if let Some(scripted) = scripted {
            // The fill stands venue-side; only the response is lost.
            state.failed_submissions.push(request.clone());
            return Err(scripted.error);
        }
        Ok(ack)
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), OrderError> {
        Ok(())
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<OrderBookSnapshot, OrderError> {
        let state = self.lock();
        let mid = state.prices.get(symbol).copied().ok_or_else(|| {
            OrderError::Rejected {
                reason: format!("no mark price for {}", symbol),
            }
        })?;
        let half_spread = mid * state.book_spread_pct / Decimal::TWO;

        let mut bids = Vec::with_capacity(depth);
        let mut asks = Vec::with_capacity(depth);
        for i in 0..depth.max(1) {
            let step = Decimal::from(i as u64) * half_spread;
            bids.push(BookLevel {
                price: mid - half_spread - step,
                quantity: Decimal::ONE,
            });
            asks.push(BookLevel {
                price: mid + half_spread + step,
                quantity: Decimal::ONE,
            });
        }

        Ok(OrderBookSnapshot {
            symbol: symbol.to_string(),
            exchange_id: self.exchange_id.clone(),
            bids,
            asks,
            timestamp: chrono::Utc::now(),
            latency_ms: 0.1,
        })
    }

    async fn fetch_balance(&self) -> Result<BalanceMap, OrderError> {
        let state = self.lock();
        let mut map = BalanceMap::new();
        map.insert(
            "USDT".to_string(),
            AssetBalance {
                free: state.balance_free,
                used: state.balance_used,
            },
        );
        Ok(map)
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>, OrderError> {
        Ok(self.lock().positions.clone())
    }

    async fn stream_ticks(&self, _symbols: &[String]) -> Result<Receiver<Tick>, OrderError> {
        let (tx, rx) = mpsc::channel(1000);
        self.lock().tick_subscribers.push(tx);
        Ok(rx)
    }
}

/// Scriptable candle/price source.
pub struct MockMarketDataSource {
    candles: Mutex<HashMap<String, Vec<Candle>>>,
    prices: Mutex<HashMap<String, Decimal>>,
}

impl MockMarketDataSource {
    pub fn new() -> Self {
        Self {
            candles: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(symbol.to_string(), candles);
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(symbol.to_string(), price);
    }

    /// Append a single closing candle to the series.
    pub fn push_candle(&self, symbol: &str, close: Decimal) {
        let mut candles = self.candles.lock().unwrap_or_else(|p| p.into_inner());
        let series = candles.entry(symbol.to_string()).or_default();
        series.push(Candle {
            symbol: symbol.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(10),
            timestamp: chrono::Utc::now().timestamp(),
        });
        if series.len() > 500 {
            let excess = series.len() - 500;
            series.drain(..excess);
        }
    }

    /// Seed `count` flat candles around `price`, enough for any lookback.
    pub fn seed_flat_series(&self, symbol: &str, price: Decimal, count: usize) {
        let now = chrono::Utc::now().timestamp();
        let candles = (0..count)
            .map(|i| Candle {
                symbol: symbol.to_string(),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: dec!(10),
                timestamp: now - ((count - i) as i64) * 60,
            })
            .collect();
        self.set_candles(symbol, candles);
        self.set_price(symbol, price);
    }
}

impl Default for MockMarketDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for MockMarketDataSource {
    async fn recent_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let candles = self.candles.lock().unwrap_or_else(|p| p.into_inner());
        let series = candles.get(symbol).cloned().unwrap_or_default();
        let start = series.len().saturating_sub(limit);
        Ok(series[start..].to_vec())
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no price for {}", symbol))
    }
}

/// Predictor fake: scripted predictions per symbol, Hold once exhausted.
/// The random mode emits plausible Buy/Sell/Hold mixes for paper demos.
pub struct MockPredictor {
    scripted: Mutex<HashMap<String, VecDeque<RawPrediction>>>,
    fail_next: Mutex<bool>,
    random_mode: bool,
}

impl MockPredictor {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(false),
            random_mode: false,
        }
    }

    pub fn with_random_signals() -> Self {
        Self {
            random_mode: true,
            ..Self::new()
        }
    }

    fn random_prediction() -> RawPrediction {
        use crate::domain::trading::Action;
        use rand::Rng;

        let mut rng = rand::rng();
        let action = match rng.random_range(0..10) {
            0..=2 => Action::Buy,
            3..=5 => Action::Sell,
            _ => Action::Hold,
        };
        let confidence: f64 = rng.random_range(0.3..0.95);
        let mut prediction = Self::hold();
        prediction.action = action;
        prediction.confidence = confidence;
        prediction.expected_return = rng.random_range(-0.01..0.03);
        prediction.uncertainty = 1.0 - confidence;
        prediction
    }

    pub fn push_prediction(&self, symbol: &str, prediction: RawPrediction) {
        self.scripted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(symbol.to_string())
            .or_default()
            .push_back(prediction);
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap_or_else(|p| p.into_inner()) = true;
    }

    pub fn hold() -> RawPrediction {
        RawPrediction {
            action: crate::domain::trading::Action::Hold,
            confidence: 0.5,
            expected_return: 0.0,
            risk_level: 3,
            time_horizon_hours: 2.0,
            market_regime: crate::domain::market::MarketRegime::Unknown,
            action_probabilities: HashMap::new(),
            uncertainty: 0.5,
        }
    }
}

impl Default for MockPredictor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Predictor for MockPredictor {
    async fn predict(
        &self,
        symbol: &str,
        _candles: &[Candle],
        _volatility: f64,
    ) -> Result<RawPrediction, PredictionError> {
        {
            let mut fail = self.fail_next.lock().unwrap_or_else(|p| p.into_inner());
            if *fail {
                *fail = false;
                return Err(PredictionError::Model("scripted failure".to_string()));
            }
        }
        let mut scripted = self.scripted.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(prediction) = scripted.get_mut(symbol).and_then(|queue| queue.pop_front()) {
            return Ok(prediction);
        }
        Ok(if self.random_mode {
            Self::random_prediction()
        } else {
            Self::hold()
        })
    }
}

/// Drive a random-walk price simulation for paper mode: every tick the
/// mock exchange gets a new mark price and the data source a new candle.
/// Runs until the returned handle is aborted or `shutdown` flips.
pub fn spawn_price_simulation(
    exchange: std::sync::Arc<MockExchangeClient>,
    market_data: std::sync::Arc<MockMarketDataSource>,
    seeds: Vec<(String, Decimal)>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    use rand::Rng;

    tokio::spawn(async move {
        // Warm every symbol with enough history for predictions.
        let mut prices: HashMap<String, Decimal> = HashMap::new();
        for (symbol, seed) in &seeds {
            market_data.seed_flat_series(symbol, *seed, 120);
            exchange.set_price(symbol, *seed).await;
            prices.insert(symbol.clone(), *seed);
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for (symbol, price) in prices.iter_mut() {
                        // ±0.2% random walk per tick
                        let drift: f64 = rand::rng().random_range(-0.002..0.002);
                        let factor = Decimal::from_f64_retain(1.0 + drift)
                            .unwrap_or(Decimal::ONE);
                        *price = (*price * factor).round_dp(4);

                        exchange.set_price(symbol, *price).await;
                        market_data.set_price(symbol, *price);
                        market_data.push_candle(symbol, *price);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}
