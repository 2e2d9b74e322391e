//! Shared harness for integration scenarios: a fully wired engine core on
//! top of the in-memory mocks.
#![allow(dead_code)] // not every test binary uses every helper

use neurotrade::application::exchange::ExchangeRouter;
use neurotrade::application::latency::LatencyTable;
use neurotrade::application::orders::OrderManager;
use neurotrade::application::prediction::{Calibrator, PredictionGateway};
use neurotrade::application::risk_management::{CircuitBreakerService, RiskManager};
use neurotrade::application::sync::SyncBoard;
use neurotrade::application::trading::{ExecutionStats, ExecutorConfig, TradingExecutor};
use neurotrade::domain::market::MarketRegime;
use neurotrade::domain::ports::{ExchangeClient, NullTradeRecordSink};
use neurotrade::domain::prediction::RawPrediction;
use neurotrade::domain::risk::{RiskConfig, RiskState};
use neurotrade::domain::trading::Action;
use neurotrade::infrastructure::event_bus::EventBus;
use neurotrade::infrastructure::mock::{
    MockExchangeClient, MockMarketDataSource, MockPredictor,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::RwLock;

pub struct Harness {
    pub exchange: Arc<MockExchangeClient>,
    pub market_data: Arc<MockMarketDataSource>,
    pub predictor: Arc<MockPredictor>,
    pub router: Arc<ExchangeRouter>,
    pub sync_board: Arc<SyncBoard>,
    pub breaker: Arc<CircuitBreakerService>,
    pub risk_state: Arc<RwLock<RiskState>>,
    pub order_manager: Arc<OrderManager>,
    pub executor: Arc<TradingExecutor>,
    pub running: Arc<AtomicBool>,
    pub event_bus: EventBus,
}

pub async fn build_harness(executor_config: ExecutorConfig) -> Harness {
    build_harness_with(executor_config, RiskConfig::default(), dec!(1000)).await
}

pub async fn build_harness_with(
    executor_config: ExecutorConfig,
    risk_config: RiskConfig,
    initial_balance: Decimal,
) -> Harness {
    let exchange = Arc::new(MockExchangeClient::new("mock", initial_balance));
    exchange.set_price("BTC/USDT", dec!(50000)).await;

    let market_data = Arc::new(MockMarketDataSource::new());
    // Alternating closes give a ~0.5% per-candle stddev, so the sized stop
    // lands at 1% of price.
    seed_series_with_stddev(&market_data, "BTC/USDT", dec!(50000));

    let predictor = Arc::new(MockPredictor::new());

    let router = Arc::new(ExchangeRouter::new(
        vec![exchange.clone() as Arc<dyn ExchangeClient>],
        Arc::new(LatencyTable::new()),
        2000,
    ));
    router.refresh_account("mock").await.unwrap();

    let sync_board = Arc::new(SyncBoard::new(&router.exchange_ids()));
    let breaker = Arc::new(CircuitBreakerService::new(risk_config.hard_stop_pct));
    let risk_state = Arc::new(RwLock::new(RiskState::default()));
    let event_bus = EventBus::new();

    let risk_manager = Arc::new(RiskManager::new(
        risk_config,
        breaker.clone(),
        risk_state.clone(),
        market_data.clone(),
    ));
    let order_manager = Arc::new(OrderManager::new(
        router.clone(),
        event_bus.clone(),
        risk_state.clone(),
        breaker.clone(),
        Arc::new(NullTradeRecordSink),
        dec!(0.95),
    ));
    let gateway = Arc::new(PredictionGateway::new(
        market_data.clone(),
        predictor.clone(),
        Arc::new(Calibrator::new()),
    ));

    let running = Arc::new(AtomicBool::new(true));
    let permitted = Arc::new(std::sync::RwLock::new(vec!["BTC/USDT".to_string()]));
    let stats = Arc::new(ExecutionStats::new());

    let executor = Arc::new(TradingExecutor::new(
        executor_config,
        gateway,
        risk_manager,
        order_manager.clone(),
        router.clone(),
        sync_board.clone(),
        market_data.clone(),
        event_bus.clone(),
        risk_state.clone(),
        stats,
        permitted,
        running.clone(),
    ));

    Harness {
        exchange,
        market_data,
        predictor,
        router,
        sync_board,
        breaker,
        risk_state,
        order_manager,
        executor,
        running,
        event_bus,
    }
}

/// Seed candles whose log-return stddev is ~0.005 so the sizing math in the
/// happy-path scenario produces a 1% stop distance.
pub fn seed_series_with_stddev(
    market_data: &MockMarketDataSource,
    symbol: &str,
    around: Decimal,
) {
    use neurotrade::domain::market::Candle;

    let now = chrono::Utc::now().timestamp();
    let high = around * dec!(1.0025);
    let low = around * dec!(0.9975);
    let candles: Vec<Candle> = (0..120)
        .map(|i| {
            let close = if i % 2 == 0 { high } else { low };
            Candle {
                symbol: symbol.to_string(),
                open: close,
                high,
                low,
                close,
                volume: dec!(10),
                timestamp: now - ((120 - i) as i64) * 60,
            }
        })
        .collect();
    market_data.set_candles(symbol, candles);
    market_data.set_price(symbol, around);
}

pub fn buy_prediction(confidence: f64) -> RawPrediction {
    let mut prediction = MockPredictor::hold();
    prediction.action = Action::Buy;
    prediction.confidence = confidence;
    prediction.expected_return = 0.02;
    prediction.uncertainty = 0.0;
    prediction.market_regime = MarketRegime::Trending;
    prediction
}

pub fn sell_prediction(confidence: f64) -> RawPrediction {
    let mut prediction = buy_prediction(confidence);
    prediction.action = Action::Sell;
    prediction
}

pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        cooldown: std::time::Duration::ZERO,
        ..ExecutorConfig::default()
    }
}
