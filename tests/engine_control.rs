//! Control-channel round trips against a fully assembled paper engine.

use neurotrade::application::system::Supervisor;
use neurotrade::config::{Config, ExchangeConfig, RiskEnvConfig};
use neurotrade::domain::commands::{EngineCommand, TradingMode};
use neurotrade::domain::ports::{
    ExchangeClient, MarketDataSource, NullTradeRecordSink, Predictor,
};
use neurotrade::infrastructure::event_bus::EventBus;
use neurotrade::infrastructure::mock::{
    MockExchangeClient, MockMarketDataSource, MockPredictor,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

fn paper_config() -> Config {
    Config {
        mode: TradingMode::Paper,
        symbols: vec!["BTC/USDT".to_string()],
        exchanges: vec![ExchangeConfig::mock("mock")],
        min_confidence_to_trade: 0.65,
        cooldown_between_trades_s: 0,
        opposite_exit_threshold: 0.7,
        low_conf_exit_threshold: 0.3,
        max_position_duration_s: 86400,
        allow_high_volatility: false,
        risk: RiskEnvConfig::defaults_for(TradingMode::Paper),
        min_fill_fraction: Decimal::new(95, 2),
        max_timeout_ms: 5000,
        arbitrage_enabled: false,
        arbitrage_poll_interval_s: 5,
        arbitrage_min_spread_pct: Decimal::new(15, 4),
        arbitrage_max_notional: Decimal::from(1000),
        arbitrage_slippage_reserve_pct: Decimal::new(5, 4),
        sync_interval_s: 3600,
        sync_balance_drift_threshold: Decimal::from(10),
        sync_price_drift_threshold: 0.01,
        sync_desync_pause_s: 300,
        latency_cache_ttl_ms: 500,
        latency_book_staleness_ms: 2000,
        latency_benchmark_interval_s: 0,
        hft_poll_hz: 10,
        metrics_interval_s: 3600,
        calibration_path: String::new(),
    }
}

struct Engine {
    _exchange: Arc<MockExchangeClient>,
    commands: mpsc::Sender<EngineCommand>,
    handle: tokio::task::JoinHandle<()>,
}

async fn start_engine() -> Engine {
    let exchange = Arc::new(MockExchangeClient::new("mock", dec!(10000)));
    exchange.set_price("BTC/USDT", dec!(50000)).await;

    let market_data = Arc::new(MockMarketDataSource::new());
    market_data.seed_flat_series("BTC/USDT", dec!(50000), 120);

    let supervisor = Supervisor::new(
        paper_config(),
        vec![exchange.clone() as Arc<dyn ExchangeClient>],
        market_data as Arc<dyn MarketDataSource>,
        Arc::new(MockPredictor::new()) as Arc<dyn Predictor>,
        Arc::new(NullTradeRecordSink),
        EventBus::new(),
    )
    .await
    .expect("supervisor construction");

    let (commands, command_rx) = mpsc::channel(16);
    let handle = tokio::spawn(async move {
        supervisor.run(command_rx).await.expect("engine run");
    });

    Engine {
        _exchange: exchange,
        commands,
        handle,
    }
}

async fn request<T, F>(commands: &mpsc::Sender<EngineCommand>, build: F) -> T
where
    F: FnOnce(neurotrade::domain::commands::Reply<T>) -> EngineCommand,
{
    let (reply, rx) = oneshot::channel();
    commands.send(build(reply)).await.expect("command send");
    rx.await.expect("reply").expect("command ok")
}

#[tokio::test]
async fn test_status_reflects_start_and_stop() {
    let engine = start_engine().await;

    let status = request(&engine.commands, |reply| EngineCommand::RequestStatus {
        reply,
    })
    .await;
    assert!(!status.running);
    assert_eq!(status.mode, TradingMode::Paper);
    assert_eq!(status.symbols, vec!["BTC/USDT".to_string()]);
    assert_eq!(status.open_positions, 0);
    assert_eq!(status.exchanges.len(), 1);
    assert!(status.exchanges[0].connected);

    request(&engine.commands, |reply| EngineCommand::Start { reply }).await;
    let status = request(&engine.commands, |reply| EngineCommand::RequestStatus {
        reply,
    })
    .await;
    assert!(status.running);

    request(&engine.commands, |reply| EngineCommand::Stop { reply }).await;
    let status = request(&engine.commands, |reply| EngineCommand::RequestStatus {
        reply,
    })
    .await;
    assert!(!status.running);

    request(&engine.commands, |reply| EngineCommand::Shutdown { reply }).await;
    let _ = engine.handle.await;
}

#[tokio::test]
async fn test_emergency_stop_trips_and_reset_clears() {
    let engine = start_engine().await;

    request(&engine.commands, |reply| EngineCommand::EmergencyStop {
        reply,
    })
    .await;
    let status = request(&engine.commands, |reply| EngineCommand::RequestStatus {
        reply,
    })
    .await;
    assert!(status.circuit_breaker_tripped);

    request(&engine.commands, |reply| EngineCommand::ResetCircuitBreaker {
        reply,
    })
    .await;
    let status = request(&engine.commands, |reply| EngineCommand::RequestStatus {
        reply,
    })
    .await;
    assert!(!status.circuit_breaker_tripped);

    request(&engine.commands, |reply| EngineCommand::Shutdown { reply }).await;
    let _ = engine.handle.await;
}

#[tokio::test]
async fn test_set_symbols_validation() {
    let engine = start_engine().await;

    // Empty list rejected
    let (reply, rx) = oneshot::channel();
    engine
        .commands
        .send(EngineCommand::SetSymbols {
            symbols: vec![],
            reply,
        })
        .await
        .unwrap();
    assert!(rx.await.unwrap().is_err());

    // Valid list accepted and visible in status
    request(&engine.commands, |reply| EngineCommand::SetSymbols {
        symbols: vec!["ETH/USDT".to_string()],
        reply,
    })
    .await;
    let status = request(&engine.commands, |reply| EngineCommand::RequestStatus {
        reply,
    })
    .await;
    assert_eq!(status.symbols, vec!["ETH/USDT".to_string()]);

    request(&engine.commands, |reply| EngineCommand::Shutdown { reply }).await;
    let _ = engine.handle.await;
}

#[tokio::test]
async fn test_set_leverage_bounds() {
    let engine = start_engine().await;

    request(&engine.commands, |reply| EngineCommand::SetLeverage {
        symbol: "BTC/USDT".to_string(),
        leverage: 30, // paper max
        reply,
    })
    .await;

    let (reply, rx) = oneshot::channel();
    engine
        .commands
        .send(EngineCommand::SetLeverage {
            symbol: "BTC/USDT".to_string(),
            leverage: 31,
            reply,
        })
        .await
        .unwrap();
    assert!(rx.await.unwrap().is_err());

    request(&engine.commands, |reply| EngineCommand::Shutdown { reply }).await;
    let _ = engine.handle.await;
}

#[tokio::test]
async fn test_close_unknown_position_rejected() {
    let engine = start_engine().await;

    let (reply, rx) = oneshot::channel();
    engine
        .commands
        .send(EngineCommand::ClosePosition {
            position_id: uuid::Uuid::new_v4(),
            reply,
        })
        .await
        .unwrap();
    assert!(rx.await.unwrap().is_err());

    request(&engine.commands, |reply| EngineCommand::Shutdown { reply }).await;
    let _ = engine.handle.await;
}

#[tokio::test]
async fn test_rediscovery_rebuilds_positions_on_startup() {
    use neurotrade::domain::trading::{PositionInfo, Side};

    let exchange = Arc::new(MockExchangeClient::new("mock", dec!(10000)));
    exchange.set_price("BTC/USDT", dec!(50000)).await;
    exchange.set_positions(vec![PositionInfo {
        symbol: "BTC/USDT".to_string(),
        side: Side::Long,
        quantity: dec!(0.1),
        entry_price: dec!(49000),
        leverage: 5,
        unrealized_pnl: dec!(100),
    }]);

    let market_data = Arc::new(MockMarketDataSource::new());
    market_data.seed_flat_series("BTC/USDT", dec!(50000), 120);

    let supervisor = Supervisor::new(
        paper_config(),
        vec![exchange.clone() as Arc<dyn ExchangeClient>],
        market_data as Arc<dyn MarketDataSource>,
        Arc::new(MockPredictor::new()) as Arc<dyn Predictor>,
        Arc::new(NullTradeRecordSink),
        EventBus::new(),
    )
    .await
    .unwrap();

    let (commands, command_rx) = mpsc::channel(16);
    let handle = tokio::spawn(async move {
        supervisor.run(command_rx).await.unwrap();
    });

    // Give startup reconcile a moment
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let positions = request(&commands, |reply| EngineCommand::RequestPositions {
        reply,
    })
    .await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].symbol, "BTC/USDT");
    assert!(positions[0].protections_suspended);

    let (reply, rx) = oneshot::channel();
    commands
        .send(EngineCommand::Shutdown { reply })
        .await
        .unwrap();
    let _ = rx.await;
    let _ = handle.await;
}
