//! Risk-limit scenarios: circuit breakers, loss gates, leverage bounds.

mod common;

use common::{build_harness_with, buy_prediction, fast_config};
use neurotrade::application::trading::SymbolState;
use neurotrade::application::trading::executor::CycleStatus;
use neurotrade::domain::events::{EventListener, TradingEvent};
use neurotrade::domain::risk::RiskConfig;
use neurotrade::domain::trading::ExitReason;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct BreakerCounter {
    count: Arc<AtomicUsize>,
}

impl EventListener for BreakerCounter {
    fn on_event(&self, event: &TradingEvent) {
        if matches!(event, TradingEvent::CircuitBreaker { .. }) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_daily_loss_circuit_breaker_blocks_entries_until_reset() {
    // Day starts at 10000; hard stop 5% = 500
    let h = build_harness_with(fast_config(), RiskConfig::default(), dec!(10000)).await;
    h.risk_state.write().await.day_start_balance = dec!(10000);

    let breaker_events = Arc::new(AtomicUsize::new(0));
    h.event_bus
        .subscribe(Arc::new(BreakerCounter {
            count: breaker_events.clone(),
        }))
        .await;

    // A losing close worth -501 trips the breaker
    let mut state = SymbolState::new();
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.8));
    h.executor.run_cycle("BTC/USDT", &mut state).await;
    let position = h.order_manager.list_positions().await.pop().unwrap();

    // Engineer the exit price for a ~501 loss: size ~0.2 at entry 50000
    // (free balance 10000 -> risk 200 over 1% stop -> size ~0.4)
    let loss_per_unit = dec!(501) / position.size;
    let exit_price = position.entry_price - loss_per_unit - dec!(10); // fees margin
    h.exchange.set_price("BTC/USDT", exit_price).await;
    h.order_manager
        .close_position(position.id, ExitReason::StopLoss)
        .await
        .unwrap();

    assert!(h.breaker.is_tripped());
    assert_eq!(breaker_events.load(Ordering::SeqCst), 1);

    // Entries are rejected while tripped (cycle-level skip)
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.95));
    let status = h.executor.run_cycle("BTC/USDT", &mut state).await;
    assert_eq!(status, CycleStatus::Skipped);
    assert_eq!(h.order_manager.open_count().await, 0);

    // Manual clear restores trading on the next cycle
    h.breaker.clear();
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.95));
    let status = h.executor.run_cycle("BTC/USDT", &mut state).await;
    assert_eq!(status, CycleStatus::EntryTaken);
}

#[tokio::test]
async fn test_daily_trade_limit_skips_cycles() {
    let h = build_harness_with(fast_config(), RiskConfig::default(), dec!(1000)).await;
    {
        let mut risk_state = h.risk_state.write().await;
        for _ in 0..20 {
            risk_state.record_entry("BTC/USDT");
        }
    }

    let mut state = SymbolState::new();
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.9));
    let status = h.executor.run_cycle("BTC/USDT", &mut state).await;
    assert_eq!(status, CycleStatus::Skipped);
}

#[tokio::test]
async fn test_max_concurrent_positions_rejects_entry() {
    let mut config = RiskConfig::default();
    config.max_concurrent_positions = 1;
    let h = build_harness_with(fast_config(), config, dec!(1000)).await;

    let mut state = SymbolState::new();
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.8));
    assert_eq!(
        h.executor.run_cycle("BTC/USDT", &mut state).await,
        CycleStatus::EntryTaken
    );

    // A second symbol cannot open while the budget is exhausted. (The
    // harness permits only BTC, so drive the risk gate directly.)
    let mut eth_state = SymbolState::new();
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.8));
    let status = h.executor.run_cycle("BTC/USDT", &mut eth_state).await;
    // Same symbol holds rather than duplicating
    assert_eq!(status, CycleStatus::Held);
    assert_eq!(h.order_manager.open_count().await, 1);
}

#[tokio::test]
async fn test_insufficient_balance_gate() {
    let h = build_harness_with(fast_config(), RiskConfig::default(), dec!(50)).await;

    let mut state = SymbolState::new();
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.9));
    let status = h.executor.run_cycle("BTC/USDT", &mut state).await;
    assert_eq!(status, CycleStatus::EntryRejected);
    assert_eq!(h.order_manager.open_count().await, 0);
}

#[tokio::test]
async fn test_leverage_validation_bounds() {
    let mut config = RiskConfig::default();
    config.max_leverage = 30;
    config.base_leverage = 30;
    assert!(config.validate().is_ok());

    config.max_leverage = 31;
    assert!(config.validate().is_err());
}

#[tokio::test]
async fn test_pnl_consistency_on_close() {
    let h = build_harness_with(fast_config(), RiskConfig::default(), dec!(1000)).await;

    let mut state = SymbolState::new();
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.8));
    h.executor.run_cycle("BTC/USDT", &mut state).await;
    let position = h.order_manager.list_positions().await.pop().unwrap();

    h.exchange.set_price("BTC/USDT", dec!(50500)).await;
    let outcome = h
        .order_manager
        .close_position(position.id, ExitReason::Manual)
        .await
        .unwrap();

    let neurotrade::application::orders::CloseOutcome::Closed(record) = outcome else {
        panic!("expected full close");
    };
    // realized = (exit - entry) * size * sign - fees, within 1e-4
    let expected =
        (record.exit_price - record.entry_price) * record.size * Decimal::ONE - record.fees;
    assert!((record.realized_pnl - expected).abs() < dec!(0.0001));
}

#[tokio::test]
async fn test_balance_stays_consistent_through_lifecycle() {
    let h = build_harness_with(fast_config(), RiskConfig::default(), dec!(1000)).await;

    let mut state = SymbolState::new();
    h.predictor.push_prediction("BTC/USDT", buy_prediction(0.8));
    h.executor.run_cycle("BTC/USDT", &mut state).await;

    let account = h.router.refresh_account("mock").await.unwrap();
    assert!(account.is_consistent());
    // Margin moved from free to used
    assert!(account.balance_used > Decimal::ZERO);
}
