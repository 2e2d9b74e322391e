use crate::application::latency::LatencyOptimizer;
use crate::application::orders::{CloseOutcome, OrderManager};
use crate::application::risk_management::CircuitBreakerService;
use crate::application::sync::SyncBoard;
use crate::application::trading::ExecutionStats;
use crate::application::exchange::ExchangeRouter;
use crate::domain::events::{ArbitrageOpportunity, TradingEvent};
use crate::domain::market::OrderBookSnapshot;
use crate::domain::risk::RiskDecision;
use crate::domain::trading::{ExitReason, PositionOrigin, Side};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArbitrageConfig {
    /// Execution path switch; scanning and events run regardless.
    pub execution_enabled: bool,
    pub poll_interval_s: u64,
    pub min_spread_pct: Decimal,
    pub max_notional: Decimal,
    pub slippage_reserve_pct: Decimal,
    pub opportunity_ttl_s: i64,
    pub symbols: Vec<String>,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            execution_enabled: false,
            poll_interval_s: 5,
            min_spread_pct: rust_decimal_macros::dec!(0.0015),
            max_notional: rust_decimal_macros::dec!(1000),
            slippage_reserve_pct: rust_decimal_macros::dec!(0.0005),
            opportunity_ttl_s: 10,
            symbols: Vec::new(),
        }
    }
}

struct LegPair {
    symbol: String,
    buy_exchange: String,
    sell_exchange: String,
    buy_position: Uuid,
    sell_position: Uuid,
}

/// Cross-exchange spread scanner. Emits opportunities whose net edge
/// (after both legs' fees and a slippage reserve) clears the minimum;
/// optionally executes both legs under the sync constraint.
pub struct ArbitrageDetector {
    router: Arc<ExchangeRouter>,
    optimizer: Arc<LatencyOptimizer>,
    order_manager: Arc<OrderManager>,
    sync_board: Arc<SyncBoard>,
    breaker: Arc<CircuitBreakerService>,
    event_bus: EventBus,
    stats: Arc<ExecutionStats>,
    config: ArbitrageConfig,
    open_pairs: tokio::sync::Mutex<Vec<LegPair>>,
}

impl ArbitrageDetector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<ExchangeRouter>,
        optimizer: Arc<LatencyOptimizer>,
        order_manager: Arc<OrderManager>,
        sync_board: Arc<SyncBoard>,
        breaker: Arc<CircuitBreakerService>,
        event_bus: EventBus,
        stats: Arc<ExecutionStats>,
        config: ArbitrageConfig,
    ) -> Self {
        Self {
            router,
            optimizer,
            order_manager,
            sync_board,
            breaker,
            event_bus,
            stats,
            config,
            open_pairs: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "ArbitrageDetector started ({} symbols, every {}s, execution {})",
            self.config.symbols.len(),
            self.config.poll_interval_s,
            if self.config.execution_enabled { "on" } else { "off" }
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_s));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for symbol in self.config.symbols.clone() {
                        self.scan_symbol(&symbol).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ArbitrageDetector: shutdown requested, stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One scan pass for a symbol: detect, emit, maybe execute, and close
    /// converged leg pairs.
    pub async fn scan_symbol(&self, symbol: &str) {
        let books = self.optimizer.books_across_exchanges(symbol).await;
        if books.len() < 2 {
            self.close_converged(symbol, &books).await;
            return;
        }

        let Some(opportunity) = self.best_opportunity(symbol, &books) else {
            self.close_converged(symbol, &books).await;
            return;
        };

        info!(
            "ArbitrageDetector: {} buy {}@{} sell {}@{} net {}%",
            symbol,
            opportunity.buy_exchange,
            opportunity.buy_price,
            opportunity.sell_exchange,
            opportunity.sell_price,
            opportunity.spread_pct * rust_decimal_macros::dec!(100)
        );
        self.stats.record_arbitrage_opportunity();
        self.event_bus
            .publish(TradingEvent::ArbitrageOpportunity(opportunity.clone()))
            .await;

        if self.config.execution_enabled && !self.breaker.is_tripped() {
            self.execute(&opportunity).await;
        }
    }

    /// Best net-positive dislocation over all ordered venue pairs, or None.
    fn best_opportunity(
        &self,
        symbol: &str,
        books: &[Arc<OrderBookSnapshot>],
    ) -> Option<ArbitrageOpportunity> {
        let mut best: Option<ArbitrageOpportunity> = None;

        for buy_book in books {
            for sell_book in books {
                if buy_book.exchange_id == sell_book.exchange_id {
                    continue;
                }
                let (Some(ask), Some(bid)) = (buy_book.best_ask(), sell_book.best_bid()) else {
                    continue;
                };
                if ask <= Decimal::ZERO || bid <= ask {
                    continue;
                }

                let spread_pct = (bid - ask) / ask;
                // One trade per venue is half of each venue's round trip.
                let fees_pct = (self.router.round_trip_fee_pct(&buy_book.exchange_id)
                    + self.router.round_trip_fee_pct(&sell_book.exchange_id))
                    / Decimal::TWO;
                let net_pct = spread_pct - fees_pct - self.config.slippage_reserve_pct;
                if net_pct <= self.config.min_spread_pct {
                    continue;
                }

                let size = self.config.max_notional / ask;
                let candidate = ArbitrageOpportunity {
                    symbol: symbol.to_string(),
                    buy_exchange: buy_book.exchange_id.clone(),
                    sell_exchange: sell_book.exchange_id.clone(),
                    buy_price: ask,
                    sell_price: bid,
                    spread_pct: net_pct,
                    estimated_profit: size * ask * net_pct,
                    expires_at: Utc::now() + chrono::Duration::seconds(self.config.opportunity_ttl_s),
                };

                if best
                    .as_ref()
                    .map(|b| candidate.spread_pct > b.spread_pct)
                    .unwrap_or(true)
                {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    /// Execute both legs. Both submissions start before either response is
    /// awaited; a half-filled pair rolls back the filled leg at market.
    async fn execute(&self, opportunity: &ArbitrageOpportunity) {
        if !self.sync_board.is_synced(&opportunity.buy_exchange)
            || !self.sync_board.is_synced(&opportunity.sell_exchange)
        {
            debug!(
                "ArbitrageDetector: {} skipped, venue out of sync",
                opportunity.symbol
            );
            return;
        }

        let Some(size) = self.executable_size(opportunity).await else {
            debug!(
                "ArbitrageDetector: {} skipped, no executable size",
                opportunity.symbol
            );
            return;
        };

        let buy_decision =
            RiskDecision::approved(size, 1, Decimal::ZERO, Decimal::ZERO);
        let sell_decision =
            RiskDecision::approved(size, 1, Decimal::ZERO, Decimal::ZERO);

        // Hedge concurrency: join both legs, ordering across venues unordered.
        let (buy_result, sell_result) = tokio::join!(
            self.order_manager.open_position(
                &opportunity.symbol,
                Some(&opportunity.buy_exchange),
                Side::Long,
                &buy_decision,
                opportunity.buy_price,
                PositionOrigin::ArbitrageLeg,
            ),
            self.order_manager.open_position(
                &opportunity.symbol,
                Some(&opportunity.sell_exchange),
                Side::Short,
                &sell_decision,
                opportunity.sell_price,
                PositionOrigin::ArbitrageLeg,
            ),
        );

        match (buy_result, sell_result) {
            (Ok(buy_leg), Ok(sell_leg)) => {
                let realized_edge = size * opportunity.buy_price * opportunity.spread_pct;
                info!(
                    "ArbitrageDetector: executed {} size {} (est profit {})",
                    opportunity.symbol, size, realized_edge
                );
                self.open_pairs.lock().await.push(LegPair {
                    symbol: opportunity.symbol.clone(),
                    buy_exchange: opportunity.buy_exchange.clone(),
                    sell_exchange: opportunity.sell_exchange.clone(),
                    buy_position: buy_leg.id,
                    sell_position: sell_leg.id,
                });
                self.event_bus
                    .publish(TradingEvent::ArbitrageExecuted {
                        opportunity: opportunity.clone(),
                        executed_size: size,
                        realized_profit: realized_edge,
                    })
                    .await;
            }
            (Ok(filled), Err(e)) | (Err(e), Ok(filled)) => {
                warn!(
                    "ArbitrageDetector: one leg failed for {} ({}), rolling back filled leg",
                    opportunity.symbol, e
                );
                if let Err(rollback_err) = self
                    .order_manager
                    .close_position(filled.id, ExitReason::ArbitrageLegFailed)
                    .await
                {
                    error!(
                        "ArbitrageDetector: rollback failed for {}: {}",
                        filled.id, rollback_err
                    );
                }
            }
            (Err(buy_err), Err(sell_err)) => {
                warn!(
                    "ArbitrageDetector: both legs failed for {}: {} / {}",
                    opportunity.symbol, buy_err, sell_err
                );
            }
        }
    }

    /// Leg size: bounded by the configured notional and by the free quote
    /// on both venues at the respective prices.
    async fn executable_size(&self, opportunity: &ArbitrageOpportunity) -> Option<Decimal> {
        let buy_account = self
            .router
            .account_snapshot(&opportunity.buy_exchange)
            .await
            .ok()?;
        let sell_account = self
            .router
            .account_snapshot(&opportunity.sell_exchange)
            .await
            .ok()?;

        let by_notional = self.config.max_notional / opportunity.buy_price;
        let by_buy_balance = buy_account.balance_free / opportunity.buy_price;
        let by_sell_balance = sell_account.balance_free / opportunity.sell_price;

        let size = by_notional.min(by_buy_balance).min(by_sell_balance).round_dp(8);
        (size > Decimal::ZERO).then_some(size)
    }

    /// Close leg pairs whose spread has converged (sell-venue bid no longer
    /// above buy-venue ask).
    async fn close_converged(&self, symbol: &str, books: &[Arc<OrderBookSnapshot>]) {
        let mut pairs = self.open_pairs.lock().await;
        if pairs.is_empty() {
            return;
        }

        let mut remaining = Vec::new();
        for pair in pairs.drain(..) {
            if pair.symbol != symbol {
                remaining.push(pair);
                continue;
            }
            let buy_ask = books
                .iter()
                .find(|b| b.exchange_id == pair.buy_exchange)
                .and_then(|b| b.best_ask());
            let sell_bid = books
                .iter()
                .find(|b| b.exchange_id == pair.sell_exchange)
                .and_then(|b| b.best_bid());

            let converged = match (buy_ask, sell_bid) {
                (Some(ask), Some(bid)) => bid <= ask,
                _ => false,
            };
            if !converged {
                remaining.push(pair);
                continue;
            }

            info!("ArbitrageDetector: spread converged on {}, unwinding pair", symbol);
            for id in [pair.buy_position, pair.sell_position] {
                match self.order_manager.close_position(id, ExitReason::Manual).await {
                    Ok(CloseOutcome::Closed(record)) => {
                        debug!(
                            "ArbitrageDetector: leg {} closed, pnl {}",
                            id, record.realized_pnl
                        );
                    }
                    Ok(CloseOutcome::Residual { remaining, .. }) => {
                        warn!("ArbitrageDetector: leg {} left residual {}", id, remaining);
                    }
                    Err(e) => error!("ArbitrageDetector: leg close failed for {}: {}", id, e),
                }
            }
        }
        *pairs = remaining;
    }

    #[cfg(test)]
    pub async fn open_pair_count(&self) -> usize {
        self.open_pairs.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::latency::LatencyTable;
    use crate::domain::ports::{ExchangeClient, NullTradeRecordSink};
    use crate::domain::risk::RiskState;
    use crate::infrastructure::mock::MockExchangeClient;
    use rust_decimal_macros::dec;
    use tokio::sync::RwLock;

    struct Harness {
        cheap: Arc<MockExchangeClient>,
        rich: Arc<MockExchangeClient>,
        detector: Arc<ArbitrageDetector>,
        order_manager: Arc<OrderManager>,
    }

    async fn harness(execution_enabled: bool) -> Harness {
        // "cheap" quotes ~100, "rich" quotes ~100.40: a 0.4% dislocation
        let cheap = Arc::new(MockExchangeClient::new("cheap", dec!(10000)).with_fee(dec!(0.001)));
        let rich = Arc::new(MockExchangeClient::new("rich", dec!(10000)).with_fee(dec!(0.001)));
        cheap.set_price("SOL/USDT", dec!(100)).await;
        rich.set_price("SOL/USDT", dec!(100.40)).await;
        // Tight books so the mock spread stays below the dislocation
        cheap.set_book_spread_pct(dec!(0.0001));
        rich.set_book_spread_pct(dec!(0.0001));

        let router = Arc::new(ExchangeRouter::new(
            vec![
                cheap.clone() as Arc<dyn ExchangeClient>,
                rich.clone() as Arc<dyn ExchangeClient>,
            ],
            Arc::new(LatencyTable::new()),
            2000,
        ));
        router.refresh_account("cheap").await.unwrap();
        router.refresh_account("rich").await.unwrap();

        let optimizer = Arc::new(LatencyOptimizer::new(router.clone(), 500));
        let board = Arc::new(SyncBoard::new(&router.exchange_ids()));
        let breaker = Arc::new(CircuitBreakerService::new(0.05));
        let order_manager = Arc::new(OrderManager::new(
            router.clone(),
            EventBus::new(),
            Arc::new(RwLock::new(RiskState::default())),
            breaker.clone(),
            Arc::new(NullTradeRecordSink),
            dec!(0.95),
        ));

        let config = ArbitrageConfig {
            execution_enabled,
            symbols: vec!["SOL/USDT".to_string()],
            max_notional: dec!(500),
            ..ArbitrageConfig::default()
        };
        let detector = Arc::new(ArbitrageDetector::new(
            router,
            optimizer,
            order_manager.clone(),
            board,
            breaker,
            EventBus::new(),
            Arc::new(ExecutionStats::new()),
            config,
        ));
        Harness {
            cheap,
            rich,
            detector,
            order_manager,
        }
    }

    #[tokio::test]
    async fn test_detects_dislocation_net_of_fees() {
        let h = harness(false).await;
        let books = h.detector.optimizer.books_across_exchanges("SOL/USDT").await;
        let opportunity = h.detector.best_opportunity("SOL/USDT", &books).unwrap();

        assert_eq!(opportunity.buy_exchange, "cheap");
        assert_eq!(opportunity.sell_exchange, "rich");
        // Gross ~0.4%, fees 0.1%, slippage 0.05% -> net ~0.25%
        assert!(opportunity.spread_pct > dec!(0.002));
        assert!(opportunity.spread_pct < dec!(0.003));
        assert!(opportunity.estimated_profit > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_no_opportunity_when_spread_too_thin() {
        let h = harness(false).await;
        h.rich.set_price("SOL/USDT", dec!(100.05)).await;
        let books = h.detector.optimizer.books_across_exchanges("SOL/USDT").await;
        assert!(h.detector.best_opportunity("SOL/USDT", &books).is_none());
    }

    #[tokio::test]
    async fn test_execution_opens_both_legs() {
        let h = harness(true).await;
        h.detector.scan_symbol("SOL/USDT").await;

        let positions = h.order_manager.list_positions().await;
        assert_eq!(positions.len(), 2);
        assert!(positions.iter().any(|p| p.side == Side::Long
            && p.exchange_id == "cheap"
            && p.origin == PositionOrigin::ArbitrageLeg));
        assert!(positions.iter().any(|p| p.side == Side::Short && p.exchange_id == "rich"));
        assert_eq!(h.detector.open_pair_count().await, 1);
        // Directional bookkeeping unaffected by arbitrage legs
        assert_eq!(h.order_manager.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_leg_rolls_back_filled_leg() {
        let h = harness(true).await;
        h.rich.fail_next_order(crate::domain::errors::OrderError::Rejected {
            reason: "scripted".to_string(),
        });

        h.detector.scan_symbol("SOL/USDT").await;

        // Buy leg filled then rolled back; nothing remains
        assert!(h.order_manager.list_positions().await.is_empty());
        assert_eq!(h.detector.open_pair_count().await, 0);
    }

    #[tokio::test]
    async fn test_desynced_venue_blocks_execution() {
        let h = harness(true).await;
        let mut status = h.detector.sync_board.status("rich").unwrap();
        status.is_synced = false;
        h.detector.sync_board.update("rich", status);

        h.detector.scan_symbol("SOL/USDT").await;
        assert!(h.order_manager.list_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_converged_spread_unwinds_pair() {
        let h = harness(true).await;
        h.detector.scan_symbol("SOL/USDT").await;
        assert_eq!(h.detector.open_pair_count().await, 1);

        // Prices converge
        h.rich.set_price("SOL/USDT", dec!(100)).await;
        h.cheap.set_price("SOL/USDT", dec!(100)).await;
        h.detector.scan_symbol("SOL/USDT").await;

        assert_eq!(h.detector.open_pair_count().await, 0);
        assert!(h.order_manager.list_positions().await.is_empty());
    }
}
