//! Prometheus metrics definitions for the trading engine.
//!
//! All metrics use the `neurotrade_` prefix. The registry is push-based:
//! one periodic emitter mirrors engine state into it; no HTTP exporter
//! lives in the core.

use prometheus::{
    Gauge, GaugeVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct EngineMetrics {
    registry: Arc<Registry>,
    /// Total account balance in quote currency, per exchange
    pub balance_total: GenericGaugeVec<AtomicF64>,
    /// Number of open positions
    pub positions_count: GenericGauge<AtomicF64>,
    /// Daily P&L in quote currency
    pub daily_pnl: GenericGauge<AtomicF64>,
    /// Trading cycles executed since start
    pub cycles_executed: GenericGauge<AtomicF64>,
    /// Predictions processed since start
    pub predictions_processed: GenericGauge<AtomicF64>,
    /// Entry trades executed since start
    pub trades_executed: GenericGauge<AtomicF64>,
    /// Entries skipped by gates since start
    pub trades_skipped: GenericGauge<AtomicF64>,
    /// Mean decision-cycle latency in milliseconds
    pub average_cycle_ms: GenericGauge<AtomicF64>,
    /// Circuit breaker status (0=armed, 1=tripped)
    pub circuit_breaker_status: GenericGauge<AtomicF64>,
    /// EWMA exchange call latency in ms, per exchange and endpoint
    pub exchange_latency_ewma_ms: GenericGaugeVec<AtomicF64>,
    /// Reconciliation drift per exchange and kind (balance/position)
    pub sync_drift: GenericGaugeVec<AtomicF64>,
    /// Arbitrage opportunities detected since start
    pub arbitrage_opportunities: GenericGauge<AtomicF64>,
    /// Current win rate (0-1)
    pub win_rate: GenericGauge<AtomicF64>,
}

impl EngineMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let balance_total = GaugeVec::new(
            Opts::new(
                "neurotrade_balance_total",
                "Total account balance in quote currency",
            ),
            &["exchange"],
        )?;
        registry.register(Box::new(balance_total.clone()))?;

        let positions_count = Gauge::with_opts(Opts::new(
            "neurotrade_positions_count",
            "Number of open positions",
        ))?;
        registry.register(Box::new(positions_count.clone()))?;

        let daily_pnl = Gauge::with_opts(Opts::new(
            "neurotrade_daily_pnl",
            "Daily P&L in quote currency",
        ))?;
        registry.register(Box::new(daily_pnl.clone()))?;

        let cycles_executed = Gauge::with_opts(Opts::new(
            "neurotrade_cycles_executed",
            "Trading cycles executed since start",
        ))?;
        registry.register(Box::new(cycles_executed.clone()))?;

        let predictions_processed = Gauge::with_opts(Opts::new(
            "neurotrade_predictions_processed",
            "Predictions processed since start",
        ))?;
        registry.register(Box::new(predictions_processed.clone()))?;

        let trades_executed = Gauge::with_opts(Opts::new(
            "neurotrade_trades_executed",
            "Entry trades executed since start",
        ))?;
        registry.register(Box::new(trades_executed.clone()))?;

        let trades_skipped = Gauge::with_opts(Opts::new(
            "neurotrade_trades_skipped",
            "Entries skipped by gates since start",
        ))?;
        registry.register(Box::new(trades_skipped.clone()))?;

        let average_cycle_ms = Gauge::with_opts(Opts::new(
            "neurotrade_average_cycle_ms",
            "Mean decision-cycle latency in milliseconds",
        ))?;
        registry.register(Box::new(average_cycle_ms.clone()))?;

        let circuit_breaker_status = Gauge::with_opts(Opts::new(
            "neurotrade_circuit_breaker_status",
            "Circuit breaker status (0=armed, 1=tripped)",
        ))?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let exchange_latency_ewma_ms = GaugeVec::new(
            Opts::new(
                "neurotrade_exchange_latency_ewma_ms",
                "EWMA exchange call latency in ms",
            ),
            &["exchange", "endpoint"],
        )?;
        registry.register(Box::new(exchange_latency_ewma_ms.clone()))?;

        let sync_drift = GaugeVec::new(
            Opts::new("neurotrade_sync_drift", "Reconciliation drift"),
            &["exchange", "kind"],
        )?;
        registry.register(Box::new(sync_drift.clone()))?;

        let arbitrage_opportunities = Gauge::with_opts(Opts::new(
            "neurotrade_arbitrage_opportunities",
            "Arbitrage opportunities detected since start",
        ))?;
        registry.register(Box::new(arbitrage_opportunities.clone()))?;

        let win_rate = Gauge::with_opts(Opts::new("neurotrade_win_rate", "Current win rate"))?;
        registry.register(Box::new(win_rate.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            balance_total,
            positions_count,
            daily_pnl,
            cycles_executed,
            predictions_processed,
            trades_executed,
            trades_skipped,
            average_cycle_ms,
            circuit_breaker_status,
            exchange_latency_ewma_ms,
            sync_drift,
            arbitrage_opportunities,
            win_rate,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}
