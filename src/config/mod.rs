//! Configuration for the trading engine.
//!
//! Everything loads from environment variables (via `.env` in development),
//! is validated once at startup, and stays immutable for the run. The only
//! post-start mutations allowed are the explicit control-channel commands
//! (`SetSymbols`, `SetLeverage`).

mod exchange_config;
mod risk_env_config;

pub use exchange_config::{ExchangeConfig, ExchangeKind};
pub use risk_env_config::RiskEnvConfig;

use crate::application::arbitrage::ArbitrageConfig;
use crate::application::sync::SyncConfig;
use crate::application::trading::ExecutorConfig;
use crate::domain::commands::TradingMode;
use crate::domain::risk::RiskConfig;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Aggregated engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: TradingMode,
    pub symbols: Vec<String>,
    pub exchanges: Vec<ExchangeConfig>,

    // Entry/exit behavior
    pub min_confidence_to_trade: f64,
    pub cooldown_between_trades_s: u64,
    pub opposite_exit_threshold: f64,
    pub low_conf_exit_threshold: f64,
    pub max_position_duration_s: i64,
    pub allow_high_volatility: bool,

    // Risk
    pub risk: RiskEnvConfig,

    // Order handling
    pub min_fill_fraction: Decimal,
    pub max_timeout_ms: u64,

    // Arbitrage
    pub arbitrage_enabled: bool,
    pub arbitrage_poll_interval_s: u64,
    pub arbitrage_min_spread_pct: Decimal,
    pub arbitrage_max_notional: Decimal,
    pub arbitrage_slippage_reserve_pct: Decimal,

    // Sync
    pub sync_interval_s: u64,
    pub sync_balance_drift_threshold: Decimal,
    pub sync_price_drift_threshold: f64,
    pub sync_desync_pause_s: i64,

    // Latency
    pub latency_cache_ttl_ms: i64,
    pub latency_book_staleness_ms: i64,
    pub latency_benchmark_interval_s: u64,
    pub hft_poll_hz: u32,

    // Telemetry
    pub metrics_interval_s: u64,

    /// Where the calibration table persists across restarts; empty disables.
    pub calibration_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode: TradingMode = env_string("MODE", "paper")
            .parse()
            .context("MODE must be paper|live|hft|arbitrage_only")?;

        let symbols: Vec<String> = env_string("SYMBOLS", "BTC/USDT")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let exchanges = ExchangeConfig::list_from_env(mode)?;

        let config = Self {
            mode,
            symbols,
            exchanges,
            min_confidence_to_trade: env_or("MIN_CONFIDENCE_TO_TRADE", 0.65)?,
            cooldown_between_trades_s: env_or(
                "COOLDOWN_BETWEEN_TRADES_S",
                default_cooldown_s(mode),
            )?,
            opposite_exit_threshold: env_or("OPPOSITE_EXIT_THRESHOLD", 0.7)?,
            low_conf_exit_threshold: env_or("LOW_CONF_EXIT_THRESHOLD", 0.3)?,
            max_position_duration_s: env_or("MAX_POSITION_DURATION_S", 24 * 3600)?,
            allow_high_volatility: env_or("ALLOW_HIGH_VOLATILITY", false)?,
            risk: RiskEnvConfig::from_env(mode)?,
            min_fill_fraction: env_or("MIN_FILL_FRACTION", Decimal::new(95, 2))?,
            max_timeout_ms: env_or("MAX_TIMEOUT_MS", 5000)?,
            arbitrage_enabled: env_or(
                "ARBITRAGE_ENABLED",
                matches!(mode, TradingMode::ArbitrageOnly),
            )?,
            arbitrage_poll_interval_s: env_or("ARBITRAGE_POLL_INTERVAL_S", 5)?,
            arbitrage_min_spread_pct: env_or("ARBITRAGE_MIN_SPREAD_PCT", Decimal::new(15, 4))?,
            arbitrage_max_notional: env_or("ARBITRAGE_MAX_NOTIONAL", Decimal::from(1000))?,
            arbitrage_slippage_reserve_pct: env_or(
                "ARBITRAGE_SLIPPAGE_RESERVE_PCT",
                Decimal::new(5, 4),
            )?,
            sync_interval_s: env_or("SYNC_INTERVAL_S", 30)?,
            sync_balance_drift_threshold: env_or(
                "SYNC_BALANCE_DRIFT_THRESHOLD",
                Decimal::from(10),
            )?,
            sync_price_drift_threshold: env_or("SYNC_PRICE_DRIFT_THRESHOLD", 0.01)?,
            sync_desync_pause_s: env_or("SYNC_DESYNC_PAUSE_S", 300)?,
            latency_cache_ttl_ms: env_or("LATENCY_CACHE_TTL_MS", 500)?,
            latency_book_staleness_ms: env_or("LATENCY_BOOK_STALENESS_MS", 2000)?,
            latency_benchmark_interval_s: env_or("LATENCY_BENCHMARK_INTERVAL_S", 0)?,
            hft_poll_hz: env_or("HFT_POLL_HZ", 10)?,
            metrics_interval_s: env_or("METRICS_INTERVAL_S", 5)?,
            calibration_path: env_string("CALIBRATION_PATH", ""),
        };

        config.validate()?;
        Ok(config)
    }

    /// Startup validation; any failure here is fatal (exit code 2).
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            anyhow::bail!("SYMBOLS must name at least one symbol");
        }
        if self.exchanges.is_empty() {
            anyhow::bail!("EXCHANGES must name at least one exchange");
        }
        if !(0.0..=1.0).contains(&self.min_confidence_to_trade) {
            anyhow::bail!(
                "MIN_CONFIDENCE_TO_TRADE out of range: {}",
                self.min_confidence_to_trade
            );
        }
        if !(0.0..=1.0).contains(&self.opposite_exit_threshold)
            || !(0.0..=1.0).contains(&self.low_conf_exit_threshold)
        {
            anyhow::bail!("exit thresholds must be within [0, 1]");
        }
        if self.min_fill_fraction <= Decimal::ZERO || self.min_fill_fraction > Decimal::ONE {
            anyhow::bail!("MIN_FILL_FRACTION out of range: {}", self.min_fill_fraction);
        }
        if self.hft_poll_hz == 0 {
            anyhow::bail!("HFT_POLL_HZ must be positive");
        }
        for exchange in &self.exchanges {
            if exchange.kind == ExchangeKind::Mock {
                continue;
            }
            url::Url::parse(&exchange.base_url)
                .with_context(|| format!("invalid base URL for {}", exchange.id))?;
            url::Url::parse(&exchange.ws_url)
                .with_context(|| format!("invalid WS URL for {}", exchange.id))?;
        }
        self.risk
            .to_risk_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("risk config: {}", e))?;
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let cycle_interval = match self.mode {
            TradingMode::Hft => {
                Duration::from_millis((1000 / self.hft_poll_hz.max(1)) as u64)
            }
            _ => Duration::from_secs(1),
        };
        ExecutorConfig {
            min_confidence_to_trade: self.min_confidence_to_trade,
            cooldown: Duration::from_secs(self.cooldown_between_trades_s),
            opposite_exit_threshold: self.opposite_exit_threshold,
            low_conf_exit_threshold: self.low_conf_exit_threshold,
            max_position_duration_s: self.max_position_duration_s,
            cycle_interval,
            cycle_deadline: Duration::from_secs(10),
            max_daily_trades: self.risk.max_daily_trades,
            allow_high_volatility: self.allow_high_volatility,
            volatility_veto: 0.8,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            interval_s: self.sync_interval_s,
            balance_drift_threshold: self.sync_balance_drift_threshold,
            price_drift_threshold: self.sync_price_drift_threshold,
            desync_pause_s: self.sync_desync_pause_s,
            symbols: self.symbols.clone(),
        }
    }

    pub fn arbitrage_config(&self) -> ArbitrageConfig {
        ArbitrageConfig {
            // Live execution only outside paper mode
            execution_enabled: self.arbitrage_enabled && self.mode != TradingMode::Paper,
            poll_interval_s: self.arbitrage_poll_interval_s,
            min_spread_pct: self.arbitrage_min_spread_pct,
            max_notional: self.arbitrage_max_notional,
            slippage_reserve_pct: self.arbitrage_slippage_reserve_pct,
            opportunity_ttl_s: 10,
            symbols: self.symbols.clone(),
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        self.risk.to_risk_config()
    }
}

/// HFT mode halves nothing silently: it just defaults the cooldown far
/// lower, and the env var still overrides either way.
fn default_cooldown_s(mode: TradingMode) -> u64 {
    match mode {
        TradingMode::Hft => 10,
        _ => 30 * 60,
    }
}
