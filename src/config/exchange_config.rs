use crate::config::{env_or, env_string};
use crate::domain::commands::TradingMode;
use crate::infrastructure::core::rate_limiter::RateLimitConfig;
use anyhow::Result;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Which concrete client implementation an exchange entry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Binance,
    Bybit,
    Mock,
}

impl FromStr for ExchangeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(ExchangeKind::Binance),
            "bybit" => Ok(ExchangeKind::Bybit),
            "mock" => Ok(ExchangeKind::Mock),
            _ => anyhow::bail!("Unknown exchange kind: {} (binance|bybit|mock)", s),
        }
    }
}

/// Per-exchange connection entry. Credentials are opaque to the core.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub id: String,
    pub kind: ExchangeKind,
    pub base_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub round_trip_fee_pct: Decimal,
    pub rate_limits: RateLimitConfig,
}

impl ExchangeConfig {
    pub fn mock(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ExchangeKind::Mock,
            base_url: String::new(),
            ws_url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            round_trip_fee_pct: Decimal::new(8, 4),
            rate_limits: RateLimitConfig::default(),
        }
    }

    /// Parse the `EXCHANGES` list; each id owns a `<ID>_*` env namespace,
    /// e.g. `BINANCE_API_KEY`, `BYBIT_WS_URL`.
    pub fn list_from_env(mode: TradingMode) -> Result<Vec<Self>> {
        let default_list = match mode {
            TradingMode::Paper => "mock",
            _ => "binance",
        };
        let ids: Vec<String> = env_string("EXCHANGES", default_list)
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let mut exchanges = Vec::with_capacity(ids.len());
        for id in ids {
            exchanges.push(Self::from_env_id(&id, mode)?);
        }
        Ok(exchanges)
    }

    fn from_env_id(id: &str, mode: TradingMode) -> Result<Self> {
        let prefix = id.to_uppercase();
        let kind: ExchangeKind = env_string(&format!("{}_KIND", prefix), id).parse()?;

        let (default_base, default_ws, default_fee) = match kind {
            ExchangeKind::Binance => (
                "https://fapi.binance.com",
                "wss://fstream.binance.com",
                Decimal::new(8, 4), // 0.08% round trip
            ),
            ExchangeKind::Bybit => (
                "https://api.bybit.com",
                "wss://stream.bybit.com/v5/public/linear",
                Decimal::new(11, 4),
            ),
            ExchangeKind::Mock => ("", "", Decimal::new(8, 4)),
        };

        let api_key = env_string(&format!("{}_API_KEY", prefix), "");
        let api_secret = env_string(&format!("{}_API_SECRET", prefix), "");
        if kind != ExchangeKind::Mock && mode.is_live() && (api_key.is_empty() || api_secret.is_empty())
        {
            anyhow::bail!(
                "{}_API_KEY / {}_API_SECRET required for live trading on {}",
                prefix,
                prefix,
                id
            );
        }

        Ok(Self {
            id: id.to_string(),
            kind,
            base_url: env_string(&format!("{}_BASE_URL", prefix), default_base),
            ws_url: env_string(&format!("{}_WS_URL", prefix), default_ws),
            api_key,
            api_secret,
            round_trip_fee_pct: env_or(&format!("{}_FEE_PCT", prefix), default_fee)?,
            rate_limits: RateLimitConfig {
                public_per_second: env_or(&format!("{}_PUBLIC_RPS", prefix), 20.0)?,
                private_per_second: env_or(&format!("{}_PRIVATE_RPS", prefix), 10.0)?,
                order_per_second: env_or(&format!("{}_ORDER_RPS", prefix), 5.0)?,
                burst: env_or(&format!("{}_RATE_BURST", prefix), 10.0)?,
            },
        })
    }
}
