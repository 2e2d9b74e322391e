use crate::domain::errors::CommandError;
use crate::domain::events::MetricsSnapshot;
use crate::domain::trading::{Position, TradeRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Reply channel carried by every inbound command.
pub type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

/// Trading mode, immutable per run except through `SetMode` before `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
    Hft,
    ArbitrageOnly,
}

impl TradingMode {
    pub fn is_live(self) -> bool {
        matches!(self, TradingMode::Live | TradingMode::Hft)
    }
}

impl std::str::FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            "hft" => Ok(TradingMode::Hft),
            "arbitrage" | "arbitrage_only" => Ok(TradingMode::ArbitrageOnly),
            _ => anyhow::bail!(
                "Invalid MODE: {}. Must be 'paper', 'live', 'hft', or 'arbitrage_only'",
                s
            ),
        }
    }
}

/// Per-exchange health summary answered to `RequestStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeStatus {
    pub exchange_id: String,
    pub connected: bool,
    pub degraded: bool,
    pub synced: bool,
    pub entry_paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub mode: TradingMode,
    pub symbols: Vec<String>,
    pub open_positions: usize,
    pub daily_trades: u64,
    pub daily_pnl: rust_decimal::Decimal,
    pub circuit_breaker_tripped: bool,
    pub exchanges: Vec<ExchangeStatus>,
}

/// Inbound control channel, one tagged message per request. Thin adapter
/// shells (CLI, chat) translate their own surface into these.
#[derive(Debug)]
pub enum EngineCommand {
    Start {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
    SetMode {
        mode: TradingMode,
        reply: Reply<()>,
    },
    SetSymbols {
        symbols: Vec<String>,
        reply: Reply<()>,
    },
    SetLeverage {
        symbol: String,
        leverage: u32,
        reply: Reply<()>,
    },
    /// Opaque to the core; forwarded to the external training collaborator.
    TrainingControl {
        payload: serde_json::Value,
        reply: Reply<()>,
    },
    RequestStatus {
        reply: Reply<EngineStatus>,
    },
    RequestMetrics {
        reply: Reply<MetricsSnapshot>,
    },
    RequestPositions {
        reply: Reply<Vec<Position>>,
    },
    ClosePosition {
        position_id: Uuid,
        reply: Reply<TradeRecord>,
    },
    EmergencyStop {
        reply: Reply<()>,
    },
    /// Manual clear after an emergency stop.
    ResetCircuitBreaker {
        reply: Reply<()>,
    },
}
