//! CLI shell around the trading engine.
//!
//! Loads config, wires concrete infrastructure for the selected mode, then
//! translates stdin lines and Ctrl-C into control messages. Exit codes:
//! 0 graceful stop, 2 configuration error, 3 unrecoverable exchange error
//! at startup, 130 user interrupt.

use clap::Parser;
use neurotrade::application::system::Supervisor;
use neurotrade::config::{Config, ExchangeKind};
use neurotrade::domain::commands::{EngineCommand, TradingMode};
use neurotrade::domain::errors::EngineError;
use neurotrade::domain::events::LoggingListener;
use neurotrade::domain::ports::{
    ExchangeClient, MarketDataSource, NullTradeRecordSink, Predictor, TradeRecordSink,
};
use neurotrade::infrastructure::binance::BinanceFuturesClient;
use neurotrade::infrastructure::bybit::BybitClient;
use neurotrade::infrastructure::event_bus::EventBus;
use neurotrade::infrastructure::mock::{
    MockExchangeClient, MockMarketDataSource, MockPredictor, spawn_price_simulation,
};
use rust_decimal_macros::dec;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "engine", about = "ML-driven crypto futures trading engine")]
struct Cli {
    /// Trading mode: paper | live | hft | arbitrage_only (overrides MODE)
    #[arg(long)]
    mode: Option<String>,

    /// Comma-separated symbol list (overrides SYMBOLS)
    #[arg(long)]
    symbols: Option<String>,

    /// Disable the interactive stdin control shell
    #[arg(long)]
    non_interactive: bool,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Some(mode) = &cli.mode {
        // Propagate overrides through the environment so Config sees them.
        unsafe { std::env::set_var("MODE", mode) };
    }
    if let Some(symbols) = &cli.symbols {
        unsafe { std::env::set_var("SYMBOLS", symbols) };
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(config, !cli.non_interactive)) {
        Ok(code) => code,
        Err(EngineError::Config(msg)) => {
            error!("Configuration error: {}", msg);
            ExitCode::from(2)
        }
        Err(EngineError::ExchangeStartup(msg)) => {
            error!("Exchange startup failure: {}", msg);
            ExitCode::from(3)
        }
        Err(e) => {
            error!("Engine failed: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config, interactive: bool) -> Result<ExitCode, EngineError> {
    let event_bus = EventBus::new();
    event_bus.subscribe(Arc::new(LoggingListener)).await;

    let (sim_shutdown_tx, sim_shutdown_rx) = watch::channel(false);

    // Wire concrete infrastructure for the selected mode.
    let mut clients: Vec<Arc<dyn ExchangeClient>> = Vec::new();
    let market_data: Arc<dyn MarketDataSource>;
    let predictor: Arc<dyn Predictor>;
    let sink: Arc<dyn TradeRecordSink> = Arc::new(NullTradeRecordSink);

    match config.mode {
        TradingMode::Paper => {
            let mock_data = Arc::new(MockMarketDataSource::new());
            let mut sim_exchange: Option<Arc<MockExchangeClient>> = None;
            for entry in &config.exchanges {
                let exchange = Arc::new(MockExchangeClient::new(&entry.id, dec!(10000)));
                if sim_exchange.is_none() {
                    sim_exchange = Some(exchange.clone());
                }
                clients.push(exchange);
            }
            if let Some(exchange) = sim_exchange {
                let seeds = config
                    .symbols
                    .iter()
                    .map(|s| (s.clone(), default_seed_price(s)))
                    .collect();
                let _simulation =
                    spawn_price_simulation(exchange, mock_data.clone(), seeds, sim_shutdown_rx);
            }
            market_data = mock_data;
            predictor = Arc::new(MockPredictor::with_random_signals());
        }
        TradingMode::ArbitrageOnly => {
            clients = build_live_clients(&config)?;
            // The arbitrage path consults neither candles nor the model.
            market_data = Arc::new(MockMarketDataSource::new());
            predictor = Arc::new(MockPredictor::new());
        }
        TradingMode::Live | TradingMode::Hft => {
            // The prediction model and the candle store are external
            // collaborators; directional live trading embeds the engine as
            // a library and injects both.
            return Err(EngineError::Config(
                "live directional trading requires an injected Predictor and MarketDataSource; \
                 run paper or arbitrage_only from the CLI"
                    .to_string(),
            ));
        }
    }

    let supervisor = Supervisor::new(
        config.clone(),
        clients,
        market_data,
        predictor,
        sink,
        event_bus,
    )
    .await?;

    let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(64);

    // Auto-start trading once the supervisor is up.
    let starter = command_tx.clone();
    tokio::spawn(async move {
        let (reply, rx) = oneshot::channel();
        if starter.send(EngineCommand::Start { reply }).await.is_ok() {
            let _ = rx.await;
        }
    });

    let interrupted = Arc::new(std::sync::atomic::AtomicBool::new(false));

    // Ctrl-C translates into a Shutdown command.
    let ctrlc_tx = command_tx.clone();
    let ctrlc_flag = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            ctrlc_flag.store(true, std::sync::atomic::Ordering::SeqCst);
            let (reply, _rx) = oneshot::channel();
            let _ = ctrlc_tx.send(EngineCommand::Shutdown { reply }).await;
        }
    });

    if interactive {
        tokio::spawn(run_control_shell(command_tx));
    }

    supervisor.run(command_rx).await?;
    let _ = sim_shutdown_tx.send(true);

    if interrupted.load(std::sync::atomic::Ordering::SeqCst) {
        Ok(ExitCode::from(130))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn build_live_clients(config: &Config) -> Result<Vec<Arc<dyn ExchangeClient>>, EngineError> {
    let mut clients: Vec<Arc<dyn ExchangeClient>> = Vec::new();
    for entry in &config.exchanges {
        let client: Arc<dyn ExchangeClient> = match entry.kind {
            ExchangeKind::Binance => Arc::new(BinanceFuturesClient::new(
                entry.id.clone(),
                entry.api_key.clone(),
                entry.api_secret.clone(),
                entry.base_url.clone(),
                entry.ws_url.clone(),
                entry.rate_limits,
                entry.round_trip_fee_pct,
                config.max_timeout_ms,
            )),
            ExchangeKind::Bybit => Arc::new(BybitClient::new(
                entry.id.clone(),
                entry.api_key.clone(),
                entry.api_secret.clone(),
                entry.base_url.clone(),
                entry.ws_url.clone(),
                entry.rate_limits,
                entry.round_trip_fee_pct,
                config.max_timeout_ms,
            )),
            ExchangeKind::Mock => Arc::new(MockExchangeClient::new(&entry.id, dec!(10000))),
        };
        clients.push(client);
    }
    Ok(clients)
}

fn default_seed_price(symbol: &str) -> rust_decimal::Decimal {
    match symbol.split('/').next().unwrap_or("") {
        "BTC" => dec!(50000),
        "ETH" => dec!(2500),
        "SOL" => dec!(150),
        _ => dec!(100),
    }
}

/// Minimal line-oriented control adapter over stdin.
async fn run_control_shell(command_tx: mpsc::Sender<EngineCommand>) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or("").to_lowercase();

        match verb.as_str() {
            "start" => send_simple(&command_tx, |reply| EngineCommand::Start { reply }).await,
            "stop" => send_simple(&command_tx, |reply| EngineCommand::Stop { reply }).await,
            "shutdown" | "quit" | "exit" => {
                send_simple(&command_tx, |reply| EngineCommand::Shutdown { reply }).await;
                return;
            }
            "emergency-stop" => {
                send_simple(&command_tx, |reply| EngineCommand::EmergencyStop { reply }).await
            }
            "reset-breaker" => {
                send_simple(&command_tx, |reply| EngineCommand::ResetCircuitBreaker {
                    reply,
                })
                .await
            }
            "status" => {
                let (reply, rx) = oneshot::channel();
                if command_tx
                    .send(EngineCommand::RequestStatus { reply })
                    .await
                    .is_ok()
                    && let Ok(Ok(status)) = rx.await
                {
                    println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
                }
            }
            "metrics" => {
                let (reply, rx) = oneshot::channel();
                if command_tx
                    .send(EngineCommand::RequestMetrics { reply })
                    .await
                    .is_ok()
                    && let Ok(Ok(snapshot)) = rx.await
                {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&snapshot).unwrap_or_default()
                    );
                }
            }
            "positions" => {
                let (reply, rx) = oneshot::channel();
                if command_tx
                    .send(EngineCommand::RequestPositions { reply })
                    .await
                    .is_ok()
                    && let Ok(Ok(positions)) = rx.await
                {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&positions).unwrap_or_default()
                    );
                }
            }
            "close" => match parts.next().and_then(|raw| raw.parse::<Uuid>().ok()) {
                Some(position_id) => {
                    let (reply, rx) = oneshot::channel();
                    if command_tx
                        .send(EngineCommand::ClosePosition { position_id, reply })
                        .await
                        .is_ok()
                    {
                        match rx.await {
                            Ok(Ok(record)) => {
                                println!("closed: pnl {}", record.realized_pnl)
                            }
                            Ok(Err(e)) => warn!("close rejected: {}", e),
                            Err(_) => {}
                        }
                    }
                }
                None => warn!("usage: close <position-uuid>"),
            },
            "symbols" => {
                let symbols: Vec<String> = parts.map(|s| s.to_string()).collect();
                let (reply, rx) = oneshot::channel();
                if command_tx
                    .send(EngineCommand::SetSymbols { symbols, reply })
                    .await
                    .is_ok()
                    && let Ok(Err(e)) = rx.await
                {
                    warn!("set symbols rejected: {}", e);
                }
            }
            "leverage" => {
                let symbol = parts.next().map(str::to_string);
                let leverage = parts.next().and_then(|raw| raw.parse::<u32>().ok());
                match (symbol, leverage) {
                    (Some(symbol), Some(leverage)) => {
                        let (reply, rx) = oneshot::channel();
                        if command_tx
                            .send(EngineCommand::SetLeverage {
                                symbol,
                                leverage,
                                reply,
                            })
                            .await
                            .is_ok()
                            && let Ok(Err(e)) = rx.await
                        {
                            warn!("set leverage rejected: {}", e);
                        }
                    }
                    _ => warn!("usage: leverage <symbol> <n>"),
                }
            }
            unknown => {
                warn!("unknown command: {}", unknown);
            }
        }
    }
}

async fn send_simple<F>(command_tx: &mpsc::Sender<EngineCommand>, build: F)
where
    F: FnOnce(neurotrade::domain::commands::Reply<()>) -> EngineCommand,
{
    let (reply, rx) = oneshot::channel();
    if command_tx.send(build(reply)).await.is_ok()
        && let Ok(Err(e)) = rx.await
    {
        warn!("command rejected: {}", e);
    }
}
