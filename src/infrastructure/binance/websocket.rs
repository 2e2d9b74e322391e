use crate::domain::errors::OrderError;
use crate::domain::trading::types::{Tick, denormalize_symbol, normalize_symbol};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 60;

/// Spawn the tick-stream task for the given symbols. The task reconnects
/// with capped exponential backoff until the receiver is dropped.
pub fn spawn_tick_stream(
    exchange_id: String,
    ws_url: String,
    symbols: Vec<String>,
) -> Result<Receiver<Tick>, OrderError> {
    if symbols.is_empty() {
        return Err(OrderError::Rejected {
            reason: "no symbols to stream".to_string(),
        });
    }

    let (tx, rx) = mpsc::channel(1000);

    tokio::spawn(async move {
        let mut backoff = 1u64;
        loop {
            match connect_and_stream(&ws_url, &symbols, &tx).await {
                Ok(()) => {
                    info!("BinanceFutures[{}]: WebSocket closed by server", exchange_id);
                    backoff = 1;
                }
                Err(e) => {
                    error!(
                        "BinanceFutures[{}]: WebSocket error: {}. Reconnecting in {}s",
                        exchange_id, e, backoff
                    );
                }
            }
            if tx.is_closed() {
                debug!("BinanceFutures[{}]: tick receiver dropped, ending stream", exchange_id);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
        }
    });

    Ok(rx)
}

async fn connect_and_stream(
    ws_url: &str,
    symbols: &[String],
    tx: &Sender<Tick>,
) -> anyhow::Result<()> {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@aggTrade", denormalize_symbol(s).to_lowercase()))
        .collect();
    let url = format!(
        "{}/stream?streams={}",
        ws_url.trim_end_matches('/'),
        streams.join("/")
    );

    info!("Connecting to Binance futures WebSocket: {}", url);
    let (ws_stream, _) = connect_async(&url).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut ping_interval = tokio::time::interval(std::time::Duration::from_secs(180));
    ping_interval.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                write.send(Message::Ping(vec![].into())).await?;
            }
            msg = read.next() => {
                let Some(msg) = msg else { return Ok(()) };
                match msg? {
                    Message::Text(text) => {
                        if let Some(tick) = parse_trade_message(&text)
                            && tx.send(tick).await.is_err()
                        {
                            return Ok(());
                        }
                    }
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Message::Close(frame) => {
                        if let Some(cf) = frame {
                            info!("Binance WebSocket closed: {} '{}'", cf.code, cf.reason);
                        }
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

fn parse_trade_message(text: &str) -> Option<Tick> {
    #[derive(Debug, Deserialize)]
    struct StreamMessage {
        stream: String,
        data: serde_json::Value,
    }

    #[derive(Debug, Deserialize)]
    struct AggTrade {
        #[serde(rename = "s")]
        symbol: String,
        #[serde(rename = "p")]
        price: String,
        #[serde(rename = "T")]
        trade_time: i64,
    }

    let msg: StreamMessage = serde_json::from_str(text).ok()?;
    if !msg.stream.ends_with("@aggTrade") {
        return None;
    }

    let trade: AggTrade = serde_json::from_value(msg.data).ok()?;
    let symbol = match normalize_symbol(&trade.symbol) {
        Ok(s) => s,
        Err(e) => {
            warn!("Binance WebSocket: {}", e);
            return None;
        }
    };
    let price: Decimal = trade.price.parse().ok()?;

    Some(Tick {
        symbol,
        price,
        timestamp: trade.trade_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_agg_trade() {
        let text = r#"{"stream":"btcusdt@aggTrade","data":{"s":"BTCUSDT","p":"50123.40","T":1700000000123}}"#;
        let tick = parse_trade_message(text).unwrap();
        assert_eq!(tick.symbol, "BTC/USDT");
        assert_eq!(tick.price, dec!(50123.40));
        assert_eq!(tick.timestamp, 1700000000123);
    }

    #[test]
    fn test_non_trade_messages_ignored() {
        assert!(parse_trade_message(r#"{"result":null,"id":1}"#).is_none());
        assert!(
            parse_trade_message(r#"{"stream":"btcusdt@depth","data":{}}"#).is_none()
        );
    }
}
