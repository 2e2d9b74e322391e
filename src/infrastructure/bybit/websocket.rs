use crate::domain::errors::OrderError;
use crate::domain::trading::types::{Tick, denormalize_symbol, normalize_symbol};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 60;

/// Spawn the Bybit public-trade stream task. Reconnects with capped
/// exponential backoff until the receiver is dropped.
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
                    info!("Bybit[{}]: WebSocket closed by server", exchange_id);
                    backoff = 1;
                }
                Err(e) => {
                    error!(
                        "Bybit[{}]: WebSocket error: {}. Reconnecting in {}s",
                        exchange_id, e, backoff
                    );
                }
            }
            if tx.is_closed() {
                debug!("Bybit[{}]: tick receiver dropped, ending stream", exchange_id);
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
    info!("Connecting to Bybit WebSocket: {}", ws_url);
    let (ws_stream, _) = connect_async(ws_url).await?;
    let (mut write, mut read) = ws_stream.split();

    let topics: Vec<String> = symbols
        .iter()
        .map(|s| format!("publicTrade.{}", denormalize_symbol(s)))
        .collect();
    let subscribe = serde_json::json!({ "op": "subscribe", "args": topics });
    write
        .send(Message::Text(subscribe.to_string().into()))
        .await?;

    // Bybit expects an application-level ping every 20s.
    let mut ping_interval = tokio::time::interval(std::time::Duration::from_secs(20));
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                let ping = serde_json::json!({ "op": "ping" });
                write.send(Message::Text(ping.to_string().into())).await?;
            }
            msg = read.next() => {
                let Some(msg) = msg else { return Ok(()) };
                match msg? {
                    Message::Text(text) => {
                        for tick in parse_trade_message(&text) {
                            if tx.send(tick).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Message::Close(frame) => {
                        if let Some(cf) = frame {
                            info!("Bybit WebSocket closed: {} '{}'", cf.code, cf.reason);
                        }
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

fn parse_trade_message(text: &str) -> Vec<Tick> {
    #[derive(Debug, Deserialize)]
    struct TradeEntry {
        #[serde(rename = "s")]
        symbol: String,
        #[serde(rename = "p")]
        price: String,
        #[serde(rename = "T")]
        trade_time: i64,
    }

    #[derive(Debug, Deserialize)]
    struct TopicMessage {
        topic: String,
        data: Vec<TradeEntry>,
    }

    let Ok(msg) = serde_json::from_str::<TopicMessage>(text) else {
        return Vec::new();
    };
    if !msg.topic.starts_with("publicTrade.") {
        return Vec::new();
    }

    msg.data
        .into_iter()
        .filter_map(|trade| {
            let symbol = match normalize_symbol(&trade.symbol) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Bybit WebSocket: {}", e);
                    return None;
                }
            };
            let price: Decimal = trade.price.parse().ok()?;
            Some(Tick {
                symbol,
                price,
                timestamp: trade.trade_time,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_public_trade_batch() {
        let text = r#"{"topic":"publicTrade.BTCUSDT","data":[
            {"s":"BTCUSDT","p":"50000.5","T":1700000000001},
            {"s":"BTCUSDT","p":"50001.0","T":1700000000002}
        ]}"#;
        let ticks = parse_trade_message(text);
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].symbol, "BTC/USDT");
        assert_eq!(ticks[1].price, dec!(50001.0));
    }

    #[test]
    fn test_pong_and_subscribe_acks_ignored() {
        assert!(parse_trade_message(r#"{"op":"pong"}"#).is_empty());
        assert!(parse_trade_message(r#"{"success":true,"op":"subscribe"}"#).is_empty());
    }
}
