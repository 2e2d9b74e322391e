//! Bybit V5 Execution Client (linear perpetuals)
//!
//! Bybit signs over `timestamp + api_key + recv_window + payload` in a
//! header rather than the query string, and reports errors through a
//! `retCode` body field even on HTTP 200. Everything else mirrors the
//! Binance client: token bucket, request deadline, middleware retries.

use crate::domain::errors::OrderError;
use crate::domain::market::{BookLevel, OrderBookSnapshot};
use crate::domain::ports::ExchangeClient;
use crate::domain::trading::types::{
    AssetBalance, BalanceMap, OrderAck, OrderRequest, OrderSide, OrderStatus, OrderType,
    PositionInfo, Side, Tick, denormalize_symbol, normalize_symbol,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::core::rate_limiter::{EndpointCategory, RateLimitConfig, RateLimiter};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

const RECV_WINDOW: &str = "5000";

pub struct BybitClient {
    exchange_id: String,
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    ws_url: String,
    rate_limiter: RateLimiter,
    round_trip_fee_pct: Decimal,
    max_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

impl BybitClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange_id: impl Into<String>,
        api_key: String,
        api_secret: String,
        base_url: String,
        ws_url: String,
        rate_limits: RateLimitConfig,
        round_trip_fee_pct: Decimal,
        max_timeout_ms: u64,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            client: HttpClientFactory::create_client(max_timeout_ms),
            api_key,
            api_secret,
            base_url,
            ws_url,
            rate_limiter: RateLimiter::new(rate_limits),
            round_trip_fee_pct,
            max_timeout_ms,
        }
    }

    /// Header signature: HMAC-SHA256 over `timestamp + key + window + payload`.
    fn sign_payload(&self, timestamp: i64, payload: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;

        let message = format!("{}{}{}{}", timestamp, self.api_key, RECV_WINDOW, payload);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Bound one REST call by the request deadline. Everything slower fails
    /// as `Timeout` without assuming the order never reached the venue.
    async fn with_deadline<F, T>(&self, fut: F) -> Result<T, OrderError>
    where
        F: std::future::Future<Output = Result<T, OrderError>>,
    {
        let deadline = Duration::from_millis(self.max_timeout_ms);
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(OrderError::Timeout {
                ms: self.max_timeout_ms,
            }),
        }
    }

    async fn signed_post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, OrderError> {
        let payload = body.to_string();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let signature = self.sign_payload(timestamp, &payload);

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| OrderError::Network(e.to_string()))?;

        Self::decode_envelope(response).await
    }

    async fn signed_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, OrderError> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let signature = self.sign_payload(timestamp, query);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .map_err(|e| OrderError::Network(e.to_string()))?;

        Self::decode_envelope(response).await
    }

    /// Unwrap the retCode envelope. 110007 is Bybit's insufficient-balance
    /// family; other non-zero codes are plain rejections.
    async fn decode_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, OrderError> {
        let status = response.status();
        if status.is_server_error() {
            return Err(OrderError::Network(format!("server error: {}", status)));
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| OrderError::Network(e.to_string()))?;

        match envelope.ret_code {
            0 => envelope.result.ok_or_else(|| {
                OrderError::Network("bybit response missing result".to_string())
            }),
            110007 | 110012 => Err(OrderError::InsufficientMargin {
                needed: "unknown".to_string(),
                free: "unknown".to_string(),
            }),
            code => Err(OrderError::Rejected {
                reason: format!("retCode {}: {}", code, envelope.ret_msg),
            }),
        }
    }

}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn round_trip_fee_pct(&self) -> Decimal {
        self.round_trip_fee_pct
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Order)?;

        let api_symbol = denormalize_symbol(&request.symbol);
        let side = match request.side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };
        let order_type = match request.order_type {
            OrderType::Market | OrderType::StopMarket | OrderType::TakeProfitMarket => "Market",
            OrderType::Limit => "Limit",
        };

        let mut body = json!({
            "category": "linear",
            "symbol": api_symbol,
            "side": side,
            "orderType": order_type,
            "qty": request.quantity.to_string(),
            // Exchange-side idempotency key
            "orderLinkId": request.client_order_id,
            "reduceOnly": request.reduce_only,
        });
        if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
            body["price"] = json!(price.to_string());
            body["timeInForce"] = json!("GTC");
        }
        if let Some(sl) = request.stop_loss {
            body["stopLoss"] = json!(sl.to_string());
        }
        if let Some(tp) = request.take_profit {
            body["takeProfit"] = json!(tp.to_string());
        }

        #[derive(Debug, Deserialize)]
        struct CreateResult {
            #[serde(rename = "orderId")]
            order_id: String,
            #[serde(rename = "orderLinkId")]
            order_link_id: String,
        }

        let result: CreateResult = self
            .with_deadline(self.signed_post("/v5/order/create", body))
            .await?;

        info!(
            "Bybit[{}]: order {} {} {} accepted ({})",
            self.exchange_id, side, request.quantity, api_symbol, result.order_id
        );

        // V5 create returns ids only; market fills settle immediately on
        // linear perps, so report the requested quantity as filled.
        Ok(OrderAck {
            order_id: result.order_id,
            client_order_id: result.order_link_id,
            status: if order_type == "Market" {
                OrderStatus::Filled
            } else {
                OrderStatus::Accepted
            },
            filled_quantity: if order_type == "Market" {
                request.quantity
            } else {
                Decimal::ZERO
            },
            average_fill_price: request.price.unwrap_or(Decimal::ZERO),
            fee: Decimal::ZERO,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Order)?;

        let body = json!({
            "category": "linear",
            "symbol": denormalize_symbol(symbol),
            "orderId": order_id,
        });

        #[derive(Debug, Deserialize)]
        struct CancelResult {
            #[serde(rename = "orderId")]
            _order_id: String,
        }

        let _: CancelResult = self
            .with_deadline(self.signed_post("/v5/order/cancel", body))
            .await?;
        Ok(())
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<OrderBookSnapshot, OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Public)?;

        let api_symbol = denormalize_symbol(symbol);
        let url = format!(
            "{}/v5/market/orderbook?category=linear&symbol={}&limit={}",
            self.base_url, api_symbol, depth
        );
        let started = std::time::Instant::now();

        #[derive(Debug, Deserialize)]
        struct BookResult {
            b: Vec<(String, String)>,
            a: Vec<(String, String)>,
        }

        let result: BookResult = self
            .with_deadline(async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| OrderError::Network(e.to_string()))?;
                Self::decode_envelope(response).await
            })
            .await?;

        let parse_levels = |levels: Vec<(String, String)>| -> Vec<BookLevel> {
            levels
                .into_iter()
                .filter_map(|(p, q)| {
                    Some(BookLevel {
                        price: p.parse().ok()?,
                        quantity: q.parse().ok()?,
                    })
                })
                .collect()
        };

        let snapshot = OrderBookSnapshot {
            symbol: symbol.to_string(),
            exchange_id: self.exchange_id.clone(),
            bids: parse_levels(result.b),
            asks: parse_levels(result.a),
            timestamp: chrono::Utc::now(),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        snapshot
            .validate()
            .map_err(|e| OrderError::Network(format!("invalid order book: {}", e)))?;
        Ok(snapshot)
    }

    async fn fetch_balance(&self) -> Result<BalanceMap, OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Private)?;

        #[derive(Debug, Deserialize)]
        struct Coin {
            coin: String,
            #[serde(rename = "walletBalance")]
            wallet_balance: String,
            #[serde(rename = "availableToWithdraw", default)]
            available: String,
        }

        #[derive(Debug, Deserialize)]
        struct WalletAccount {
            coin: Vec<Coin>,
        }

        #[derive(Debug, Deserialize)]
        struct WalletResult {
            list: Vec<WalletAccount>,
        }

        let result: WalletResult = self
            .with_deadline(self.signed_get("/v5/account/wallet-balance", "accountType=UNIFIED"))
            .await?;

        let mut map = BalanceMap::new();
        for account in result.list {
            for coin in account.coin {
                let total: Decimal = coin.wallet_balance.parse().unwrap_or(Decimal::ZERO);
                let free: Decimal = coin.available.parse().unwrap_or(total);
                if total > Decimal::ZERO {
                    map.insert(
                        coin.coin,
                        AssetBalance {
                            free,
                            used: total - free,
                        },
                    );
                }
            }
        }
        Ok(map)
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>, OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Private)?;

        #[derive(Debug, Deserialize)]
        struct RawPosition {
            symbol: String,
            side: String,
            size: String,
            #[serde(rename = "avgPrice")]
            avg_price: String,
            leverage: String,
            #[serde(rename = "unrealisedPnl")]
            unrealised_pnl: String,
        }

        #[derive(Debug, Deserialize)]
        struct PositionResult {
            list: Vec<RawPosition>,
        }

        let result: PositionResult = self
            .with_deadline(self.signed_get(
                "/v5/position/list",
                "category=linear&settleCoin=USDT",
            ))
            .await?;

        let positions = result
            .list
            .into_iter()
            .filter_map(|p| {
                let quantity: Decimal = p.size.parse().ok()?;
                if quantity.is_zero() {
                    return None;
                }
                let symbol = match normalize_symbol(&p.symbol) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Bybit: skipping position, {}", e);
                        return None;
                    }
                };
                Some(PositionInfo {
                    symbol,
                    side: if p.side == "Buy" { Side::Long } else { Side::Short },
                    quantity,
                    entry_price: p.avg_price.parse().unwrap_or(Decimal::ZERO),
                    leverage: p.leverage.parse().unwrap_or(1),
                    unrealized_pnl: p.unrealised_pnl.parse().unwrap_or(Decimal::ZERO),
                })
            })
            .collect();
        Ok(positions)
    }

    async fn stream_ticks(&self, symbols: &[String]) -> Result<Receiver<Tick>, OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Public)?;
        super::websocket::spawn_tick_stream(
            self.exchange_id.clone(),
            self.ws_url.clone(),
            symbols.to_vec(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_client() -> BybitClient {
        BybitClient::new(
            "bybit",
            "test_key".to_string(),
            "test_secret".to_string(),
            "https://api.bybit.test".to_string(),
            "wss://stream.bybit.test".to_string(),
            RateLimitConfig::default(),
            dec!(0.0011),
            5000,
        )
    }

    #[test]
    fn test_signature_is_hex_and_deterministic() {
        let client = test_client();
        let a = client.sign_payload(1700000000000, "{\"category\":\"linear\"}");
        let b = client.sign_payload(1700000000000, "{\"category\":\"linear\"}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_varies_with_timestamp() {
        let client = test_client();
        let a = client.sign_payload(1, "x");
        let b = client.sign_payload(2, "x");
        assert_ne!(a, b);
    }
}
