//! Binance USD-M Futures Execution Client
//!
//! Signed REST access to the futures API:
//! - Order placement with client-order-id deduplication
//! - Balance, position and order-book queries
//! - HMAC-SHA256 request signing
//!
//! Every call passes the per-category token bucket first and is bounded by
//! `max_timeout_ms`. Transient failures retry in the HTTP middleware; venue
//! health and routing exclusion live in the exchange router.

use crate::domain::errors::OrderError;
use crate::domain::market::{BookLevel, OrderBookSnapshot};
use crate::domain::ports::ExchangeClient;
use crate::domain::trading::types::{
    AssetBalance, BalanceMap, OrderAck, OrderRequest, OrderSide, OrderStatus, OrderType,
    PositionInfo, Side, Tick, denormalize_symbol, normalize_symbol,
};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use crate::infrastructure::core::rate_limiter::{EndpointCategory, RateLimitConfig, RateLimiter};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

pub struct BinanceFuturesClient {
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

impl BinanceFuturesClient {
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

    /// HMAC-SHA256 signature over the query string, hex encoded.
    fn sign_request(&self, query_string: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        query.push(format!("timestamp={}", timestamp));
        let query_string = query.join("&");
        let signature = self.sign_request(&query_string);
        format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        )
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

    fn map_send_error(e: reqwest_middleware::Error) -> OrderError {
        OrderError::Network(e.to_string())
    }

    /// 4xx responses are rejections and must not be retried; 5xx are treated
    /// as transient and have already exhausted the middleware retries.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, OrderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            if body.contains("-2019") || body.to_lowercase().contains("margin is insufficient") {
                return Err(OrderError::InsufficientMargin {
                    needed: "unknown".to_string(),
                    free: "unknown".to_string(),
                });
            }
            Err(OrderError::Rejected {
                reason: format!("{}: {}", status, body),
            })
        } else {
            Err(OrderError::Network(format!("{}: {}", status, body)))
        }
    }

    fn map_order_status(status: &str) -> OrderStatus {
        match status {
            "NEW" => OrderStatus::Accepted,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "EXPIRED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Submitted,
        }
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
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
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let order_type = match request.order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        };

        let mut params = vec![
            ("symbol", api_symbol.clone()),
            ("side", side.to_string()),
            ("type", order_type.to_string()),
            ("quantity", request.quantity.to_string()),
            // Exchange-side idempotency: resubmitting the same id is a no-op.
            ("newClientOrderId", request.client_order_id.clone()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if request.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
            params.push(("price", price.to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }

        let url = self.signed_url("/fapi/v1/order", &params);

        let ack = self
            .with_deadline(async {
                let response = self
                    .client
                    .post(&url)
                    .header("X-MBX-APIKEY", &self.api_key)
                    .send()
                    .await
                    .map_err(Self::map_send_error)?;
                let response = Self::check_response(response).await?;

                #[derive(Debug, Deserialize)]
                struct OrderResponse {
                    #[serde(rename = "orderId")]
                    order_id: i64,
                    #[serde(rename = "clientOrderId")]
                    client_order_id: String,
                    status: String,
                    #[serde(rename = "executedQty")]
                    executed_qty: String,
                    #[serde(rename = "avgPrice", default)]
                    avg_price: String,
                }

                let parsed: OrderResponse = response
                    .json()
                    .await
                    .map_err(|e| OrderError::Network(e.to_string()))?;

                Ok(OrderAck {
                    order_id: parsed.order_id.to_string(),
                    client_order_id: parsed.client_order_id,
                    status: Self::map_order_status(&parsed.status),
                    filled_quantity: parsed.executed_qty.parse().unwrap_or(Decimal::ZERO),
                    average_fill_price: parsed.avg_price.parse().unwrap_or(Decimal::ZERO),
                    fee: Decimal::ZERO,
                })
            })
            .await?;

        info!(
            "BinanceFutures[{}]: order {} {} {} -> {}",
            self.exchange_id, side, request.quantity, api_symbol, ack.status
        );
        Ok(ack)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Order)?;

        let api_symbol = denormalize_symbol(symbol);
        let url = self.signed_url(
            "/fapi/v1/order",
            &[
                ("symbol", api_symbol),
                ("orderId", order_id.to_string()),
            ],
        );

        self.with_deadline(async {
            let response = self
                .client
                .delete(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(Self::map_send_error)?;
            Self::check_response(response).await?;
            Ok(())
        })
        .await
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<OrderBookSnapshot, OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Public)?;

        let api_symbol = denormalize_symbol(symbol);
        let url = build_url_with_query(
            &format!("{}/fapi/v1/depth", self.base_url),
            &[("symbol", api_symbol), ("limit", depth.to_string())],
        );
        let started = std::time::Instant::now();

        let (bids, asks) = self
            .with_deadline(async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(Self::map_send_error)?;
                let response = Self::check_response(response).await?;

                #[derive(Debug, Deserialize)]
                struct Depth {
                    bids: Vec<(String, String)>,
                    asks: Vec<(String, String)>,
                }

                let parsed: Depth = response
                    .json()
                    .await
                    .map_err(|e| OrderError::Network(e.to_string()))?;
                Ok((parsed.bids, parsed.asks))
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
            bids: parse_levels(bids),
            asks: parse_levels(asks),
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

        let url = self.signed_url("/fapi/v2/balance", &[]);

        self.with_deadline(async {
            let response = self
                .client
                .get(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(Self::map_send_error)?;
            let response = Self::check_response(response).await?;

            #[derive(Debug, Deserialize)]
            struct Balance {
                asset: String,
                #[serde(rename = "availableBalance")]
                available: String,
                balance: String,
            }

            let balances: Vec<Balance> = response
                .json()
                .await
                .map_err(|e| OrderError::Network(e.to_string()))?;

            let mut map = BalanceMap::new();
            for b in balances {
                let free: Decimal = b.available.parse().unwrap_or(Decimal::ZERO);
                let total: Decimal = b.balance.parse().unwrap_or(Decimal::ZERO);
                if total > Decimal::ZERO {
                    map.insert(
                        b.asset,
                        AssetBalance {
                            free,
                            used: total - free,
                        },
                    );
                }
            }
            Ok(map)
        })
        .await
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>, OrderError> {
        self.rate_limiter.acquire(EndpointCategory::Private)?;

        let url = self.signed_url("/fapi/v2/positionRisk", &[]);

        self.with_deadline(async {
            let response = self
                .client
                .get(&url)
                .header("X-MBX-APIKEY", &self.api_key)
                .send()
                .await
                .map_err(Self::map_send_error)?;
            let response = Self::check_response(response).await?;

            #[derive(Debug, Deserialize)]
            struct PositionRisk {
                symbol: String,
                #[serde(rename = "positionAmt")]
                position_amt: String,
                #[serde(rename = "entryPrice")]
                entry_price: String,
                leverage: String,
                #[serde(rename = "unRealizedProfit")]
                unrealized_profit: String,
            }

            let raw: Vec<PositionRisk> = response
                .json()
                .await
                .map_err(|e| OrderError::Network(e.to_string()))?;

            let positions = raw
                .into_iter()
                .filter_map(|p| {
                    let amount: Decimal = p.position_amt.parse().ok()?;
                    if amount.is_zero() {
                        return None;
                    }
                    let symbol = match normalize_symbol(&p.symbol) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("BinanceFutures: skipping position, {}", e);
                            return None;
                        }
                    };
                    Some(PositionInfo {
                        symbol,
                        side: if amount > Decimal::ZERO {
                            Side::Long
                        } else {
                            Side::Short
                        },
                        quantity: amount.abs(),
                        entry_price: p.entry_price.parse().unwrap_or(Decimal::ZERO),
                        leverage: p.leverage.parse().unwrap_or(1),
                        unrealized_pnl: p.unrealized_profit.parse().unwrap_or(Decimal::ZERO),
                    })
                })
                .collect();
            Ok(positions)
        })
        .await
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

    fn test_client() -> BinanceFuturesClient {
        BinanceFuturesClient::new(
            "binance",
            "test_key".to_string(),
            "test_secret".to_string(),
            "https://fapi.binance.test".to_string(),
            "wss://fstream.binance.test".to_string(),
            RateLimitConfig::default(),
            dec!(0.0008),
            5000,
        )
    }

    #[test]
    fn test_hmac_signature_format() {
        let client = test_client();
        let signature =
            client.sign_request("symbol=BTCUSDT&side=BUY&type=MARKET&quantity=0.001&timestamp=1");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_order_status_mapping() {
        assert_eq!(
            BinanceFuturesClient::map_order_status("NEW"),
            OrderStatus::Accepted
        );
        assert_eq!(
            BinanceFuturesClient::map_order_status("FILLED"),
            OrderStatus::Filled
        );
        assert_eq!(
            BinanceFuturesClient::map_order_status("PARTIALLY_FILLED"),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(
            BinanceFuturesClient::map_order_status("EXPIRED"),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn test_signed_url_contains_signature() {
        let client = test_client();
        let url = client.signed_url("/fapi/v1/order", &[("symbol", "BTCUSDT".to_string())]);
        assert!(url.starts_with("https://fapi.binance.test/fapi/v1/order?symbol=BTCUSDT"));
        assert!(url.contains("&signature="));
        assert!(url.contains("&timestamp=") || url.contains("?timestamp="));
    }
}
