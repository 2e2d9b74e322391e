use crate::application::exchange::health::ConnectionHealth;
use crate::application::latency::ewma::{Endpoint, LatencyTable};
use crate::domain::errors::OrderError;
use crate::domain::market::OrderBookSnapshot;
use crate::domain::ports::ExchangeClient;
use crate::domain::trading::types::{OrderAck, OrderRequest, PositionInfo, Tick};
use crate::domain::trading::AccountState;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, Receiver};
use tracing::{debug, info, warn};

/// Tightest quote across exchanges, with the venues it came from.
#[derive(Debug, Clone)]
pub struct BestQuote {
    pub symbol: String,
    pub bid: Decimal,
    pub bid_exchange: String,
    pub ask: Decimal,
    pub ask_exchange: String,
}

pub struct ExchangeHandle {
    pub client: Arc<dyn ExchangeClient>,
    pub health: Arc<ConnectionHealth>,
    pub account: RwLock<AccountState>,
    /// Last book per symbol, refreshed by every fetch through the router.
    last_book: std::sync::RwLock<HashMap<String, Arc<OrderBookSnapshot>>>,
}

impl ExchangeHandle {
    fn new(client: Arc<dyn ExchangeClient>) -> Self {
        let account = AccountState::new(client.exchange_id());
        Self {
            client,
            health: Arc::new(ConnectionHealth::new()),
            account: RwLock::new(account),
            last_book: std::sync::RwLock::new(HashMap::new()),
        }
    }

    fn cached_book(&self, symbol: &str) -> Option<Arc<OrderBookSnapshot>> {
        self.last_book
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(symbol)
            .cloned()
    }

    fn cache_book(&self, snapshot: Arc<OrderBookSnapshot>) {
        self.last_book
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(snapshot.symbol.clone(), snapshot);
    }
}

/// Uniform facade over N exchange clients, keyed by exchange id.
///
/// Tracks per-client health, caches the last order book per symbol, feeds
/// the latency table on every call, and owns the per-exchange account
/// snapshots (readers copy).
pub struct ExchangeRouter {
    handles: HashMap<String, Arc<ExchangeHandle>>,
    latency: Arc<LatencyTable>,
    quote_asset: String,
    book_staleness_ms: i64,
}

impl ExchangeRouter {
    pub fn new(
        clients: Vec<Arc<dyn ExchangeClient>>,
        latency: Arc<LatencyTable>,
        book_staleness_ms: i64,
    ) -> Self {
        let handles = clients
            .into_iter()
            .map(|c| (c.exchange_id().to_string(), Arc::new(ExchangeHandle::new(c))))
            .collect();
        Self {
            handles,
            latency,
            quote_asset: "USDT".to_string(),
            book_staleness_ms,
        }
    }

    pub fn exchange_ids(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    pub fn handle(&self, exchange_id: &str) -> Result<&Arc<ExchangeHandle>, OrderError> {
        self.handles
            .get(exchange_id)
            .ok_or_else(|| OrderError::UnknownExchange(exchange_id.to_string()))
    }

    pub fn latency_table(&self) -> Arc<LatencyTable> {
        self.latency.clone()
    }

    pub fn round_trip_fee_pct(&self, exchange_id: &str) -> Decimal {
        self.handles
            .get(exchange_id)
            .map(|h| h.client.round_trip_fee_pct())
            .unwrap_or(Decimal::ZERO)
    }

    /// Route an order to an explicitly named exchange. Named routing works
    /// even on a degraded client so exits always have a path out.
    pub async fn place_on(
        &self,
        exchange_id: &str,
        request: &OrderRequest,
    ) -> Result<OrderAck, OrderError> {
        let handle = self.handle(exchange_id)?;
        if !handle.health.is_connected() {
            return Err(OrderError::Disconnected(exchange_id.to_string()));
        }

        let started = Instant::now();
        let result = handle.client.place_order(request).await;
        self.latency.record(
            exchange_id,
            Endpoint::PlaceOrder,
            started.elapsed().as_secs_f64() * 1000.0,
        );

        match &result {
            Ok(_) => handle.health.record_success(),
            Err(e) if e.is_transient() => handle.health.record_error(),
            // Rejections are a healthy venue saying no.
            Err(_) => handle.health.record_success(),
        }
        result
    }

    /// The lowest-EWMA-latency routable exchange whose free balance covers
    /// `required_margin`.
    pub async fn best_venue(&self, required_margin: Decimal) -> Result<String, OrderError> {
        let mut candidates = Vec::new();
        for (id, handle) in &self.handles {
            if !handle.health.is_routable() {
                continue;
            }
            let account = handle.account.read().await;
            if account.balance_free >= required_margin {
                candidates.push(id.clone());
            }
        }

        self.latency
            .best_exchange(Endpoint::PlaceOrder, candidates.iter().map(String::as_str))
            .ok_or_else(|| OrderError::Rejected {
                reason: "no routable exchange with sufficient balance".to_string(),
            })
    }

    /// Route to the best venue for `required_margin`. Returns the chosen
    /// venue with the ack.
    pub async fn place_best(
        &self,
        request: &OrderRequest,
        required_margin: Decimal,
    ) -> Result<(String, OrderAck), OrderError> {
        let best = self.best_venue(required_margin).await?;
        debug!("ExchangeRouter: routing {} order to {}", request.symbol, best);
        let ack = self.place_on(&best, request).await?;
        Ok((best, ack))
    }

    pub async fn cancel_on(
        &self,
        exchange_id: &str,
        symbol: &str,
        order_id: &str,
    ) -> Result<(), OrderError> {
        let handle = self.handle(exchange_id)?;
        handle.client.cancel_order(symbol, order_id).await
    }

    /// Fetch a depth snapshot and refresh the per-exchange book cache.
    pub async fn fetch_order_book(
        &self,
        exchange_id: &str,
        symbol: &str,
        depth: usize,
    ) -> Result<Arc<OrderBookSnapshot>, OrderError> {
        let handle = self.handle(exchange_id)?;
        let started = Instant::now();
        let result = handle.client.fetch_order_book(symbol, depth).await;
        self.latency.record(
            exchange_id,
            Endpoint::OrderBook,
            started.elapsed().as_secs_f64() * 1000.0,
        );

        match result {
            Ok(snapshot) => {
                handle.health.record_success();
                let snapshot = Arc::new(snapshot);
                handle.cache_book(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                if e.is_transient() {
                    handle.health.record_error();
                }
                Err(e)
            }
        }
    }

    /// Cached books for the symbol on every routable exchange, oldest first
    /// filtered by the staleness threshold.
    pub fn fresh_books(&self, symbol: &str) -> Vec<Arc<OrderBookSnapshot>> {
        self.handles
            .values()
            .filter(|h| h.health.is_routable())
            .filter_map(|h| h.cached_book(symbol))
            .filter(|b| b.age_ms() < self.book_staleness_ms)
            .collect()
    }

    /// Tightest bid/ask across connected exchanges with a fresh book.
    pub fn get_best_quote(&self, symbol: &str) -> Option<BestQuote> {
        let books = self.fresh_books(symbol);

        let mut best: Option<BestQuote> = None;
        for book in books {
            let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) else {
                continue;
            };
            match &mut best {
                None => {
                    best = Some(BestQuote {
                        symbol: symbol.to_string(),
                        bid,
                        bid_exchange: book.exchange_id.clone(),
                        ask,
                        ask_exchange: book.exchange_id.clone(),
                    });
                }
                Some(quote) => {
                    if bid > quote.bid {
                        quote.bid = bid;
                        quote.bid_exchange = book.exchange_id.clone();
                    }
                    if ask < quote.ask {
                        quote.ask = ask;
                        quote.ask_exchange = book.exchange_id.clone();
                    }
                }
            }
        }
        best
    }

    /// Refresh the account snapshot from the exchange and return a copy.
    pub async fn refresh_account(&self, exchange_id: &str) -> Result<AccountState, OrderError> {
        let handle = self.handle(exchange_id)?;
        let started = Instant::now();
        let balances = handle.client.fetch_balance().await;
        self.latency.record(
            exchange_id,
            Endpoint::Balance,
            started.elapsed().as_secs_f64() * 1000.0,
        );

        match balances {
            Ok(balances) => {
                handle.health.record_success();
                let quote = balances.get(&self.quote_asset).cloned().unwrap_or_default();
                let mut account = handle.account.write().await;
                account.apply_balances(quote.free, quote.used);
                Ok(account.clone())
            }
            Err(e) => {
                if e.is_transient() {
                    handle.health.record_error();
                }
                Err(e)
            }
        }
    }

    pub async fn account_snapshot(&self, exchange_id: &str) -> Result<AccountState, OrderError> {
        let handle = self.handle(exchange_id)?;
        Ok(handle.account.read().await.clone())
    }

    pub async fn fetch_positions_on(
        &self,
        exchange_id: &str,
    ) -> Result<Vec<PositionInfo>, OrderError> {
        let handle = self.handle(exchange_id)?;
        let started = Instant::now();
        let result = handle.client.fetch_positions().await;
        self.latency.record(
            exchange_id,
            Endpoint::Positions,
            started.elapsed().as_secs_f64() * 1000.0,
        );
        match &result {
            Ok(_) => handle.health.record_success(),
            Err(e) if e.is_transient() => handle.health.record_error(),
            Err(_) => {}
        }
        result
    }

    /// Merge the tick streams of every exchange into one receiver. A
    /// watchdog per exchange resubscribes with capped backoff when a stream
    /// terminates, marking the client disconnected in between.
    pub fn spawn_tick_fanout(self: &Arc<Self>, symbols: Vec<String>) -> Receiver<Tick> {
        let (tx, rx) = mpsc::channel(2000);

        for (exchange_id, handle) in &self.handles {
            let exchange_id = exchange_id.clone();
            let handle = handle.clone();
            let symbols = symbols.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let mut backoff = 1u64;
                loop {
                    match handle.client.stream_ticks(&symbols).await {
                        Ok(mut ticks) => {
                            handle.health.set_connected(true);
                            info!("ExchangeRouter: tick stream up on {}", exchange_id);
                            backoff = 1;
                            while let Some(tick) = ticks.recv().await {
                                if tx.send(tick).await.is_err() {
                                    return;
                                }
                            }
                            handle.health.set_connected(false);
                            warn!(
                                "ExchangeRouter: tick stream on {} ended, resubscribing",
                                exchange_id
                            );
                        }
                        Err(e) => {
                            handle.health.set_connected(false);
                            warn!(
                                "ExchangeRouter: tick subscribe failed on {}: {}",
                                exchange_id, e
                            );
                        }
                    }
                    if tx.is_closed() {
                        return;
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(60);
                }
            });
        }

        rx
    }
}
