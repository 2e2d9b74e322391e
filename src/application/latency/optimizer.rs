use crate::application::exchange::ExchangeRouter;
use crate::application::latency::benchmark::LatencyReport;
use crate::application::latency::ewma::Endpoint;
use crate::domain::errors::OrderError;
use crate::domain::market::OrderBookSnapshot;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Instant;
use tracing::{debug, info};

const BOOK_DEPTH: usize = 20;

/// Hot-path order book access: serve from cache while fresh, otherwise fetch
/// from the lowest-EWMA-latency connected exchange and cache the result.
///
/// The cache is a map of immutable snapshots behind a std read-write lock;
/// readers clone an `Arc` and never hold the lock across an await. Cache
/// writers serialize, which is acceptable per the ownership table.
pub struct LatencyOptimizer {
    router: Arc<ExchangeRouter>,
    cache: RwLock<HashMap<String, Arc<OrderBookSnapshot>>>,
    cache_ttl_ms: i64,
}

impl LatencyOptimizer {
    pub fn new(router: Arc<ExchangeRouter>, cache_ttl_ms: i64) -> Self {
        Self {
            router,
            cache: RwLock::new(HashMap::new()),
            cache_ttl_ms,
        }
    }

    fn cached(&self, symbol: &str) -> Option<Arc<OrderBookSnapshot>> {
        self.cache
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(symbol)
            .cloned()
    }

    /// Cached book if younger than the TTL, else a fresh fetch from the
    /// fastest venue.
    pub async fn get_order_book_optimized(
        &self,
        symbol: &str,
    ) -> Result<Arc<OrderBookSnapshot>, OrderError> {
        if let Some(book) = self.cached(symbol)
            && book.age_ms() < self.cache_ttl_ms
        {
            return Ok(book);
        }
        self.fetch_and_cache(symbol).await
    }

    async fn fetch_and_cache(&self, symbol: &str) -> Result<Arc<OrderBookSnapshot>, OrderError> {
        let latency = self.router.latency_table();
        let ids = self.router.exchange_ids();
        let routable: Vec<String> = ids
            .iter()
            .filter(|id| {
                self.router
                    .handle(id)
                    .map(|h| h.health.is_routable())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let preferred = latency
            .best_exchange(Endpoint::OrderBook, routable.iter().map(String::as_str))
            .ok_or_else(|| OrderError::Rejected {
                reason: "no connected exchange for order book".to_string(),
            })?;

        debug!(
            "LatencyOptimizer: fetching {} book from {} (lowest EWMA)",
            symbol, preferred
        );
        let snapshot = self
            .router
            .fetch_order_book(&preferred, symbol, BOOK_DEPTH)
            .await?;

        self.cache
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(symbol.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    /// Fresh books from every routable exchange, fetching any that are
    /// stale. Used by the arbitrage scanner, which needs all venues.
    pub async fn books_across_exchanges(
        &self,
        symbol: &str,
    ) -> Vec<Arc<OrderBookSnapshot>> {
        let mut books = Vec::new();
        for id in self.router.exchange_ids() {
            let Ok(handle) = self.router.handle(&id) else {
                continue;
            };
            if !handle.health.is_routable() {
                continue;
            }
            match self.router.fetch_order_book(&id, symbol, BOOK_DEPTH).await {
                Ok(book) => books.push(book),
                Err(e) => debug!(
                    "LatencyOptimizer: book fetch failed on {} for {}: {}",
                    id, symbol, e
                ),
            }
        }
        books
    }

    /// Issue `n_operations` probe fetches and summarize the observed
    /// distribution.
    pub async fn benchmark(&self, symbol: &str, n_operations: usize) -> LatencyReport {
        let mut samples_ms = Vec::with_capacity(n_operations);
        let mut failures = 0usize;

        for _ in 0..n_operations {
            let started = Instant::now();
            match self.fetch_and_cache(symbol).await {
                Ok(_) => samples_ms.push(started.elapsed().as_secs_f64() * 1000.0),
                Err(_) => failures += 1,
            }
        }

        let report = LatencyReport::from_samples(&samples_ms, n_operations, failures);
        info!(
            "LatencyOptimizer: benchmark {} ops -> avg {:.2}ms p95 {:.2}ms success {:.1}%",
            n_operations,
            report.avg_ms,
            report.p95_ms,
            report.success_rate * 100.0
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::latency::ewma::LatencyTable;
    use crate::domain::ports::ExchangeClient;
    use crate::infrastructure::mock::MockExchangeClient;
    use rust_decimal_macros::dec;

    async fn optimizer_with_one() -> (Arc<MockExchangeClient>, LatencyOptimizer) {
        let exchange = Arc::new(MockExchangeClient::new("mock", dec!(1000)));
        exchange.set_price("BTC/USDT", dec!(50000)).await;
        let router = Arc::new(ExchangeRouter::new(
            vec![exchange.clone() as Arc<dyn ExchangeClient>],
            Arc::new(LatencyTable::new()),
            2000,
        ));
        (exchange, LatencyOptimizer::new(router, 500))
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let (_exchange, optimizer) = optimizer_with_one().await;

        let first = optimizer.get_order_book_optimized("BTC/USDT").await.unwrap();
        let second = optimizer.get_order_book_optimized("BTC/USDT").await.unwrap();
        // Same Arc: second call served from cache
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_stale_cache_refetches() {
        let exchange = Arc::new(MockExchangeClient::new("mock", dec!(1000)));
        exchange.set_price("BTC/USDT", dec!(50000)).await;
        let router = Arc::new(ExchangeRouter::new(
            vec![exchange.clone() as Arc<dyn ExchangeClient>],
            Arc::new(LatencyTable::new()),
            2000,
        ));
        let optimizer = LatencyOptimizer::new(router, 0); // everything stale

        let first = optimizer.get_order_book_optimized("BTC/USDT").await.unwrap();
        let second = optimizer.get_order_book_optimized("BTC/USDT").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_benchmark_reports_success_rate() {
        let (_exchange, optimizer) = optimizer_with_one().await;
        let report = optimizer.benchmark("BTC/USDT", 10).await;
        assert_eq!(report.operations, 10);
        assert!(report.success_rate > 0.99);
        assert!(report.avg_ms >= 0.0);
    }
}
