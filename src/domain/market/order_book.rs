use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Depth snapshot for one symbol on one exchange.
///
/// Invariant: `bids` sorted descending, `asks` ascending, and the book is
/// never crossed (`bids[0].price < asks[0].price`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub exchange_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }

    /// Check the ordering and non-crossed invariants. Snapshots that fail are
    /// discarded at the ingestion boundary, never cached.
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask())
            && bid >= ask
        {
            return Err(format!(
                "crossed book for {}: bid {} >= ask {}",
                self.symbol, bid, ask
            ));
        }
        if self.bids.windows(2).any(|w| w[0].price < w[1].price) {
            return Err(format!("bids not sorted descending for {}", self.symbol));
        }
        if self.asks.windows(2).any(|w| w[0].price > w[1].price) {
            return Err(format!("asks not sorted ascending for {}", self.symbol));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal) -> BookLevel {
        BookLevel {
            price,
            quantity: dec!(1),
        }
    }

    fn snapshot(bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: "BTC/USDT".to_string(),
            exchange_id: "bitget".to_string(),
            bids,
            asks,
            timestamp: Utc::now(),
            latency_ms: 1.0,
        }
    }

    #[test]
    fn test_valid_book_passes() {
        let book = snapshot(
            vec![level(dec!(100)), level(dec!(99))],
            vec![level(dec!(101)), level(dec!(102))],
        );
        assert!(book.validate().is_ok());
        assert_eq!(book.mid_price(), Some(dec!(100.5)));
    }

    #[test]
    fn test_crossed_book_rejected() {
        let book = snapshot(vec![level(dec!(101))], vec![level(dec!(100))]);
        assert!(book.validate().is_err());
    }

    #[test]
    fn test_equal_top_of_book_rejected() {
        let book = snapshot(vec![level(dec!(100))], vec![level(dec!(100))]);
        assert!(book.validate().is_err());
    }

    #[test]
    fn test_unsorted_levels_rejected() {
        let book = snapshot(
            vec![level(dec!(99)), level(dec!(100))],
            vec![level(dec!(101))],
        );
        assert!(book.validate().is_err());
    }
}
