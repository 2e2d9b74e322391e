use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// EWMA smoothing factor.
const ALPHA: f64 = 0.2;

/// Endpoint classes tracked separately per exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    OrderBook,
    PlaceOrder,
    Balance,
    Positions,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::OrderBook => "order_book",
            Endpoint::PlaceOrder => "place_order",
            Endpoint::Balance => "balance",
            Endpoint::Positions => "positions",
        }
    }
}

struct Cell {
    /// f64 bits of the current EWMA in milliseconds.
    ewma_bits: AtomicU64,
    samples: AtomicU64,
}

impl Cell {
    fn new() -> Self {
        Self {
            ewma_bits: AtomicU64::new(f64::NAN.to_bits()),
            samples: AtomicU64::new(0),
        }
    }
}

/// Per-exchange, per-endpoint EWMA latency. Readers are lock-free (atomic
/// doubles); the writer side serializes on the map lock only when a new
/// (exchange, endpoint) pair first appears.
pub struct LatencyTable {
    cells: RwLock<HashMap<(String, Endpoint), std::sync::Arc<Cell>>>,
}

impl LatencyTable {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
        }
    }

    fn cell(&self, exchange_id: &str, endpoint: Endpoint) -> std::sync::Arc<Cell> {
        {
            let cells = self.cells.read().unwrap_or_else(|p| p.into_inner());
            if let Some(cell) = cells.get(&(exchange_id.to_string(), endpoint)) {
                return cell.clone();
            }
        }
        let mut cells = self.cells.write().unwrap_or_else(|p| p.into_inner());
        cells
            .entry((exchange_id.to_string(), endpoint))
            .or_insert_with(|| std::sync::Arc::new(Cell::new()))
            .clone()
    }

    pub fn record(&self, exchange_id: &str, endpoint: Endpoint, latency_ms: f64) {
        let cell = self.cell(exchange_id, endpoint);
        let mut current = f64::from_bits(cell.ewma_bits.load(Ordering::Relaxed));
        loop {
            let next = if current.is_nan() {
                latency_ms
            } else {
                ALPHA * latency_ms + (1.0 - ALPHA) * current
            };
            match cell.ewma_bits.compare_exchange_weak(
                current.to_bits(),
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = f64::from_bits(actual),
            }
        }
        cell.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, exchange_id: &str, endpoint: Endpoint) -> Option<f64> {
        let cells = self.cells.read().unwrap_or_else(|p| p.into_inner());
        let cell = cells.get(&(exchange_id.to_string(), endpoint))?;
        let value = f64::from_bits(cell.ewma_bits.load(Ordering::Relaxed));
        if value.is_nan() { None } else { Some(value) }
    }

    pub fn sample_count(&self, exchange_id: &str, endpoint: Endpoint) -> u64 {
        let cells = self.cells.read().unwrap_or_else(|p| p.into_inner());
        cells
            .get(&(exchange_id.to_string(), endpoint))
            .map(|c| c.samples.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Pick the candidate with the lowest EWMA for the endpoint. Exchanges
    /// with no samples yet sort first so they get measured.
    pub fn best_exchange<'a>(
        &self,
        endpoint: Endpoint,
        candidates: impl Iterator<Item = &'a str>,
    ) -> Option<String> {
        candidates
            .map(|id| (id, self.get(id, endpoint).unwrap_or(0.0)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id.to_string())
    }
}

impl Default for LatencyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_ewma() {
        let table = LatencyTable::new();
        assert_eq!(table.get("a", Endpoint::OrderBook), None);
        table.record("a", Endpoint::OrderBook, 10.0);
        assert_eq!(table.get("a", Endpoint::OrderBook), Some(10.0));
    }

    #[test]
    fn test_ewma_update() {
        let table = LatencyTable::new();
        table.record("a", Endpoint::OrderBook, 10.0);
        table.record("a", Endpoint::OrderBook, 20.0);
        // 0.2 * 20 + 0.8 * 10 = 12
        let value = table.get("a", Endpoint::OrderBook).unwrap();
        assert!((value - 12.0).abs() < 1e-9);
        assert_eq!(table.sample_count("a", Endpoint::OrderBook), 2);
    }

    #[test]
    fn test_best_exchange_prefers_lowest() {
        let table = LatencyTable::new();
        table.record("slow", Endpoint::PlaceOrder, 80.0);
        table.record("fast", Endpoint::PlaceOrder, 5.0);
        let best = table
            .best_exchange(Endpoint::PlaceOrder, ["slow", "fast"].into_iter())
            .unwrap();
        assert_eq!(best, "fast");
    }

    #[test]
    fn test_unmeasured_exchange_sorts_first() {
        let table = LatencyTable::new();
        table.record("measured", Endpoint::PlaceOrder, 5.0);
        let best = table
            .best_exchange(Endpoint::PlaceOrder, ["measured", "new"].into_iter())
            .unwrap();
        assert_eq!(best, "new");
    }

    #[test]
    fn test_endpoints_tracked_separately() {
        let table = LatencyTable::new();
        table.record("a", Endpoint::OrderBook, 5.0);
        assert_eq!(table.get("a", Endpoint::PlaceOrder), None);
    }
}
