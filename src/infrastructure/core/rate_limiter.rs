use crate::domain::errors::OrderError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Exchange endpoint categories with separate published limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    Public,
    Private,
    Order,
}

impl EndpointCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointCategory::Public => "public",
            EndpointCategory::Private => "private",
            EndpointCategory::Order => "order",
        }
    }
}

/// Sustained rate (tokens per second) and burst capacity per category.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub public_per_second: f64,
    pub private_per_second: f64,
    pub order_per_second: f64,
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            public_per_second: 20.0,
            private_per_second: 10.0,
            order_per_second: 5.0,
            burst: 10.0,
        }
    }
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(refill_per_second: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_per_second,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = Instant::now();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token bucket per endpoint category, sized to the exchange's published
/// limits. An exhausted bucket fails fast with `RateLimited` before any
/// request leaves the process.
pub struct RateLimiter {
    buckets: Mutex<HashMap<EndpointCategory, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(
            EndpointCategory::Public,
            Bucket::new(config.public_per_second, config.burst),
        );
        buckets.insert(
            EndpointCategory::Private,
            Bucket::new(config.private_per_second, config.burst),
        );
        buckets.insert(
            EndpointCategory::Order,
            Bucket::new(config.order_per_second, config.burst),
        );
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    /// Take one token or fail with `OrderError::RateLimited`.
    pub fn acquire(&self, category: EndpointCategory) -> Result<(), OrderError> {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = buckets
            .get_mut(&category)
            .expect("all categories are seeded at construction");
        if bucket.try_take() {
            Ok(())
        } else {
            Err(OrderError::RateLimited {
                endpoint: category.as_str().to_string(),
            })
        }
    }
}
