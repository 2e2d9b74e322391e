pub mod http_client_factory;
pub mod rate_limiter;

pub use http_client_factory::HttpClientFactory;
pub use rate_limiter::{EndpointCategory, RateLimitConfig, RateLimiter};
